//! Tokio runtime that hosts the sensor engine for synchronous callers.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use super::engine::{EngineConfig, EngineHandle, EngineSnapshot, SensorEngine};
use super::providers::ProviderRegistry;
use crate::error::{HwsenseError, Result};

/// Owns a small multi-thread runtime with the engine spawned on it.
pub struct SensorRuntime {
    /// Receiver for engine snapshots
    pub snapshot_rx: watch::Receiver<Arc<EngineSnapshot>>,

    handle: Option<EngineHandle>,
    runtime: tokio::runtime::Runtime,
}

impl SensorRuntime {
    pub fn new(registry: ProviderRegistry, config: EngineConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .thread_name("sensor-worker")
            .build()
            .map_err(|e| HwsenseError::runtime(format!("failed to build runtime: {}", e)))?;

        let handle = {
            let _guard = runtime.enter();
            SensorEngine::new(registry, config).spawn()
        };

        Ok(Self {
            snapshot_rx: handle.subscribe(),
            handle: Some(handle),
            runtime,
        })
    }

    pub fn retry(&self) {
        if let Some(handle) = &self.handle {
            handle.retry();
        }
    }

    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        Arc::clone(&self.snapshot_rx.borrow())
    }

    /// Drive a future on the engine's runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Stop the engine; the runtime shuts down when dropped.
    pub fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            self.runtime.block_on(handle.shutdown());
        }
    }
}
