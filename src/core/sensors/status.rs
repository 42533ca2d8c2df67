//! Engine status and its transition table.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    #[default]
    Loading,
    Ready,
    NoData,
    NoSources,
    NeedsPrivileges,
    Error,
}

/// Where the primary tier stands when a sample update is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryPhase {
    /// Still probing primary candidates.
    Pending,
    /// A primary provider was started.
    Active,
    /// No primary candidate was available.
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// The merged view was rebuilt with `total` readings.
    Samples { total: usize, primary: PrimaryPhase },
    /// Every primary candidate was probed and none applies.
    NoPrimary { total: usize },
    /// Any provider reported a permission problem.
    PermissionDenied,
    /// The primary tier failed with an unexpected error.
    PrimaryUnexpected,
    Retry,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Loading => "loading",
            Status::Ready => "ready",
            Status::NoData => "no-data",
            Status::NoSources => "no-sources",
            Status::NeedsPrivileges => "needs-privileges",
            Status::Error => "error",
        }
    }

    /// `NeedsPrivileges` only leaves through `Retry`. `Error` is left for
    /// `Ready` once samples arrive, but never for an empty state.
    pub fn next(self, event: StatusEvent) -> Status {
        use Status::*;

        match (self, event) {
            (_, StatusEvent::Retry) => Loading,
            (_, StatusEvent::PermissionDenied) => NeedsPrivileges,
            (NeedsPrivileges, _) => NeedsPrivileges,

            (Ready, StatusEvent::PrimaryUnexpected) => Ready,
            (_, StatusEvent::PrimaryUnexpected) => Error,

            (_, StatusEvent::Samples { total, .. }) if total > 0 => Ready,
            (current, StatusEvent::Samples { primary: PrimaryPhase::Pending, .. }) => current,
            (Error, StatusEvent::Samples { .. }) => Error,
            (_, StatusEvent::Samples { primary: PrimaryPhase::Active, .. }) => NoData,
            (_, StatusEvent::Samples { primary: PrimaryPhase::Missing, .. }) => NoSources,

            (Error, StatusEvent::NoPrimary { .. }) => Error,
            (_, StatusEvent::NoPrimary { total }) if total > 0 => Ready,
            (_, StatusEvent::NoPrimary { .. }) => NoSources,
        }
    }

    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Status::NeedsPrivileges | Status::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
