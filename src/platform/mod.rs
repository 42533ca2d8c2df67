// Platform-specific code module

pub mod elevation;
pub mod host;

// Re-exports for cleaner imports
pub use elevation::{elevate_and_rerun, is_elevated};
pub use host::{
    CommandError, CommandRunner, FileAccess, FileWatch, HostShell, LocalHost, Problem,
    WatchCallback,
};
