//! Subcommand implementations

pub mod apply;
pub mod plan;
pub mod status;

use reconcile::ErrorCategory;

/// How a command finished when it did not error out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Some services failed or were skipped
    Partial,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Partial => 2,
        }
    }
}

/// Exit code for an error that aborted a command
///
/// Load-time problems (bad or missing stack file, cycles) exit 1. An
/// unreachable dependency or any other error raised mid-run exits 3.
pub fn error_exit_code(err: &anyhow::Error) -> i32 {
    match root_category(err) {
        Some(category) if category.is_load_time() => 1,
        Some(_) => 3,
        None => 1,
    }
}

/// Category of the first reconcile error in the chain
pub fn root_category(err: &anyhow::Error) -> Option<ErrorCategory> {
    err.chain()
        .find_map(|e| e.downcast_ref::<reconcile::Error>())
        .map(reconcile::Error::category)
}
