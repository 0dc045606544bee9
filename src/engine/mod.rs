//! Console rendering of plans, diffs and progress

pub mod differ;
pub mod progress;
