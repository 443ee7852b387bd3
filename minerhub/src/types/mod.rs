//! Small self-contained helpers shared across modules.

mod debouncer;

pub use debouncer::{RefreshDebouncer, RefreshDecision};
