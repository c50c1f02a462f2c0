// Request lifecycle core: error taxonomy, call context, lifecycle driver, timing.
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod timer;
