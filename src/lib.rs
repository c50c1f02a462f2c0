//! Purpose: Library crate for single-call JSON services and the `lifecall` host.
//! Exports: `core` (taxonomy, context, lifecycle, timer), `dispatch`, `failure`, collaborators.
//! Role: Everything a service author needs; the binary only adds CLI and demo services.
//! Invariants: Every call yields exactly one `{"Err": ...}` response.
//! Invariants: Core modules take their context and log sink explicitly; no hidden globals.
pub mod config;
pub mod core;
pub mod dispatch;
pub mod failure;
pub mod lock;
pub mod log;
pub mod store;
pub mod wire;

pub use crate::config::{Config, DeploymentMode};
pub use crate::core::context::{INVALID_ID, RequestContext};
pub use crate::core::error::{ErrorCode, Failure, Outcome, ServiceResult, to_exit_code};
pub use crate::core::lifecycle::{Service, Stage};
pub use crate::dispatch::{Dispatcher, Response};
pub use crate::log::{LogSink, MemorySink, Severity, TracingSink};
