//! Purpose: Registry of the services the `lifecall` binary can host.
//! Exports: `ServiceInfo`, `SERVICES`, `create`.
//! Role: Maps a service name to a boxed instance for the dispatcher factory.
//! Invariants: Unknown names fail with `SYSTEM`, which the dispatcher treats as fatal.

use lifecall::{Config, ErrorCode, Failure, Service, ServiceResult};

mod counter;
mod echo;

pub(crate) use counter::Counter;
pub(crate) use echo::Echo;

#[derive(Clone, Copy, Debug)]
pub(crate) struct ServiceInfo {
    pub(crate) name: &'static str,
    pub(crate) about: &'static str,
}

pub(crate) const SERVICES: &[ServiceInfo] = &[
    ServiceInfo {
        name: "counter",
        about: "Increment a persistent per-id counter under an identity lock",
    },
    ServiceInfo {
        name: "echo",
        about: "Return the `msg` input unchanged",
    },
];

pub(crate) fn create(name: &str, config: &Config) -> ServiceResult<Box<dyn Service>> {
    match name {
        "counter" => Ok(Box::new(Counter::open(&config.state_dir))),
        "echo" => Ok(Box::new(Echo::default())),
        _ => Err(Failure::new(ErrorCode::SYSTEM)
            .with_message("unknown service")
            .with_field("service", name)),
    }
}
