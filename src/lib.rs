//! # delth
//!
//! `delth` wraps a long-running command and makes its shutdown graceful from
//! the point of view of a load balancer. It proxies the command's own health
//! endpoint, and on `SIGTERM` (or when the command fails) it starts answering
//! health checks with `503` while the command keeps running. After a grace
//! delay the command is terminated and the proxy is shut down.
//!
//! The supervised command runs in its own POSIX session, so only unix
//! platforms are supported.
pub mod cli;
pub mod config;
pub mod drain;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod proxy;
pub mod server;
pub mod signal;
pub mod supervisor;

#[cfg(test)]
mod testing;
