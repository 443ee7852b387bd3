//! HTTP API served by the daemon.

mod server;
pub mod v0;

pub use server::{SharedState, router, serve};
