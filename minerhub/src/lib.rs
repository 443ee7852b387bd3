//! Polling and command hub for network-attached mining devices.
//!
//! One [`coordinator::PollCoordinator`] per device keeps a normalized
//! snapshot fresh; [`controls::Registrar`] turns capabilities into
//! controls; [`fleet::FleetDispatcher`] fans commands out across devices.

pub mod api;
pub mod api_client;
pub mod config;
pub mod controls;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod fleet;
pub mod telemetry;
pub mod tracing;
pub mod types;
