pub mod command;
pub mod communication;
pub mod config;
pub mod enrollment;
pub mod error;
pub mod metrics;
pub mod poll_loop;
pub mod service_monitor;
