pub mod command_queue;
pub mod config;
pub mod events;
pub mod gateway;
pub mod retention;
pub mod status_sweeper;
