pub mod agent_routes;
pub mod alert_routes;
pub mod command_routes;
pub mod install_routes;
pub mod server_routes;
