pub mod alerting;
pub mod charts;
pub mod db;
pub mod server;
pub mod web;
