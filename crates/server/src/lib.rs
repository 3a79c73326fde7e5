pub mod config;
pub mod error;
pub mod file_logging;
pub mod routes;
pub mod state;
