// src/toolconductor/mod.rs

pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod connection_manager;
pub mod event;
pub mod mcp_client;
pub mod orchestration;
pub mod tool_protocol;
pub mod tool_protocols;
pub mod tool_server_connection;

// Let's explicitly export the two entry points so we don't have to access them via
// toolconductor::connection_manager::ConnectionManager and friends.
pub use connection_manager::ConnectionManager;
pub use orchestration::OrchestrationLoop;
