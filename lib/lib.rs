pub mod build_info;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod logging;
pub mod poller;
pub mod queue;
pub mod server;
pub mod state;
pub mod stream;
pub mod transport;
