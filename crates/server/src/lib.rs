#![forbid(unsafe_code)]

mod connection;
pub mod handler;
pub mod server;

pub use connection::Connection;
pub use handler::{ServerContext, execute_command, handle_connection};
pub use server::{serve, spawn_autosave, spawn_sweeper};
