//! Shellboard core library: configuration, the command and script gates, the HTTP server,
//! and the client/console pieces shared by the CLI and desktop applications.

pub mod client;
pub mod config;
pub mod console;
pub mod exec;
pub mod gate;
pub mod init;
pub mod server;
pub mod system_info;
