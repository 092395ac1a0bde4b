//! OnCourse core library: config, stored login, the HTTP API client, the Socket.IO
//! transport, and the conversation session used by both the CLI and the desktop app.

pub mod api;
pub mod auth;
pub mod config;
pub mod conversation;
pub mod credentials;
pub mod init;
pub mod socket;
