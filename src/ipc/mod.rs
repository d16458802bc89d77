// IPC module - Communication between the operator CLI and the daemon

pub mod client;
pub mod protocol;
pub mod server;

pub use client::IpcClient;
pub use protocol::{Command, LogOptions, Request, Response, ResponseData};
pub use server::{IpcServer, DEFAULT_SOCKET_PATH};
