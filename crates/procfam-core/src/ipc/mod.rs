//! Command socket: framing, messages, the daemon-side listener and a client.

pub mod client;
pub mod dispatch;
pub mod frame;
pub mod protocol;
pub mod server;

pub use client::{ClientError, ProcdClient};
pub use dispatch::dispatch;
pub use protocol::{ErrorCode, ReplyBody, Request, Response};
pub use server::{Command, bind, spawn_listener};
