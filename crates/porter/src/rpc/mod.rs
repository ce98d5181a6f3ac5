//! Privilege-separated mount execution channel.
//!
//! The unprivileged engine talks to a privileged helper process over a
//! socketpair carrying newline-delimited JSON. This module holds the wire
//! protocol, the client, and the helper spawn/server loop.

mod client;
mod protocol;
mod server;

pub use client::RpcClient;
pub use protocol::{Request, Response, from_json_line, to_json_line};
pub use server::{HELPER_ENV, Helper, init_if_helper, is_helper, serve};
