//! # ringdfs RPC
//! A small, actor-like RPC framework which ships rkyv encoded messages
//! over HTTP/2.
//!
//! Services implement [RpcService] and one [Handler] per message type, the
//! [Server] routes each request to the handler registered for the
//! `/{service}/{message}` path and replies are decoded by the [RpcClient].
#[macro_use]
extern crate tracing;

mod client;
mod handler;
mod net;
mod request;
mod server;
mod utils;

pub const SCRATCH_SPACE: usize = 4096;

pub use async_trait::async_trait;
pub use client::RpcClient;
pub use handler::{Handler, RpcService, ServiceRegistry};
pub use net::{ArchivedErrorCode, ArchivedStatus, Channel, ErrorCode, Status};
pub use request::Request;
pub use server::Server;

pub(crate) fn to_uri_path(service: &str, path: &str) -> String {
    format!("/{}/{}", sanitise(service), sanitise(path))
}

/// Strips characters which are not valid within a URI path segment.
///
/// Type names may contain generics or spaces, these are collapsed so
/// the path is still routable.
fn sanitise(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | ':' | '_' | '-' | '.' => c,
            _ => '_',
        })
        .collect()
}
