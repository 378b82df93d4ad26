mod client;
mod server;
mod status;

pub use client::Channel;
pub(crate) use server::start_rpc_server;
pub use status::{ArchivedErrorCode, ArchivedStatus, ErrorCode, Status};
