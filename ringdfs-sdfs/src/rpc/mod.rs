mod client;
pub(crate) mod file_service;
pub(crate) mod messages;

pub use client::FileClient;
pub use file_service::FileService;
pub use messages::*;
