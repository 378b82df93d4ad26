mod client;
pub(crate) mod messages;
pub(crate) mod service;

pub use client::MapleJuiceClient;
pub use messages::*;
pub use service::MapleJuiceService;
