use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::ops::Deref;

/// A decoded message and any additional metadata provided
/// by the RPC system.
pub struct Request<Msg> {
    remote_addr: SocketAddr,
    msg: Msg,
}

impl<Msg> Debug for Request<Msg>
where
    Msg: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("msg", &self.msg)
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}

impl<Msg> Request<Msg> {
    pub(crate) fn new(remote_addr: SocketAddr, msg: Msg) -> Self {
        Self { remote_addr, msg }
    }

    /// A utility for creating a request without a running server.
    ///
    /// This is mostly useful for calling handlers directly in tests.
    pub fn using_owned(msg: Msg) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 80));
        Self::new(addr, msg)
    }

    /// Consumes the request into the message.
    pub fn into_inner(self) -> Msg {
        self.msg
    }

    /// The remote address of the incoming message.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

impl<Msg> Deref for Request<Msg> {
    type Target = Msg;

    fn deref(&self) -> &Self::Target {
        &self.msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request() {
        let addr = "127.0.0.1:8000".parse().unwrap();
        let req = Request::new(addr, "demo".to_string());
        assert_eq!(req.remote_addr(), addr, "Remote addr should match.");
        assert_eq!(req.len(), 4);
        assert_eq!(req.into_inner(), "demo");
    }
}
