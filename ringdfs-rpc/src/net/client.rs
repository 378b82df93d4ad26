use std::net::SocketAddr;
use std::time::Duration;

use http::{Method, Request, StatusCode};
use hyper::client::HttpConnector;
use hyper::{Body, Client};
use rkyv::AlignedVec;

use crate::net::Status;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
/// A HTTP/2 channel to a remote RPC server.
///
/// The channel connects lazily and multiplexes every request sent through
/// it, cloning the channel is cheap.
pub struct Channel {
    remote_addr: SocketAddr,
    client: Client<HttpConnector, Body>,
}

impl Channel {
    /// Creates a new channel targeting the remote RPC server.
    pub fn connect(remote_addr: SocketAddr) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);
        http.set_connect_timeout(Some(CONNECT_TIMEOUT));

        let client = Client::builder()
            .http2_only(true)
            .http2_adaptive_window(true)
            .build(http);

        Self {
            remote_addr,
            client,
        }
    }

    #[inline]
    /// The address of the remote server.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Sends a message payload to the given URI path.
    ///
    /// Returns the reply buffer, or the encoded status if the server
    /// rejected the request.
    pub(crate) async fn send_msg(
        &self,
        uri_path: &str,
        msg: Vec<u8>,
    ) -> Result<Result<AlignedVec, AlignedVec>, Status> {
        let uri = format!("http://{}{}", self.remote_addr, uri_path);
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(Body::from(msg))
            .map_err(Status::internal)?;

        let (parts, body) = self
            .client
            .request(request)
            .await
            .map_err(Status::connection)?
            .into_parts();
        let buffer = crate::utils::to_aligned(body)
            .await
            .map_err(Status::connection)?;

        if parts.status == StatusCode::OK {
            Ok(Ok(buffer))
        } else {
            Ok(Err(buffer))
        }
    }
}
