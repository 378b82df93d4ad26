use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;

use http::{Request, Response, StatusCode};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::Body;
use rkyv::AlignedVec;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::handler::encode_status;
use crate::server::Routes;
use crate::Status;

/// Binds the address and spawns the HTTP/2 server dispatching to the routes.
///
/// Once `stop` changes the listener is closed and every open connection is
/// sent a GOAWAY, connections close after their in-flight requests.
pub(crate) async fn start_rpc_server(
    bind_addr: SocketAddr,
    routes: Routes,
    mut stop: watch::Receiver<bool>,
) -> io::Result<JoinHandle<()>> {
    let server = hyper::Server::try_bind(&bind_addr)
        .map_err(|e| io::Error::new(io::ErrorKind::AddrInUse, e))?
        .tcp_nodelay(true)
        .http2_only(true)
        .http2_adaptive_window(true);

    let make_service = make_service_fn(move |socket: &AddrStream| {
        let remote_addr = socket.remote_addr();
        let routes = routes.clone();
        let service = service_fn(move |req| dispatch(req, routes.clone(), remote_addr));
        async move { Ok::<_, Infallible>(service) }
    });

    let stopped = async move {
        let _ = stop.changed().await;
    };

    Ok(tokio::spawn(async move {
        let server = server.serve(make_service).with_graceful_shutdown(stopped);
        if let Err(e) = server.await {
            error!(error = ?e, bind_addr = %bind_addr, "RPC server stopped.");
        }
    }))
}

/// Routes a request to its handler, hyper runs one of these per stream.
async fn dispatch(
    req: Request<Body>,
    routes: Routes,
    remote_addr: SocketAddr,
) -> Result<Response<Body>, Infallible> {
    let (parts, body) = req.into_parts();
    let path = parts.uri.path();

    let Some(handler) = routes.get(path) else {
        debug!(path = path, remote_addr = %remote_addr, "No handler for request.");
        let status = Status::unavailable(format!("Unknown service {path}"));
        return Ok(reply(encode_status(&status), StatusCode::BAD_REQUEST));
    };

    let data = match crate::utils::to_aligned(body).await {
        Ok(data) => data,
        Err(e) => {
            warn!(error = ?e, remote_addr = %remote_addr, "Failed to read request body.");
            let mut response = Response::new(Body::from(e.to_string()));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            return Ok(response);
        },
    };

    Ok(match handler.try_handle(remote_addr, data).await {
        Ok(buffer) => reply(buffer, StatusCode::OK),
        Err(buffer) => reply(buffer, StatusCode::BAD_REQUEST),
    })
}

fn reply(buffer: AlignedVec, status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::from(buffer.into_vec()));
    *response.status_mut() = status;
    response
}
