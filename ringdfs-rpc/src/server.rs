use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::handler::{HandlerKey, OpaqueMessageHandler, RpcService, ServiceRegistry};

/// The RPC server of a node.
///
/// Services can be registered while the server is already accepting
/// requests, extensions attach theirs after the node has started.
pub struct Server {
    routes: Routes,
    stop: watch::Sender<bool>,
    _task: JoinHandle<()>,
}

impl Server {
    /// Binds the address and starts serving requests in the background.
    pub async fn listen(addr: SocketAddr) -> io::Result<Self> {
        let routes = Routes::default();
        let (stop, stopped) = watch::channel(false);
        let task = crate::net::start_rpc_server(addr, routes.clone(), stopped).await?;
        Ok(Self {
            routes,
            stop,
            _task: task,
        })
    }

    /// Registers every handler of the service.
    ///
    /// A service registered under the same name replaces the handlers of
    /// the previous one.
    pub fn add_service<Svc>(&self, service: Svc)
    where
        Svc: RpcService + Send + Sync + 'static,
    {
        let mut registry = ServiceRegistry::new(service);
        Svc::register_handlers(&mut registry);
        self.routes.extend(registry.into_handlers());
    }

    /// Stops serving requests.
    ///
    /// The address is released at once. Open connections are asked to go
    /// away and any request still reaching them gets `ServiceUnavailable`.
    pub fn shutdown(&self) {
        let _ = self.stop.send(true);
        self.routes.clear();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

type HandlerMap = BTreeMap<HandlerKey, Arc<dyn OpaqueMessageHandler>>;

#[derive(Clone, Default)]
/// The handlers of the server keyed by their URI path.
pub(crate) struct Routes(Arc<RwLock<HandlerMap>>);

impl Routes {
    fn extend(&self, handlers: HandlerMap) {
        self.0.write().extend(handlers);
    }

    fn clear(&self) {
        self.0.write().clear();
    }

    pub(crate) fn get(&self, uri_path: &str) -> Option<Arc<dyn OpaqueMessageHandler>> {
        self.0.read().get(uri_path).cloned()
    }
}
