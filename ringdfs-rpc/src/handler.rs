use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytecheck::CheckBytes;
use rkyv::de::deserializers::SharedDeserializeMap;
use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{AlignedVec, Archive, Deserialize, Serialize};

use crate::net::Status;
use crate::request::Request;
use crate::SCRATCH_SPACE;

/// The URI path a handler is served on, `/{service_name}/{message_path}`.
pub type HandlerKey = String;

/// Collects the message handlers of a service when it is added to a server.
///
/// Only messages registered here are routed to the service, a [Handler]
/// implementation alone is not enough.
pub struct ServiceRegistry<Svc> {
    handlers: BTreeMap<HandlerKey, Arc<dyn OpaqueMessageHandler>>,
    service: Arc<Svc>,
}

impl<Svc> ServiceRegistry<Svc>
where
    Svc: RpcService + Send + Sync + 'static,
{
    pub(crate) fn new(service: Svc) -> Self {
        Self {
            handlers: BTreeMap::new(),
            service: Arc::new(service),
        }
    }

    pub(crate) fn into_handlers(
        self,
    ) -> BTreeMap<HandlerKey, Arc<dyn OpaqueMessageHandler>> {
        self.handlers
    }

    /// Routes messages of type `Msg` to the service.
    pub fn add_handler<Msg>(&mut self)
    where
        Msg: Archive + Send + 'static,
        Msg::Archived: for<'a> CheckBytes<DefaultValidator<'a>>
            + Deserialize<Msg, SharedDeserializeMap>,
        Svc: Handler<Msg>,
    {
        let phantom = PhantomHandler {
            handler: self.service.clone(),
            _msg: PhantomData::<fn() -> Msg>,
        };

        let key = crate::to_uri_path(
            <Svc as RpcService>::service_name(),
            <Svc as Handler<Msg>>::path(),
        );
        self.handlers.insert(key, Arc::new(phantom));
    }
}

/// A set of message handlers served under a common name.
pub trait RpcService: Sized {
    /// Prefixes the path of every handler of the service.
    ///
    /// Defaults to the type name, services which must be reachable from
    /// other builds of the crate should pick a stable name.
    fn service_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    fn register_handlers(registry: &mut ServiceRegistry<Self>);
}

#[async_trait]
/// A generic RPC message handler.
///
/// The message is validated and deserialized before the handler is called,
/// the reply is serialized and shipped back to the caller. Returning a
/// [Status] signals a failure to the client.
pub trait Handler<Msg>: RpcService
where
    Msg: Archive + Send + 'static,
    Msg::Archived:
        for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<Msg, SharedDeserializeMap>,
{
    type Reply: Archive + Serialize<AllocSerializer<SCRATCH_SPACE>> + Send;

    fn path() -> &'static str {
        std::any::type_name::<Msg>()
    }

    async fn on_message(&self, msg: Request<Msg>) -> Result<Self::Reply, Status>;
}

#[async_trait]
pub(crate) trait OpaqueMessageHandler: Send + Sync {
    /// Handles a raw message buffer.
    ///
    /// Returns the encoded reply, or the encoded [Status] if the message
    /// could not be handled.
    async fn try_handle(
        &self,
        remote_addr: SocketAddr,
        data: AlignedVec,
    ) -> Result<AlignedVec, AlignedVec>;
}

struct PhantomHandler<H, Msg> {
    handler: Arc<H>,
    _msg: PhantomData<fn() -> Msg>,
}

#[async_trait]
impl<H, Msg> OpaqueMessageHandler for PhantomHandler<H, Msg>
where
    Msg: Archive + Send + 'static,
    Msg::Archived:
        for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<Msg, SharedDeserializeMap>,
    H: Handler<Msg> + Send + Sync + 'static,
{
    async fn try_handle(
        &self,
        remote_addr: SocketAddr,
        data: AlignedVec,
    ) -> Result<AlignedVec, AlignedVec> {
        let msg: Msg = match rkyv::from_bytes(&data) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, remote_addr = %remote_addr, "Rejecting invalid payload.");
                return Err(encode_status(&Status::invalid()));
            },
        };

        let request = Request::new(remote_addr, msg);
        match self.handler.on_message(request).await {
            Ok(reply) => rkyv::to_bytes::<_, SCRATCH_SPACE>(&reply).map_err(|e| {
                encode_status(&Status::internal(format!(
                    "Failed to serialize reply: {e}"
                )))
            }),
            Err(status) => Err(encode_status(&status)),
        }
    }
}

pub(crate) fn encode_status(status: &Status) -> AlignedVec {
    rkyv::to_bytes::<_, SCRATCH_SPACE>(status).unwrap_or_else(|e| {
        warn!(error = ?e, "Failed to serialize error message.");
        AlignedVec::new()
    })
}
