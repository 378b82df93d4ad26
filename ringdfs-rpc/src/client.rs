use std::marker::PhantomData;
use std::time::Duration;

use bytecheck::CheckBytes;
use rkyv::de::deserializers::SharedDeserializeMap;
use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{Archive, Deserialize, Serialize};

use crate::handler::{Handler, RpcService};
use crate::net::{Channel, Status};
use crate::SCRATCH_SPACE;

/// A RPC client handle for a given service.
///
/// Clients are cheap to create and clone, the underlying [Channel]
/// multiplexes all requests over a single HTTP/2 connection.
pub struct RpcClient<Svc>
where
    Svc: RpcService,
{
    channel: Channel,
    timeout: Option<Duration>,
    _p: PhantomData<Svc>,
}

impl<Svc> Clone for RpcClient<Svc>
where
    Svc: RpcService,
{
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            timeout: self.timeout,
            _p: PhantomData,
        }
    }
}

impl<Svc> RpcClient<Svc>
where
    Svc: RpcService,
{
    /// Creates a new RPC client which can handle a new service type.
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            timeout: None,
            _p: PhantomData,
        }
    }

    /// Sets a timeout of a given request.
    ///
    /// Requests exceeding the timeout are aborted with [Status::timeout].
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// Creates a new RPC client which handles a different service type
    /// over the same channel.
    pub fn new_client<Svc2>(&self) -> RpcClient<Svc2>
    where
        Svc2: RpcService,
    {
        RpcClient {
            channel: self.channel.clone(),
            timeout: self.timeout,
            _p: PhantomData,
        }
    }

    /// Sends a message to the server and wait for a reply.
    pub async fn send<Msg>(
        &self,
        msg: &Msg,
    ) -> Result<<Svc as Handler<Msg>>::Reply, Status>
    where
        Msg: Archive + Serialize<AllocSerializer<SCRATCH_SPACE>> + Send + 'static,
        Msg::Archived: for<'a> CheckBytes<DefaultValidator<'a>>
            + Deserialize<Msg, SharedDeserializeMap>,
        Svc: Handler<Msg>,
        <<Svc as Handler<Msg>>::Reply as Archive>::Archived: for<'a> CheckBytes<DefaultValidator<'a>>
            + Deserialize<<Svc as Handler<Msg>>::Reply, SharedDeserializeMap>,
    {
        match self.timeout {
            None => self.send_inner(msg).await,
            Some(timeout) => tokio::time::timeout(timeout, self.send_inner(msg))
                .await
                .map_err(|_| Status::timeout())?,
        }
    }

    async fn send_inner<Msg>(
        &self,
        msg: &Msg,
    ) -> Result<<Svc as Handler<Msg>>::Reply, Status>
    where
        Msg: Archive + Serialize<AllocSerializer<SCRATCH_SPACE>> + Send + 'static,
        Msg::Archived: for<'a> CheckBytes<DefaultValidator<'a>>
            + Deserialize<Msg, SharedDeserializeMap>,
        Svc: Handler<Msg>,
        <<Svc as Handler<Msg>>::Reply as Archive>::Archived: for<'a> CheckBytes<DefaultValidator<'a>>
            + Deserialize<<Svc as Handler<Msg>>::Reply, SharedDeserializeMap>,
    {
        let uri_path = crate::to_uri_path(
            <Svc as RpcService>::service_name(),
            <Svc as Handler<Msg>>::path(),
        );

        let msg_bytes =
            rkyv::to_bytes::<_, SCRATCH_SPACE>(msg).map_err(|_| Status::invalid())?;

        let result = self
            .channel
            .send_msg(&uri_path, msg_bytes.into_vec())
            .await?;

        match result {
            Ok(buffer) => rkyv::from_bytes(&buffer).map_err(|_| Status::invalid()),
            Err(buffer) => {
                let status: Status =
                    rkyv::from_bytes(&buffer).map_err(|_| Status::invalid())?;
                Err(status)
            },
        }
    }
}
