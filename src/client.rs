//! The client façade: channels, the descriptor registry, the pending-call
//! registry, and the upcall sink, wired together behind `process_packet`.

use bytes::Bytes;

use crate::descriptor::{Method, Services};
use crate::key::CallKey;
use crate::registry::{PendingCalls, SendError};
use crate::sink::UpcallSink;
use crate::status::{Error, Status};
use crate::wire::{self, PacketType, PayloadExpectation};

/// One multiplexed link to a peer. Owns a synchronous output sink; the
/// critical section around `process_packet` is held while `send` runs,
/// so a blocking transport would stall every other channel on the
/// same client.
pub struct Channel {
    id: u32,
    output: Box<dyn Fn(&[u8]) -> Result<(), Error> + Send + Sync>,
}

impl Channel {
    pub fn new(id: u32, output: impl Fn(&[u8]) -> Result<(), Error> + Send + Sync + 'static) -> Self {
        Self {
            id,
            output: Box::new(output),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    fn send(&self, bytes: &[u8]) -> Result<(), Error> {
        (self.output)(bytes)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("id", &self.id).finish()
    }
}

type PreDispatchHook = Box<dyn Fn(CallKey, Option<&Bytes>, Option<Status>) + Send + Sync>;

/// Holds everything `process_packet` needs: the channel set, the service
/// descriptors, the pending-call registry, and the upcall sink. One
/// instance corresponds to one peer connection's worth of multiplexed
/// channels.
pub struct Client<C, S: UpcallSink<C>> {
    channels: Vec<Channel>,
    services: Services,
    calls: PendingCalls<C>,
    sink: S,
    pre_dispatch: Option<PreDispatchHook>,
}

impl<C: Clone, S: UpcallSink<C>> Client<C, S> {
    pub fn new(channels: Vec<Channel>, services: Services, sink: S) -> Self {
        Self {
            channels,
            services,
            calls: PendingCalls::new(),
            sink,
            pre_dispatch: None,
        }
    }

    /// Installs the narrow observer callback fired during dispatch. Called for
    /// every non-`SERVER_ERROR` packet, before the registry lookup, so it
    /// sees unmatched packets too.
    pub fn with_pre_dispatch(
        mut self,
        hook: impl Fn(CallKey, Option<&Bytes>, Option<Status>) + Send + Sync + 'static,
    ) -> Self {
        self.pre_dispatch = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> &PendingCalls<C> {
        &self.calls
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.services.methods()
    }

    fn channel_by_id(&self, id: u32) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id() == id)
    }

    /// Looks up a channel by id, or the first configured channel in
    /// insertion order if `id` is `None`.
    pub fn channel(&self, id: Option<u32>) -> Option<ChannelView<'_, C, S>> {
        let id = match id {
            Some(id) => id,
            None => self.channels.first()?.id(),
        };

        self.channel_by_id(id).map(|_| ChannelView {
            client: self,
            channel_id: id,
        })
    }

    /// Resolves `method_name` (`package.Service/Method` or
    /// `package.Service.Method`) against the service descriptors and asks
    /// the sink to build the embedder-facing call object for it.
    pub fn method(&self, channel_id: u32, method_name: &str) -> Result<C, Error> {
        let (service, method) = self.services.get_method(method_name)?;
        Ok(self.sink.method_client(channel_id, service.name(), method.name()))
    }

    pub fn send_request(&self, key: CallKey, request: &[u8], context: C) -> Result<(), SendError> {
        let channel = self
            .channel_by_id(key.channel_id)
            .ok_or_else(|| SendError::Transport(Error::not_found(format!("no channel {:#x}", key.channel_id))))?;
        self.calls.send_request(key, request, context, |bytes| channel.send(bytes))
    }

    pub fn send_client_stream(&self, key: CallKey, payload: &[u8]) -> Result<(), SendError> {
        let channel = self
            .channel_by_id(key.channel_id)
            .ok_or_else(|| SendError::Transport(Error::not_found(format!("no channel {:#x}", key.channel_id))))?;
        self.calls.send_client_stream(key, payload, |bytes| channel.send(bytes))
    }

    pub fn send_client_stream_end(&self, key: CallKey) -> Result<(), SendError> {
        let channel = self
            .channel_by_id(key.channel_id)
            .ok_or_else(|| SendError::Transport(Error::not_found(format!("no channel {:#x}", key.channel_id))))?;
        self.calls.send_client_stream_end(key, |bytes| channel.send(bytes))
    }

    pub fn send_cancel(&self, key: CallKey) -> Result<bool, Error> {
        let channel = self
            .channel_by_id(key.channel_id)
            .ok_or_else(|| Error::not_found(format!("no channel {:#x}", key.channel_id)))?;
        self.calls.send_cancel(key, |bytes| channel.send(bytes))
    }

    /// Never sends a `CLIENT_ERROR` in response to a `SERVER_ERROR` (would
    /// loop with a misbehaving peer echoing errors back at us).
    fn send_client_error(&self, channel: &Channel, inbound: &wire::Packet, status: Status) {
        if inbound.ty == PacketType::ServerError {
            return;
        }

        let bytes = wire::encode_client_error(inbound, status);
        if let Err(err) = channel.send(&bytes) {
            tracing::warn!(error = %err, channel_id = channel.id(), "failed to send synthesized client error");
        }
    }

    /// The inbound decision sequence. Never blocks beyond whatever
    /// the channel's output sink does.
    pub fn process_packet(&self, bytes: &[u8]) -> Status {
        let mut packet = match wire::decode(bytes) {
            Ok(packet) => packet,
            Err(err) => {
                tracing::warn!(error = %err, "failed to decode inbound packet");
                return Status::DataLoss;
            }
        };

        if wire::for_server(&packet) {
            tracing::warn!(ty = ?packet.ty, key = %packet.key, "dropping misrouted server-bound packet");
            return Status::InvalidArgument;
        }

        let Some(channel) = self.channel_by_id(packet.key.channel_id) else {
            tracing::warn!(channel_id = packet.key.channel_id, "dropping packet for unconfigured channel");
            return Status::NotFound;
        };

        let method = match self.services.lookup(packet.key.service_id, packet.key.method_id) {
            Ok(method) => method,
            Err(_) => {
                self.send_client_error(channel, &packet, Status::NotFound);
                return Status::Ok;
            }
        };

        self.apply_backward_compat_rewrite(&mut packet, method);

        if !matches!(packet.ty, PacketType::Response | PacketType::ServerStream | PacketType::ServerError) {
            tracing::warn!(ty = ?packet.ty, key = %packet.key, "ignoring unexpected packet type");
            return Status::Ok;
        }

        let mut status = (packet.ty != PacketType::ServerStream).then(|| Status::from(packet.status));

        let expectation = if method.ty().has_server_stream() {
            PayloadExpectation::AbsentOnResponse
        } else {
            PayloadExpectation::Present
        };

        let payload = match wire::decode_payload(&packet, expectation, |bytes| method.response_schema().validate(bytes)) {
            Ok(payload) => payload,
            Err(_) => {
                self.send_client_error(channel, &packet, Status::DataLoss);
                packet.ty = PacketType::ServerError;
                status = Some(Status::DataLoss);
                None
            }
        };

        if packet.ty != PacketType::ServerError {
            if let Some(hook) = &self.pre_dispatch {
                hook(packet.key, payload.as_ref(), status);
            }
        }

        let completing = status.is_some();
        let context = match self.calls.lookup(packet.key, completing) {
            Some(context) => context,
            None => {
                self.send_client_error(channel, &packet, Status::FailedPrecondition);
                return Status::Ok;
            }
        };

        if packet.ty == PacketType::ServerError {
            let status = status.expect("a SERVER_ERROR packet always carries a status");
            self.sink.handle_error(packet.key, &context, status);
        } else {
            if let Some(payload) = payload {
                self.sink.handle_response(packet.key, &context, payload);
            }
            if let Some(status) = status {
                self.sink.handle_completion(packet.key, &context, status);
            }
        }

        Status::Ok
    }

    /// Older peers encode a server-stream item as a `RESPONSE` with a
    /// non-empty payload; treat it as `SERVER_STREAM` so the
    /// call doesn't get completed prematurely.
    fn apply_backward_compat_rewrite(&self, packet: &mut wire::Packet, method: &Method) {
        if method.ty().has_server_stream() && packet.ty == PacketType::Response && !packet.payload.is_empty() {
            packet.ty = PacketType::ServerStream;
        }
    }
}

/// A view onto one of the client's channels, scoping method resolution to
/// it. The exact shape of a resolved method client is up to the upcall
/// sink's `method_client` factory — this view only threads the
/// channel id through.
pub struct ChannelView<'a, C, S: UpcallSink<C>> {
    client: &'a Client<C, S>,
    channel_id: u32,
}

impl<'a, C: Clone, S: UpcallSink<C>> ChannelView<'a, C, S> {
    pub fn id(&self) -> u32 {
        self.channel_id
    }

    pub fn method(&self, method_name: &str) -> Result<C, Error> {
        self.client.method(self.channel_id, method_name)
    }
}
