//! The upcall contract through which the core hands response payloads,
//! terminal status, and error status back to the embedder.

use bytes::Bytes;

use crate::key::CallKey;
use crate::status::Status;

/// Implemented by the embedder, called by [`crate::client::Client`] as it
/// dispatches inbound packets.
///
/// `C` is the same opaque per-call context type the pending-call registry
/// stores (see [`crate::registry::PendingCalls`]).
pub trait UpcallSink<C> {
    /// Factory for the user-facing call object returned from
    /// `Client::method`/`ChannelView::method`. Its shape is entirely up to
    /// the embedder; the core never inspects it.
    fn method_client(
        &self,
        channel_id: u32,
        service_name: &str,
        method_name: &str,
    ) -> C;

    /// A response payload arrived for `key`. Fired for a unary/streaming
    /// `RESPONSE` with a non-empty payload and for every `SERVER_STREAM`
    /// item.
    fn handle_response(&self, key: CallKey, context: &C, payload: Bytes);

    /// `key` completed successfully (or with a non-`OK` status folded into
    /// the terminal packet, as opposed to a dedicated `SERVER_ERROR`). Fired
    /// after `handle_response` for the same packet, if both apply.
    fn handle_completion(&self, key: CallKey, context: &C, status: Status);

    /// `key` failed: either the peer sent a `SERVER_ERROR`, or the core
    /// synthesized one (unmatched inbound, payload decode failure).
    fn handle_error(&self, key: CallKey, context: &C, status: Status);
}
