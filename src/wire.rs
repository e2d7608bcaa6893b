//! Wire codec: encoding of outgoing frames and decoding of inbound ones.
//!
//! The on-the-wire envelope is a small `prost`-generated message
//! (`generated::RpcPacket`); this module's [`Packet`] is the decoded,
//! application-facing view of it. The payload is always treated as an
//! opaque byte string — validating it against a concrete schema is the
//! embedder's job (see [`crate::descriptor::Schema`]), not this codec's.

use bytes::Bytes;
use prost::Message;

use crate::key::CallKey;
use crate::status::{Error, Status};

mod generated {
    include!(concat!(env!("OUT_DIR"), "/pwrpc.core.rs"));
}

pub use generated::PacketType;
use generated::RpcPacket;

/// A single decoded RPC packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub ty: PacketType,
    pub key: CallKey,
    pub payload: Bytes,
    /// Wire status word. Only meaningful when `ty` is not `SERVER_STREAM`;
    /// interpreting it is the dispatcher's job, not the codec's.
    pub status: u32,
}

impl Packet {
    fn to_wire(&self) -> RpcPacket {
        RpcPacket {
            r#type: self.ty as i32,
            channel_id: self.key.channel_id,
            service_id: self.key.service_id,
            method_id: self.key.method_id,
            call_id: self.key.call_id,
            payload: self.payload.to_vec(),
            status: self.status,
        }
    }

    fn from_wire(raw: RpcPacket) -> Result<Self, Error> {
        let ty = PacketType::try_from(raw.r#type)
            .map_err(|_| Error::data_loss(format!("unknown packet type {}", raw.r#type)))?;

        Ok(Packet {
            ty,
            // service_id/method_id are interpreted as unsigned even if some
            // future binding surfaces them as signed.
            key: CallKey::new(raw.channel_id, raw.service_id, raw.method_id, raw.call_id),
            payload: Bytes::from(raw.payload),
            status: raw.status,
        })
    }
}

/// Packet types sent by a client to a server. Anything else arriving at
/// `process_packet` is misrouted.
pub fn for_server(packet: &Packet) -> bool {
    matches!(
        packet.ty,
        PacketType::Request
            | PacketType::ClientStream
            | PacketType::ClientStreamEnd
            | PacketType::Cancel
            | PacketType::ClientError
    )
}

pub fn decode(bytes: &[u8]) -> Result<Packet, Error> {
    let raw = RpcPacket::decode(bytes)?;
    Packet::from_wire(raw)
}

fn encode(packet: &Packet) -> Vec<u8> {
    packet.to_wire().encode_to_vec()
}

pub fn encode_request(key: CallKey, payload: &[u8]) -> Vec<u8> {
    encode(&Packet {
        ty: PacketType::Request,
        key,
        payload: Bytes::copy_from_slice(payload),
        status: Status::Ok.into(),
    })
}

pub fn encode_cancel(key: CallKey) -> Vec<u8> {
    encode(&Packet {
        ty: PacketType::Cancel,
        key,
        payload: Bytes::new(),
        status: Status::Ok.into(),
    })
}

pub fn encode_client_stream(key: CallKey, payload: &[u8]) -> Vec<u8> {
    encode(&Packet {
        ty: PacketType::ClientStream,
        key,
        payload: Bytes::copy_from_slice(payload),
        status: Status::Ok.into(),
    })
}

pub fn encode_client_stream_end(key: CallKey) -> Vec<u8> {
    encode(&Packet {
        ty: PacketType::ClientStreamEnd,
        key,
        payload: Bytes::new(),
        status: Status::Ok.into(),
    })
}

/// Builds a `CLIENT_ERROR` reply to `inbound`. Never called for a packet
/// that was itself a `SERVER_ERROR` — that's the dispatcher's job to avoid,
/// not this function's.
pub fn encode_client_error(inbound: &Packet, status: Status) -> Vec<u8> {
    encode(&Packet {
        ty: PacketType::ClientError,
        key: inbound.key,
        payload: Bytes::new(),
        status: status.into(),
    })
}

/// Method "streaming-ness" needed to decide whether a `RESPONSE` packet is
/// expected to carry a payload. Kept minimal here; the full method
/// descriptor lives in [`crate::descriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadExpectation {
    /// The response is expected to carry a payload (unary, client-streaming
    /// unary-terminated calls).
    Present,
    /// `RESPONSE` carries no payload for server-streaming methods; the
    /// stream items arrive as separate `SERVER_STREAM` packets.
    AbsentOnResponse,
}

/// Attempts to extract the payload of an inbound packet, applying the two
/// "no payload expected" carve-outs: `SERVER_ERROR` packets never carry a
/// payload, and a server-streaming method's terminal `RESPONSE` packet
/// doesn't either. Schema validation of a present payload is delegated to
/// `validate`.
pub fn decode_payload(
    packet: &Packet,
    expectation: PayloadExpectation,
    validate: impl FnOnce(&[u8]) -> Result<(), Error>,
) -> Result<Option<Bytes>, Error> {
    if packet.ty == PacketType::ServerError {
        return Ok(None);
    }

    if packet.ty == PacketType::Response && expectation == PayloadExpectation::AbsentOnResponse {
        return Ok(None);
    }

    validate(&packet.payload)?;
    Ok(Some(packet.payload.clone()))
}

/// Encodes an arbitrary `Packet`, including combinations the public encode
/// functions never produce (e.g. a `RESPONSE` with a mutated status) — used
/// by other modules' tests to build synthetic inbound frames.
#[cfg(test)]
pub(crate) fn test_encode(packet: &Packet) -> Vec<u8> {
    encode(packet)
}

#[cfg(test)]
mod test {
    use super::*;

    fn key() -> CallKey {
        CallKey::new(1, 0xAAAA, 0xBB, 42)
    }

    #[test]
    fn request_round_trips() {
        let bytes = encode_request(key(), b"hello");
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.ty, PacketType::Request);
        assert_eq!(decoded.key, key());
        assert_eq!(&decoded.payload[..], b"hello");
    }

    #[test]
    fn cancel_round_trips_with_empty_payload() {
        let bytes = encode_cancel(key());
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.ty, PacketType::Cancel);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn client_error_never_targets_a_server_error() {
        let inbound = Packet {
            ty: PacketType::ServerError,
            key: key(),
            payload: Bytes::new(),
            status: Status::Internal.into(),
        };

        // encode_client_error itself will happily build the bytes; it is the
        // dispatcher's responsibility not to call it for SERVER_ERROR
        // packets. Exercise that the bytes it *would* build still decode
        // correctly, since other callers may reuse this helper.
        let bytes = encode_client_error(&inbound, Status::FailedPrecondition);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.ty, PacketType::ClientError);
        assert_eq!(decoded.status, u32::from(Status::FailedPrecondition));
    }

    #[test]
    fn for_server_classifies_client_bound_types() {
        for ty in [
            PacketType::Request,
            PacketType::ClientStream,
            PacketType::ClientStreamEnd,
            PacketType::Cancel,
            PacketType::ClientError,
        ] {
            let packet = Packet {
                ty,
                key: key(),
                payload: Bytes::new(),
                status: 0,
            };
            assert!(for_server(&packet), "{ty:?} should be server-bound");
        }

        for ty in [
            PacketType::Response,
            PacketType::ServerStream,
            PacketType::ServerError,
        ] {
            let packet = Packet {
                ty,
                key: key(),
                payload: Bytes::new(),
                status: 0,
            };
            assert!(!for_server(&packet), "{ty:?} should not be server-bound");
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode(&[0xff, 0xff, 0xff]).unwrap_err();
        assert_eq!(err.code(), Status::DataLoss);
    }

    #[test]
    fn server_error_never_yields_a_payload() {
        let packet = Packet {
            ty: PacketType::ServerError,
            key: key(),
            payload: Bytes::from_static(b"ignored"),
            status: Status::Internal.into(),
        };

        let payload =
            decode_payload(&packet, PayloadExpectation::Present, |_| Ok(())).unwrap();
        assert!(payload.is_none());
    }

    #[test]
    fn server_streaming_response_yields_no_payload() {
        let packet = Packet {
            ty: PacketType::Response,
            key: key(),
            payload: Bytes::from_static(b"ignored"),
            status: Status::Ok.into(),
        };

        let payload = decode_payload(&packet, PayloadExpectation::AbsentOnResponse, |_| Ok(()))
            .unwrap();
        assert!(payload.is_none());
    }

    #[test]
    fn schema_mismatch_surfaces_as_data_loss() {
        let packet = Packet {
            ty: PacketType::Response,
            key: key(),
            payload: Bytes::from_static(b"bad"),
            status: Status::Ok.into(),
        };

        let err = decode_payload(&packet, PayloadExpectation::Present, |_| {
            Err(Error::data_loss("schema mismatch"))
        })
        .unwrap_err();
        assert_eq!(err.code(), Status::DataLoss);
    }
}
