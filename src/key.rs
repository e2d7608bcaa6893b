//! The `(channel_id, service_id, method_id, call_id)` tuple that identifies
//! one pending call, shared by the wire codec, the descriptor registry, the
//! pending-call registry, and the dispatcher.

/// Call id reserved for calls opened by a legacy peer without ever being
/// requested by this client; treated as "unrequested" on arrival.
pub const LEGACY_OPEN_CALL_ID: u32 = 0;

/// Call id a client uses to open a call before the peer has assigned a
/// concrete id — used to receive unsolicited server streams.
pub const OPEN_CALL_ID: u32 = u32::MAX;

/// Call ids are encoded on the wire in 21 bits.
pub const MAX_CALL_ID: u32 = 1 << 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallKey {
    pub channel_id: u32,
    pub service_id: u32,
    pub method_id: u32,
    pub call_id: u32,
}

impl CallKey {
    pub fn new(channel_id: u32, service_id: u32, method_id: u32, call_id: u32) -> Self {
        Self {
            channel_id,
            service_id,
            method_id,
            call_id,
        }
    }

    /// Compares everything but `call_id` — the grouping used by the
    /// registry's wildcard and adoption matching.
    pub fn matches_channel_service_method(&self, other: &CallKey) -> bool {
        self.channel_id == other.channel_id
            && self.service_id == other.service_id
            && self.method_id == other.method_id
    }

    pub fn with_call_id(&self, call_id: u32) -> CallKey {
        CallKey { call_id, ..*self }
    }

    pub fn is_open_wildcard(&self) -> bool {
        matches!(self.call_id, OPEN_CALL_ID | LEGACY_OPEN_CALL_ID)
    }
}

impl std::fmt::Display for CallKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "channel={:#x} service={:#010x} method={:#010x} call={:#x}",
            self.channel_id, self.service_id, self.method_id, self.call_id
        )
    }
}
