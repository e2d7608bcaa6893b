//! Host-side client core for a lightweight binary RPC protocol multiplexed
//! over logical channels: wire codec, service/method descriptors, the
//! pending-call registry, and the inbound packet dispatcher.
//!
//! This crate is the core only — the per-call user-facing API (blocking vs.
//! callback-based facades), schema loading from a compiled descriptor set,
//! and transport implementations are all left to the embedder via
//! [`sink::UpcallSink`] and [`client::Channel`].

pub mod client;
pub mod descriptor;
pub mod id;
pub mod key;
pub mod registry;
pub mod sink;
pub mod status;
pub mod wire;

pub use client::{Channel, ChannelView, Client};
pub use key::CallKey;
pub use sink::UpcallSink;
pub use status::{Error, Status};
