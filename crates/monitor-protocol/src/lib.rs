//! Wire protocol for the proctoring monitor.
//!
//! This crate defines the contract between the monitor and participant
//! clients: how topics are named, which events travel on them, and the
//! tagged JSON payloads each event carries. The channel transport treats
//! every payload as opaque bytes.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod message;
pub mod topic;

pub use codec::{CodecError, FrameLimits};
pub use message::{
    CloseReason, FrameImage, FrameMessage, IceCandidate, LinkRequest, Severity, SignalMessage,
    WarningMessage, WireMessage,
};
pub use topic::{Event, Topic};
