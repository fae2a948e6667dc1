//! Proctoring Live Monitor Library
//!
//! This library lets an observer supervise many simultaneously-testing
//! participants in real time:
//!
//! - Peer-to-peer video negotiation per (observer, participant) pair
//! - Still-frame fallback relay with presence tracking
//! - Out-of-band warnings pushed to individual participants
//! - A live roster reconciled from independently-updated stores
//! - Session lifecycle derived from the clock, never cached
//!
//! Everything runs on top of a generic publish/subscribe channel
//! (`common::transport::ChannelTransport`) and read-mostly stores
//! (`common::stores`). Media itself is delegated to a `PeerEndpoint`.
//!
//! # Architecture
//!
//! ```text
//! MonitorControllerActor (singleton per monitor instance)
//! └── MonitoringViewActor (one per observed session)
//!     ├── ReconcilerActor
//!     ├── FrameRelayActor
//!     └── PeerLinkActor (one per observer/participant pair)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Actor hierarchy and the public controller handle
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-safe error codes
//! - [`lifecycle`] - Effective session status
//! - [`observability`] - Tracing, metrics and health endpoints
//! - [`peer_endpoint`] - Media endpoint seam for peer links
//! - [`roster`] - Roster merge and aggregation
//! - [`warning`] - Warning dispatcher

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod actors;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod observability;
pub mod peer_endpoint;
pub mod roster;
pub mod warning;

pub use actors::{
    Collaborators, MonitorControllerActorHandle, MonitoringViewHandle, PeerState,
    PeerStateStream, SnapshotStream,
};
pub use config::MonitorConfig;
pub use errors::{MonitorError, NegotiationError};
