//! Actor hierarchy of the monitor.
//!
//! ```text
//! MonitorControllerActor (singleton per monitor instance)
//! └── supervises N MonitoringViewActors
//!     └── MonitoringViewActor (one per observed session)
//!         ├── ReconcilerActor (roster snapshots every poll interval)
//!         ├── FrameRelayActor (latest frame + presence per participant)
//!         └── supervises N PeerLinkActors
//!             └── PeerLinkActor (one per observer/participant pair)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One task per pair**: no state is shared between signaling pairs
//! - **CancellationToken propagation**: parents hand children child tokens
//! - **Watch channels for streams**: snapshot and peer state streams always
//!   see the latest value; slow readers skip intermediate ones
//! - **Mailbox monitoring**: depth thresholds per actor type
//!
//! # Modules
//!
//! - [`controller`] - `MonitorControllerActor`, the public entry point
//! - [`view`] - `MonitoringViewActor` per open session view
//! - [`peer`] - `PeerLinkActor` per signaling pair
//! - [`signaling`] - pure negotiation state machine used by peer links
//! - [`frame_relay`] - `FrameRelayActor` per view
//! - [`reconciler`] - `ReconcilerActor` per view
//! - [`messages`] - message types for actor communication
//! - [`metrics`] - mailbox monitoring and actor metrics

pub mod controller;
pub mod frame_relay;
pub mod messages;
pub mod metrics;
pub mod peer;
pub mod reconciler;
pub mod signaling;
pub mod view;

pub use controller::{Collaborators, MonitorControllerActor, MonitorControllerActorHandle};
pub use frame_relay::{FrameRelayActor, FrameRelayHandle, RelaySettings};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use peer::{PeerLinkActor, PeerLinkContext, PeerLinkHandle, PeerLinkTimings, PeerStateStream};
pub use reconciler::{ReconcilerActor, ReconcilerHandle, RosterStores, SnapshotStream};
pub use signaling::{PeerState, SignalingMachine};
pub use view::{MonitoringViewActor, MonitoringViewHandle, ViewContext};
