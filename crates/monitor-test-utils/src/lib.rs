//! # Monitor Test Utilities
//!
//! Shared test utilities for the proctoring live monitor.
//!
//! This crate provides in-memory collaborators and fixtures so the monitor
//! can be exercised end to end without a broker, a database or a media
//! stack.
//!
//! ## Modules
//!
//! - `mock_transport` - In-memory `ChannelTransport` with failure injection
//! - `mock_stores` - In-memory roster, session and attempt stores
//! - `mock_endpoint` - Scripted `PeerEndpoint` and factory
//! - `fixtures` - Builders, wire payloads and a short-timing config
//!
//! ## Usage
//!
//! ```rust,ignore
//! use monitor_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let session = TestSession::new().build();
//!     let alice = TestParticipant::new("Alice").cohort(session.cohort_id).build();
//!
//!     let monitor = TestMonitor::start(
//!         MockStores::new().with_session(session.clone()).with_participant(alice),
//!     );
//!     let mut snapshots = monitor.handle.open_monitoring_view(session.session_id).await.unwrap();
//!     let snapshot = snapshots.next().await.unwrap();
//!     assert_eq!(snapshot.aggregates.total, 1);
//! }
//! ```

pub mod fixtures;
pub mod mock_endpoint;
pub mod mock_stores;
pub mod mock_transport;

pub use fixtures::*;
pub use mock_endpoint::*;
pub use mock_stores::*;
pub use mock_transport::*;
