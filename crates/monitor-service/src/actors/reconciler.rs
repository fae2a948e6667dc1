//! `ReconcilerActor` - periodic roster reconciliation for one view.
//!
//! Each cycle reads the session, joined records and attempts concurrently,
//! then the expected roster of the session's cohort, merges them over the
//! last-known-good values and publishes a `RosterSnapshot` on a watch
//! channel. A failing source never blocks the cycle; it is served from
//! cache and the snapshot is marked partial.

use super::frame_relay::FrameRelayHandle;
use super::messages::ReconcilerMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::errors::MonitorError;
use crate::lifecycle::effective_status;
use crate::observability::metrics;
use crate::roster::{aggregate, apply_presence, RosterSnapshot, RosterSources};
use chrono::Utc;
use common::error::StoreError;
use common::stores::{AttemptStore, RosterStore, SessionStore};
use common::types::SessionId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const RECONCILER_CHANNEL_BUFFER: usize = 32;

/// Store collaborators the reconciler reads from.
#[derive(Clone)]
pub struct RosterStores {
    pub rosters: Arc<dyn RosterStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub attempts: Arc<dyn AttemptStore>,
}

/// Stream of roster snapshots for one view.
///
/// A new stream yields the latest snapshot first (once one exists), then
/// every later cycle. Slow readers skip to the newest snapshot. The stream
/// ends when the view closes.
#[derive(Debug)]
pub struct SnapshotStream {
    receiver: watch::Receiver<Option<Arc<RosterSnapshot>>>,
}

impl SnapshotStream {
    fn new(mut receiver: watch::Receiver<Option<Arc<RosterSnapshot>>>) -> Self {
        receiver.mark_changed();
        Self { receiver }
    }

    /// Wait for the next snapshot.
    pub async fn next(&mut self) -> Option<Arc<RosterSnapshot>> {
        loop {
            if self.receiver.changed().await.is_err() {
                return None;
            }
            if let Some(snapshot) = self.receiver.borrow_and_update().clone() {
                return Some(snapshot);
            }
        }
    }

    /// Latest snapshot without waiting.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<RosterSnapshot>> {
        self.receiver.borrow().clone()
    }
}

/// Handle to a `ReconcilerActor`.
#[derive(Debug, Clone)]
pub struct ReconcilerHandle {
    sender: mpsc::Sender<ReconcilerMessage>,
    snapshots: watch::Receiver<Option<Arc<RosterSnapshot>>>,
    cancel_token: CancellationToken,
}

impl ReconcilerHandle {
    #[must_use]
    pub fn snapshots(&self) -> SnapshotStream {
        SnapshotStream::new(self.snapshots.clone())
    }

    #[must_use]
    pub fn latest(&self) -> Option<Arc<RosterSnapshot>> {
        self.snapshots.borrow().clone()
    }

    /// Run a cycle now and wait for it. Returns the cycle number.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Internal` if the reconciler has exited.
    pub async fn refresh(&self) -> Result<u64, MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ReconcilerMessage::Refresh {
                respond_to: Some(tx),
            })
            .await
            .map_err(|e| MonitorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MonitorError::Internal(format!("response receive failed: {e}")))
    }

    /// Queue a cycle without waiting. Dropped if one is already queued
    /// behind a full mailbox.
    pub fn request_refresh(&self) {
        if let Err(e) = self
            .sender
            .try_send(ReconcilerMessage::Refresh { respond_to: None })
        {
            debug!(
                target: "monitor.task.reconciler",
                error = %e,
                "Refresh request not queued"
            );
        }
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// The `ReconcilerActor` implementation.
pub struct ReconcilerActor {
    session_id: SessionId,
    receiver: mpsc::Receiver<ReconcilerMessage>,
    cancel_token: CancellationToken,
    stores: RosterStores,
    relay: Option<FrameRelayHandle>,
    poll_interval: Duration,
    sources: RosterSources,
    cycle: u64,
    snapshot_tx: watch::Sender<Option<Arc<RosterSnapshot>>>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl ReconcilerActor {
    /// Spawn a reconciler. The first cycle runs immediately.
    ///
    /// `relay` supplies frame presence; without one every entry reports
    /// `Presence::Unknown`.
    pub fn spawn(
        session_id: SessionId,
        stores: RosterStores,
        relay: Option<FrameRelayHandle>,
        poll_interval: Duration,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ReconcilerHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(RECONCILER_CHANNEL_BUFFER);
        let (snapshot_tx, snapshots) = watch::channel(None);

        let actor = Self {
            session_id,
            receiver,
            cancel_token: cancel_token.clone(),
            stores,
            relay,
            poll_interval,
            sources: RosterSources::default(),
            cycle: 0,
            snapshot_tx,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Reconciler, session_id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        (
            ReconcilerHandle {
                sender,
                snapshots,
                cancel_token,
            },
            task_handle,
        )
    }

    #[instrument(skip_all, name = "monitor.task.reconciler", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        info!(
            target: "monitor.task.reconciler",
            session_id = %self.session_id,
            poll_interval_ms = self.poll_interval.as_millis(),
            "ReconcilerActor started"
        );

        let cancel_token = self.cancel_token.clone();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let (from_mailbox, respond_to) = tokio::select! {
                () = cancel_token.cancelled() => break,

                _ = ticker.tick() => (false, None),

                msg = self.receiver.recv() => {
                    match msg {
                        Some(ReconcilerMessage::Refresh { respond_to }) => {
                            self.mailbox.record_enqueue();
                            (true, respond_to)
                        }
                        None => break,
                    }
                }
            };

            // A store read may hang; cancellation still wins.
            let cycle = tokio::select! {
                () = cancel_token.cancelled() => break,
                cycle = self.run_cycle() => cycle,
            };

            if let Some(respond_to) = respond_to {
                let _ = respond_to.send(cycle);
            }
            if from_mailbox {
                self.mailbox.record_dequeue();
                self.metrics.record_message_processed();
            }
        }

        info!(
            target: "monitor.task.reconciler",
            session_id = %self.session_id,
            cycles = self.cycle,
            messages_processed = self.mailbox.messages_processed(),
            "ReconcilerActor stopped"
        );
    }

    /// Run one reconciliation cycle and publish its snapshot.
    async fn run_cycle(&mut self) -> u64 {
        let started = Instant::now();
        let session_id = self.session_id;

        let (session, joined, attempts) = tokio::join!(
            self.stores.sessions.get_session(session_id),
            self.stores.attempts.list_joined_participants(session_id),
            self.stores.attempts.list_attempts(session_id),
        );
        let failures = [
            ("session", self.sources.session.update(session)),
            ("joined", self.sources.joined.update(joined)),
            ("attempts", self.sources.attempts.update(attempts)),
        ];
        for (source, error) in failures {
            self.log_failure(source, error);
        }

        match self.sources.session.value().map(|s| s.cohort_id) {
            Some(cohort_id) => {
                let roster = self.stores.rosters.list_expected_participants(cohort_id).await;
                let error = self.sources.roster.update(roster);
                self.log_failure("roster", error);
            }
            None => {
                // No cohort known yet, the expected roster cannot be read
                self.sources.roster.mark_stale();
            }
        }

        let mut entries = self.sources.merge();
        if let Some(relay) = &self.relay {
            match relay.presence().await {
                Ok(presence) => apply_presence(&mut entries, &presence),
                Err(e) => {
                    debug!(
                        target: "monitor.task.reconciler",
                        session_id = %self.session_id,
                        error = %e,
                        "Frame presence unavailable for this cycle"
                    );
                }
            }
        }

        let now = Utc::now();
        let stale = self.sources.staleness();
        let aggregates = aggregate(&entries);
        self.cycle += 1;

        let snapshot = RosterSnapshot {
            session_id,
            cycle: self.cycle,
            generated_at: now,
            session_status: self
                .sources
                .session
                .value()
                .map(|session| effective_status(session, now)),
            entries,
            aggregates,
            stale,
            partial: stale.any(),
        };

        debug!(
            target: "monitor.task.reconciler",
            session_id = %self.session_id,
            cycle = snapshot.cycle,
            total = snapshot.aggregates.total,
            joined = snapshot.aggregates.joined,
            partial = snapshot.partial,
            "Roster reconciled"
        );

        self.snapshot_tx.send_replace(Some(Arc::new(snapshot)));
        metrics::record_reconcile(started.elapsed(), stale.any());
        self.cycle
    }

    fn log_failure(&self, source: &'static str, error: Option<StoreError>) {
        if let Some(e) = error {
            warn!(
                target: "monitor.task.reconciler",
                session_id = %self.session_id,
                source,
                error = %e,
                "Source read failed, serving last known value"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::roster::{RosterAggregates, SourceStaleness};

    fn snapshot(cycle: u64) -> Arc<RosterSnapshot> {
        Arc::new(RosterSnapshot {
            session_id: SessionId::new(),
            cycle,
            generated_at: Utc::now(),
            session_status: None,
            entries: Vec::new(),
            aggregates: RosterAggregates::default(),
            stale: SourceStaleness::default(),
            partial: false,
        })
    }

    #[tokio::test]
    async fn test_stream_starts_at_latest_snapshot() {
        let (tx, rx) = watch::channel(None);
        tx.send_replace(Some(snapshot(1)));
        tx.send_replace(Some(snapshot(2)));

        let mut stream = SnapshotStream::new(rx);
        assert_eq!(stream.next().await.unwrap().cycle, 2);

        tx.send_replace(Some(snapshot(3)));
        assert_eq!(stream.next().await.unwrap().cycle, 3);
    }

    #[tokio::test]
    async fn test_stream_skips_empty_and_ends_on_close() {
        let (tx, rx) = watch::channel(None);
        let mut stream = SnapshotStream::new(rx);
        assert!(stream.latest().is_none());

        tx.send_replace(Some(snapshot(1)));
        assert_eq!(stream.next().await.unwrap().cycle, 1);

        drop(tx);
        assert!(stream.next().await.is_none());
    }
}
