//! Per-controller poll loop.
//!
//! One loop per controller, cycling at a fixed 100 ms cadence measured
//! start-to-start. Each cycle reads every mapped field under a single
//! client lock, decodes them into a snapshot and publishes it; the
//! transition detector sees the snapshot inline, so it observes every
//! published snapshot in order.
//!
//! If any field read fails mid-cycle the whole cycle is discarded - no
//! partial snapshot is ever published - and the loop waits a longer
//! backoff before retrying. Cancellation is observed at the inter-cycle
//! wait, at the backoff wait and between field reads.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use fornax_core::registers::fields;
use fornax_core::{ControllerId, RegisterMap, Snapshot, SnapshotBuilder, TransitionDetector, TransitionEvent};

use crate::client::{read_field, ReadError, SharedClient};
use crate::events::EventBus;

pub const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);
pub const READ_BACKOFF: std::time::Duration = std::time::Duration::from_secs(1);

/// Latest-snapshot channel; `None` until the first successful cycle.
pub type SnapshotSender = watch::Sender<Option<Arc<Snapshot>>>;
pub type SnapshotReceiver = watch::Receiver<Option<Arc<Snapshot>>>;

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

pub struct PollLoop {
    controller: ControllerId,
    device_index: u16,
    map: Arc<RegisterMap>,
    client: SharedClient,
    publish: SnapshotSender,
    bus: EventBus,
    detector: TransitionDetector,
    seq: u64,
    generation: u64,
}

impl PollLoop {
    /// `resume` is the last snapshot a prior generation published, if
    /// any. A resumed loop continues its sequence numbering and carriage
    /// code, so a reconnect with the carriage still at the station does
    /// not refire the arrival edge.
    pub fn new(
        controller: ControllerId,
        device_index: u16,
        map: Arc<RegisterMap>,
        client: SharedClient,
        publish: SnapshotSender,
        bus: EventBus,
        resume: Option<&Snapshot>,
        generation: u64,
    ) -> Self {
        let detector = resume
            .and_then(|snapshot| {
                Some(TransitionDetector::primed(
                    snapshot.bool_value(fields::CARRIAGE_PRESENT)?,
                    snapshot.bool_value(fields::CARRIAGE_HAS_MATERIAL)?,
                ))
            })
            .unwrap_or_default();
        PollLoop {
            controller,
            device_index,
            map,
            client,
            publish,
            bus,
            detector,
            seq: resume.map(Snapshot::seq).unwrap_or(0),
            generation,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        log::debug!(
            "{}: poll loop generation {} started",
            self.controller,
            self.generation
        );
        let mut ticker = interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.cycle(&cancel).await {
                Ok(Some(snapshot)) => self.publish(snapshot),
                Ok(None) => break,
                Err(e) => {
                    log::warn!("{}: poll cycle discarded: {}", self.controller, e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(READ_BACKOFF) => {}
                    }
                    // Resynchronize the cadence after the backoff.
                    ticker.reset();
                }
            }
        }
        log::debug!(
            "{}: poll loop generation {} stopped",
            self.controller,
            self.generation
        );
    }

    /// Read every mapped field and build one snapshot. Returns `None`
    /// when cancelled mid-cycle.
    async fn cycle(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Arc<Snapshot>>, ReadError> {
        let mut io = self.client.lock().await;
        let mut builder = SnapshotBuilder::new(self.controller, self.seq + 1, now_ms());
        for field in self.map.fields() {
            let address = self.map.address(self.device_index, field);
            let value = tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                value = read_field(io.as_mut(), field.kind, address) => value?,
            };
            builder.insert(field.name, value);
        }
        drop(io);
        self.seq += 1;
        Ok(Some(Arc::new(builder.build())))
    }

    fn publish(&mut self, snapshot: Arc<Snapshot>) {
        log::trace!(
            "{}: snapshot seq {} with {} fields",
            self.controller,
            snapshot.seq(),
            snapshot.len()
        );

        // A superseded generation can race its final publish against the
        // replacement's first; never let the visible sequence regress.
        self.publish.send_if_modified(|current| match current {
            Some(prev) if prev.seq() >= snapshot.seq() => false,
            _ => {
                *current = Some(snapshot.clone());
                true
            }
        });

        let presence = snapshot.bool_value(fields::CARRIAGE_PRESENT);
        let material = snapshot.bool_value(fields::CARRIAGE_HAS_MATERIAL);
        if let (Some(presence), Some(material)) = (presence, material) {
            if let Some(kind) = self.detector.observe(presence, material) {
                self.bus.publish_transition(TransitionEvent {
                    controller: self.controller,
                    kind,
                    timestamp_ms: snapshot.timestamp_ms(),
                });
            }
        }
    }
}
