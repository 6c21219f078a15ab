use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::detect::{DetectionResult, DetectionSlot};

/// Per-session flags and the latest-detection slot.
///
/// One instance is created per started session and shared by reference
/// between the coordinator, the detection cadence and the render cadence.
/// A detection call that outlives its session keeps the old instance alive,
/// sees ActiveFlag cleared, and discards its result.
#[derive(Debug, Default)]
pub struct SharedState {
    active: AtomicBool,
    in_flight: AtomicBool,
    slot: DetectionSlot,
    stats: SessionStats,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// ActiveFlag: "the session should keep producing renders".
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    /// Clear ActiveFlag. Returns true if it was set.
    pub(crate) fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Claim InFlightFlag. `None` if a detection call is already outstanding.
    ///
    /// The claim is a single compare-and-swap, taken before any blocking work.
    pub fn claim_in_flight(self: &Arc<Self>) -> Option<InFlightGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlightGuard {
                state: Arc::clone(self),
            })
    }

    pub fn slot(&self) -> &DetectionSlot {
        &self.slot
    }

    pub fn latest_detection(&self) -> Option<DetectionResult> {
        self.slot.latest()
    }

    pub(crate) fn clear_detection(&self) {
        self.slot.clear();
    }

    /// Overwrite the slot if the session is still active. `None` clears it.
    pub(crate) fn publish(&self, value: Option<DetectionResult>) -> bool {
        self.slot.publish_if(|| self.is_active(), value)
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}

/// Holds InFlightFlag; releasing it on drop covers every exit path.
#[derive(Debug)]
pub struct InFlightGuard {
    state: Arc<SharedState>,
}

impl InFlightGuard {
    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Counters for one session.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub(crate) requests: AtomicU64,
    pub(crate) detections: AtomicU64,
    pub(crate) empty_responses: AtomicU64,
    pub(crate) transient_faults: AtomicU64,
    pub(crate) encode_skips: AtomicU64,
    pub(crate) rejected_boxes: AtomicU64,
    pub(crate) renders: AtomicU64,
    pub(crate) captures: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub detections: u64,
    pub empty_responses: u64,
    pub transient_faults: u64,
    pub encode_skips: u64,
    pub rejected_boxes: u64,
    pub renders: u64,
    pub captures: u64,
}

impl SessionStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            empty_responses: self.empty_responses.load(Ordering::Relaxed),
            transient_faults: self.transient_faults.load(Ordering::Relaxed),
            encode_skips: self.encode_skips.load(Ordering::Relaxed),
            rejected_boxes: self.rejected_boxes.load(Ordering::Relaxed),
            renders: self.renders.load(Ordering::Relaxed),
            captures: self.captures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_claim_is_exclusive() {
        let state = Arc::new(SharedState::new());
        let guard = state.claim_in_flight().expect("first claim");
        assert!(state.is_in_flight());
        assert!(state.claim_in_flight().is_none());

        drop(guard);
        assert!(!state.is_in_flight());
        assert!(state.claim_in_flight().is_some());
    }

    #[test]
    fn guard_released_when_holder_panics() {
        let state = Arc::new(SharedState::new());
        let worker_state = Arc::clone(&state);
        let result = std::thread::spawn(move || {
            let _guard = worker_state.claim_in_flight().expect("claim");
            panic!("detector blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(!state.is_in_flight());
    }

    #[test]
    fn deactivate_reports_previous_state() {
        let state = SharedState::new();
        assert!(!state.deactivate());
        state.activate();
        assert!(state.deactivate());
        assert!(!state.is_active());
    }
}
