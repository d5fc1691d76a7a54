use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use super::SkipReason;

/// Run bookkeeping shared by every caller of one aggregator: how many runs are
/// in flight and when the last computed run finished.
#[derive(Debug, Default)]
pub struct AggregationState {
    in_flight: AtomicUsize,
    last_completed: Mutex<Option<Instant>>,
}

impl AggregationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn last_completed(&self) -> Option<Instant> {
        *self
            .last_completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a run slot. Unforced runs are refused while another run is in
    /// flight or while the previous computed run is younger than `throttle`.
    pub(crate) fn try_begin(
        &self,
        force: bool,
        throttle: Duration,
    ) -> Result<RunGuard<'_>, SkipReason> {
        if force {
            self.in_flight.fetch_add(1, Ordering::AcqRel);
            return Ok(RunGuard { state: self });
        }

        self.in_flight
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SkipReason::InFlight)?;
        let guard = RunGuard { state: self };

        if let Some(last) = self.last_completed() {
            if last.elapsed() < throttle {
                return Err(SkipReason::Throttled);
            }
        }
        Ok(guard)
    }

    pub(crate) fn mark_completed(&self) {
        *self
            .last_completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }
}

/// Holds one in-flight slot; dropping it releases the slot on every exit path.
#[derive(Debug)]
pub(crate) struct RunGuard<'a> {
    state: &'a AggregationState,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
