use std::{
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
    time::Duration,
};
use tokio::time::{sleep, Instant};

/// Monotonic one-shot flag: UNSET until `set`, SET forever after. One writer
/// (the event classifier), one reader (the bounded waiter); no further
/// synchronization is needed for that pairing.
#[derive(Debug, Default)]
pub struct Latch(AtomicBool);

impl Latch {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Poll the latch until it is observed SET or `timeout` elapses on the
    /// monotonic clock. Returns true iff SET was observed before the
    /// deadline; never blocks longer than `timeout` plus one poll interval.
    pub async fn wait_for(&self, timeout: Duration, poll_interval: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_set() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(poll_interval).await;
        }
    }
}

/// Terminal result of one command issuance, as reported by the RTU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// RTU confirmed the activation
    Confirmed,
    /// RTU rejected the addressed object (unknown IOA)
    Rejected,
}

const OUTCOME_UNSET: u8 = 0;
const OUTCOME_CONFIRMED: u8 = 1;
const OUTCOME_REJECTED: u8 = 2;

/// Write-once cell holding the command outcome. The first `set` wins; the
/// cell is never re-armed within a run.
#[derive(Debug, Default)]
pub struct OutcomeCell(AtomicU8);

impl OutcomeCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(OUTCOME_UNSET))
    }

    /// Record an outcome. Returns false when an outcome was already recorded
    /// (the earlier one stands).
    pub fn set(&self, outcome: CommandOutcome) -> bool {
        let value = match outcome {
            CommandOutcome::Confirmed => OUTCOME_CONFIRMED,
            CommandOutcome::Rejected => OUTCOME_REJECTED,
        };
        self.0
            .compare_exchange(OUTCOME_UNSET, value, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn get(&self) -> Option<CommandOutcome> {
        match self.0.load(Ordering::Acquire) {
            OUTCOME_CONFIRMED => Some(CommandOutcome::Confirmed),
            OUTCOME_REJECTED => Some(CommandOutcome::Rejected),
            _ => None,
        }
    }

    /// Bounded wait with the same contract as [`Latch::wait_for`], yielding
    /// the recorded outcome instead of a flag.
    pub async fn wait_for(
        &self,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Option<CommandOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(outcome) = self.get() {
                return Some(outcome);
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(poll_interval).await;
        }
    }
}
