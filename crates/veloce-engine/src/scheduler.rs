use std::time::Duration;

use tokio::time::Instant;
use veloce_types::{MutationEvent, Trigger};

/// What the worker should do after a mutation has been recorded.
#[derive(Debug, PartialEq)]
pub enum Decision {
    /// The timer was (re)armed; flush at `deadline` unless reset again.
    Armed { deadline: Instant, resets: u32 },
    /// The reset ceiling was hit: flush right away.
    FlushNow(Trigger),
    /// Auto-save is off; the mutation is pending until an explicit save.
    Deferred,
}

/// Pending-save state of one database.
///
/// A mutation arriving while no timer is armed arms it. A mutation arriving
/// while the timer is armed is a reset: it re-arms the timer and counts
/// towards `max_resets`. Once `max_resets` resets have happened, the next
/// mutation forces a flush instead of resetting again, so a continuous
/// stream of mutations still gets persisted periodically.
#[derive(Debug)]
pub struct DebounceState {
    timeout: Duration,
    max_resets: u32,
    auto_save: bool,
    deadline: Option<Instant>,
    reset_count: u32,
    pending: Option<Trigger>,
}

impl DebounceState {
    pub fn new(timeout: Duration, max_resets: u32, auto_save: bool) -> Self {
        Self {
            timeout,
            max_resets,
            auto_save,
            deadline: None,
            reset_count: 0,
            pending: None,
        }
    }

    /// Record `event`. It becomes the trigger of the next flush.
    pub fn on_mutation(&mut self, event: MutationEvent, now: Instant) -> Decision {
        let trigger = Trigger::Mutation(event);
        if !self.auto_save {
            self.pending = Some(trigger);
            return Decision::Deferred;
        }

        if self.deadline.is_some() {
            if self.reset_count >= self.max_resets {
                self.clear();
                return Decision::FlushNow(trigger);
            }
            self.reset_count += 1;
        }

        let deadline = now + self.timeout;
        self.deadline = Some(deadline);
        self.pending = Some(trigger);
        Decision::Armed {
            deadline,
            resets: self.reset_count,
        }
    }

    /// The timer expired: hand out the pending trigger and start over.
    pub fn on_deadline(&mut self) -> Option<Trigger> {
        self.clear()
    }

    /// Consume pending state for an explicit save.
    ///
    /// Without `force`, returns `None` when nothing is pending. With
    /// `force`, falls back to [`Trigger::Forced`].
    pub fn take_for_save(&mut self, force: bool) -> Option<Trigger> {
        match self.clear() {
            Some(trigger) => Some(trigger),
            None if force => Some(Trigger::Forced),
            None => None,
        }
    }

    /// Cancel the timer and return whatever was pending.
    pub fn clear(&mut self) -> Option<Trigger> {
        self.deadline = None;
        self.reset_count = 0;
        self.pending.take()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn reset_count(&self) -> u32 {
        self.reset_count
    }

    /// Whether a mutation is waiting to be persisted.
    pub fn is_dirty(&self) -> bool {
        self.pending.is_some()
    }
}
