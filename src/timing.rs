//! Timing wheel for request timeouts.
//!
//! Each client pair has at most one armed timer, so the wheel carries only
//! what the engine drives: arm, advance, and cancel by token. Slots are
//! plain vectors; the wheel slot returned by `insert` is the cancellation
//! token. Time is caller-supplied microseconds, so workers and tests
//! control the clock.

/// Entry in the timing wheel.
#[derive(Debug, Clone, Copy)]
pub struct TimerEntry {
    /// Client pair slot the timer belongs to.
    pub pair: usize,
    /// Request id of the pair when the timer was armed.
    pub rid: u16,
    /// Expiration timestamp (microseconds).
    pub expires_at: u64,
}

/// Timing wheel for managing request timeouts.
///
/// Deadlines past the wheel horizon are clamped to the farthest slot and
/// walk forward as the cursor catches up; a timer may fire a slot late but
/// never early.
pub struct TimingWheel {
    slots: Vec<Vec<TimerEntry>>,
    slot_us: u64,
    cursor: usize,
    now: u64,
}

impl TimingWheel {
    /// Create a wheel of `num_slots` slots covering `slot_us` microseconds
    /// each.
    pub fn new(num_slots: usize, slot_us: u64) -> Self {
        Self {
            slots: (0..num_slots).map(|_| Vec::new()).collect(),
            slot_us,
            cursor: 0,
            now: 0,
        }
    }

    /// Initialize the wheel with a starting timestamp.
    pub fn init(&mut self, now: u64) {
        self.now = now;
        self.cursor = 0;
    }

    /// Slot for a deadline, at least `min_ticks` ahead of the cursor.
    fn slot_for(&self, expires_at: u64, min_ticks: u64) -> usize {
        let ticks = ((expires_at - self.now) / self.slot_us)
            .clamp(min_ticks, self.slots.len() as u64 - 1) as usize;
        (self.cursor + ticks) % self.slots.len()
    }

    /// Arm a timer.
    ///
    /// Returns the wheel slot it landed in, the token for `cancel_fast`, or
    /// `None` when the deadline has already passed.
    pub fn insert(&mut self, entry: TimerEntry) -> Option<usize> {
        if entry.expires_at <= self.now {
            return None;
        }
        let slot = self.slot_for(entry.expires_at, 0);
        self.slots[slot].push(entry);
        Some(slot)
    }

    /// Advance the clock to `now`, appending due entries to `out`.
    ///
    /// The buffer is NOT cleared; the caller clears it beforehand if needed.
    /// Drained entries that are not yet due (clamped by the horizon) are
    /// re-filed ahead of the cursor.
    pub fn advance_into(&mut self, now: u64, out: &mut Vec<TimerEntry>) {
        if now <= self.now {
            return;
        }
        let ticks = ((now - self.now) / self.slot_us).min(self.slots.len() as u64) as usize;
        self.now = now;

        for _ in 0..ticks {
            let drained = std::mem::take(&mut self.slots[self.cursor]);
            for entry in drained {
                if entry.expires_at <= now {
                    out.push(entry);
                } else {
                    let slot = self.slot_for(entry.expires_at, 1);
                    self.slots[slot].push(entry);
                }
            }
            self.cursor = (self.cursor + 1) % self.slots.len();
        }
    }

    /// Disarm the timer in `wheel_slot` belonging to `(pair, rid)`.
    ///
    /// Returns true if the entry was found and removed.
    pub fn cancel_fast(&mut self, wheel_slot: usize, pair: usize, rid: u16) -> bool {
        let Some(slot) = self.slots.get_mut(wheel_slot) else {
            return false;
        };
        match slot.iter().position(|e| e.pair == pair && e.rid == rid) {
            Some(pos) => {
                slot.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// Get the current timestamp.
    #[inline]
    pub fn current_ts(&self) -> u64 {
        self.now
    }
}
