//! Poll record: one periodic register read

/// A scheduled, recurring read of one or more registers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRecord {
    /// Assigned by the registry on insert when 0
    pub id: u32,
    pub address: u8,
    pub register: u8,
    pub count: usize,
    /// Period between runs, always > 0
    pub delay_ms: u64,
    /// Absolute due time in clock milliseconds; `None` until first insert
    pub next_run_ms: Option<u64>,
}

impl PollRecord {
    /// New unregistered record, aligned to the next whole second on insert
    pub fn new(delay_ms: u64, address: u8, register: u8, count: usize) -> Self {
        Self {
            id: 0,
            address,
            register,
            count,
            delay_ms,
            next_run_ms: None,
        }
    }

    /// Move the due time forward after a run.
    ///
    /// Adds one period; if the record would still be due within `grace_ms`
    /// of `now_ms`, skips as many whole periods as needed to land strictly
    /// beyond `now_ms + grace_ms`. Returns the number of skipped periods.
    pub fn advance(&mut self, now_ms: u64, grace_ms: u64) -> u64 {
        let delay = self.delay_ms.max(1);
        let mut next = self.next_run_ms.unwrap_or(now_ms).saturating_add(delay);

        let horizon = now_ms.saturating_add(grace_ms);
        let mut skipped = 0;
        if next <= horizon {
            skipped = (horizon - next) / delay + 1;
            next = next.saturating_add(skipped.saturating_mul(delay));
        }

        self.next_run_ms = Some(next);
        skipped
    }
}

/// First whole-second boundary at or after `now_ms`
pub fn align_to_second(now_ms: u64) -> u64 {
    now_ms.div_ceil(1000).saturating_mul(1000)
}
