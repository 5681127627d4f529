/// Default time a value must stay unchanged before it is written to flash.
pub const QUIET_PERIOD_MS: u32 = 1_000;

/// Time of the last unsaved change, in wrapping monotonic milliseconds.
///
/// `0` is reserved for "nothing to save". A change observed while the clock
/// reads exactly `0` is recorded one tick earlier (`u32::MAX`) so it is never
/// mistaken for a clean entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyMark {
    since_ms: u32,
}

impl DirtyMark {
    pub const CLEAN: Self = Self { since_ms: 0 };

    pub fn mark(&mut self, now_ms: u32) {
        self.since_ms = if now_ms == 0 { now_ms.wrapping_sub(1) } else { now_ms };
    }

    pub fn clear(&mut self) {
        self.since_ms = 0;
    }

    pub fn is_dirty(&self) -> bool {
        self.since_ms != 0
    }

    pub fn since_ms(&self) -> Option<u32> {
        self.is_dirty().then_some(self.since_ms)
    }

    /// True once the value has been stable for strictly more than `quiet_ms`.
    pub fn is_due(&self, now_ms: u32, quiet_ms: u32) -> bool {
        self.is_dirty() && now_ms.wrapping_sub(self.since_ms) > quiet_ms
    }

    /// Clears the mark and reports whether a write is due now.
    pub fn take_due(&mut self, now_ms: u32, quiet_ms: u32) -> bool {
        if self.is_due(now_ms, quiet_ms) {
            self.clear();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_mark_is_clean() {
        let mark = DirtyMark::default();
        assert!(!mark.is_dirty());
        assert_eq!(mark.since_ms(), None);
        assert!(!mark.is_due(u32::MAX, QUIET_PERIOD_MS));
    }

    #[test]
    fn zero_clock_reading_stays_dirty() {
        let mut mark = DirtyMark::CLEAN;
        mark.mark(0);

        assert!(mark.is_dirty());
        assert_eq!(mark.since_ms(), Some(u32::MAX));
        // Recorded at u32::MAX, so the quiet period ends one tick early.
        assert!(!mark.is_due(999, QUIET_PERIOD_MS));
        assert!(mark.is_due(1_000, QUIET_PERIOD_MS));
    }

    #[test]
    fn due_only_after_quiet_period() {
        let mut mark = DirtyMark::CLEAN;
        mark.mark(5_000);

        assert!(!mark.is_due(5_000, QUIET_PERIOD_MS));
        assert!(!mark.is_due(6_000, QUIET_PERIOD_MS));
        assert!(mark.is_due(6_001, QUIET_PERIOD_MS));
    }

    #[test]
    fn survives_clock_wrap() {
        let mut mark = DirtyMark::CLEAN;
        mark.mark(u32::MAX - 200);

        assert!(!mark.is_due(500, QUIET_PERIOD_MS));
        assert!(mark.is_due(800, QUIET_PERIOD_MS));
    }

    #[test]
    fn take_due_clears_once() {
        let mut mark = DirtyMark::CLEAN;
        mark.mark(10);

        assert!(!mark.take_due(500, QUIET_PERIOD_MS));
        assert!(mark.is_dirty());
        assert!(mark.take_due(1_011, QUIET_PERIOD_MS));
        assert!(!mark.is_dirty());
        assert!(!mark.take_due(5_000, QUIET_PERIOD_MS));
    }
}
