use crate::coalesce::DirtyMark;

/// Storage key for the global on/off flag.
pub const POWER_KEY: &str = "on";

/// Global on/off switch. While off, every output is driven at zero but the
/// channel values are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerGate {
    is_on: bool,
    dirty: DirtyMark,
}

impl PowerGate {
    pub fn new(is_on: bool) -> Self {
        Self {
            is_on,
            dirty: DirtyMark::CLEAN,
        }
    }

    pub fn is_on(&self) -> bool {
        self.is_on
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.is_dirty()
    }

    pub fn toggle(&mut self, now_ms: u32) -> bool {
        self.is_on = !self.is_on;
        self.dirty.mark(now_ms);
        self.is_on
    }

    /// Duty to write for a channel whose computed duty is `duty`.
    pub fn gate(&self, duty: u32) -> u32 {
        if self.is_on {
            duty
        } else {
            0
        }
    }

    pub(crate) fn take_due(&mut self, now_ms: u32, quiet_ms: u32) -> bool {
        self.dirty.take_due(now_ms, quiet_ms)
    }
}

impl Default for PowerGate {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_on() {
        let gate = PowerGate::default();
        assert!(gate.is_on());
        assert!(!gate.is_dirty());
    }

    #[test]
    fn toggle_flips_and_marks_dirty() {
        let mut gate = PowerGate::default();

        assert!(!gate.toggle(0));
        assert!(gate.is_dirty());
        assert_eq!(gate.gate(512), 0);

        assert!(gate.toggle(10));
        assert_eq!(gate.gate(512), 512);
    }
}
