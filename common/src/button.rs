//! Shift register debouncer for the power push button.
//!
//! The pin is sampled at most every [`SAMPLE_INTERVAL_MS`]; each sample is
//! shifted into a 32 bit history. The debounced level only changes once the
//! whole history agrees, so a press is reported roughly 100 ms after the
//! contact settles.

/// Minimum gap between two samples (exclusive).
pub const SAMPLE_INTERVAL_MS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonDebouncer {
    last_sample_ms: u32,
    history: u32,
    pressed: bool,
}

impl ButtonDebouncer {
    pub fn new() -> Self {
        Self {
            last_sample_ms: 0,
            history: 0,
            pressed: false,
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// Feeds the raw pin level. Returns the new debounced level when it
    /// changes: `Some(true)` on press, `Some(false)` on release.
    pub fn sample(&mut self, now_ms: u32, raw_pressed: bool) -> Option<bool> {
        if now_ms.wrapping_sub(self.last_sample_ms) <= SAMPLE_INTERVAL_MS {
            return None;
        }
        self.last_sample_ms = now_ms;
        self.history = (self.history << 1) | u32::from(raw_pressed);

        if self.history == 0 && self.pressed {
            self.pressed = false;
            Some(false)
        } else if self.history == u32::MAX && !self.pressed {
            self.pressed = true;
            Some(true)
        } else {
            None
        }
    }
}

impl Default for ButtonDebouncer {
    fn default() -> Self {
        Self::new()
    }
}
