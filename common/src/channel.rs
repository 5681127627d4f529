use serde::{Deserialize, Serialize};

use crate::coalesce::DirtyMark;

/// Maximum number of PWM outputs any hardware variant drives.
pub const MAX_CHANNELS: usize = 4;

/// Value a channel starts with when nothing has been stored yet.
pub const DEFAULT_VALUE: u16 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelId {
    R,
    G,
    B,
    W,
}

impl ChannelId {
    pub fn index(self) -> usize {
        match self {
            Self::R => 0,
            Self::G => 1,
            Self::B => 2,
            Self::W => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::R),
            1 => Some(Self::G),
            2 => Some(Self::B),
            3 => Some(Self::W),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::R => "R",
            Self::G => "G",
            Self::B => "B",
            Self::W => "W",
        }
    }
}

/// Storage key for the logical value of channel `index` (`slider1` for the
/// first channel).
pub fn persist_key(index: usize) -> String {
    format!("slider{}", index + 1)
}

/// Display name of channel `index`; a lone channel is the white one.
pub fn channel_label(channel_count: usize, index: usize) -> &'static str {
    if channel_count == 1 {
        return ChannelId::W.as_str();
    }
    ChannelId::from_index(index).map_or("?", ChannelId::as_str)
}

/// Parses a `sliderN` key back into a zero based channel index.
pub fn parse_persist_key(key: &str) -> Option<usize> {
    let number = key.strip_prefix("slider")?.parse::<usize>().ok()?;
    number.checked_sub(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub(crate) logical_value: u16,
    pub(crate) duty: u32,
    pub(crate) dirty: DirtyMark,
}

impl Channel {
    pub(crate) fn restored(logical_value: u16, duty: u32) -> Self {
        Self {
            logical_value,
            duty,
            dirty: DirtyMark::CLEAN,
        }
    }

    pub fn logical_value(&self) -> u16 {
        self.logical_value
    }

    pub fn duty(&self) -> u32 {
        self.duty
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.is_dirty()
    }

    /// Applies a new value/duty pair. Returns `true` when the duty changed and
    /// the channel now needs saving.
    pub(crate) fn update(&mut self, value: u16, duty: u32, now_ms: u32) -> bool {
        if duty == self.duty {
            return false;
        }
        self.duty = duty;
        self.logical_value = value;
        self.dirty.mark(now_ms);
        true
    }
}
