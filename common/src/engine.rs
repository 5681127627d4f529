use crate::{
    channel::{channel_label, persist_key, Channel},
    config::EngineConfig,
    curve::VALUE_MAX,
    ports::SettingsStore,
    power::{PowerGate, POWER_KEY},
    types::{ChannelStatus, DimmerStatePayload, DimmerStatus},
};

/// Side effect requested by the engine. Runtimes apply these in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    WriteDuty { channel: usize, duty: u32 },
    PersistValue { key: String, value: u16 },
    PersistPower { key: String, on: bool },
}

/// Values loaded from storage at boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredState {
    pub values: Vec<u16>,
    pub is_on: bool,
}

impl RestoredState {
    pub fn defaults(config: &EngineConfig) -> Self {
        Self {
            values: vec![config.default_value; config.channel_count],
            is_on: config.default_on,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DutyEngine {
    config: EngineConfig,
    channels: Vec<Channel>,
    power: PowerGate,
}

impl DutyEngine {
    pub fn new(config: EngineConfig, restored: RestoredState) -> Self {
        let channels = (0..config.channel_count)
            .map(|index| {
                let value = restored
                    .values
                    .get(index)
                    .copied()
                    .filter(|value| *value <= VALUE_MAX)
                    .unwrap_or(config.default_value);
                Channel::restored(value, config.curve.map(value, config.duty_range))
            })
            .collect();

        Self {
            channels,
            power: PowerGate::new(restored.is_on),
            config,
        }
    }

    /// Builds the engine from whatever the store holds, falling back to the
    /// configured defaults for missing or out of range entries.
    pub fn restore<S: SettingsStore + ?Sized>(config: EngineConfig, store: &S) -> Self {
        let default_value = i32::from(config.default_value);
        let values = (0..config.channel_count)
            .map(|index| {
                let stored = store.get_int(&persist_key(index), default_value);
                u16::try_from(stored)
                    .ok()
                    .filter(|value| *value <= VALUE_MAX)
                    .unwrap_or(config.default_value)
            })
            .collect();
        let is_on = store.get_bool(POWER_KEY, config.default_on);

        Self::new(config, RestoredState { values, is_on })
    }

    /// Fixed at construction; duties are always derived from it.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn persist_key(&self, channel: usize) -> Option<String> {
        (channel < self.channels.len()).then(|| persist_key(channel))
    }

    pub fn get_value(&self, channel: usize) -> Option<u16> {
        self.channels.get(channel).map(Channel::logical_value)
    }

    pub fn get_duty(&self, channel: usize) -> Option<u32> {
        self.channels.get(channel).map(Channel::duty)
    }

    pub fn get_power(&self) -> bool {
        self.power.is_on()
    }

    pub fn has_pending_writes(&self) -> bool {
        self.power.is_dirty() || self.channels.iter().any(Channel::is_dirty)
    }

    /// Hardware writes that bring freshly attached outputs in line with the
    /// restored state.
    pub fn boot_actions(&self) -> Vec<EngineAction> {
        self.output_actions()
    }

    /// Sets the promille value of `channel`. Unknown channels and values
    /// outside `0..=1000` are ignored.
    pub fn set_value(&mut self, channel: usize, value: i32, now_ms: u32) -> Vec<EngineAction> {
        let Some(value) = u16::try_from(value).ok().filter(|v| *v <= VALUE_MAX) else {
            return Vec::new();
        };
        let duty = self.config.curve.map(value, self.config.duty_range);
        let Some(state) = self.channels.get_mut(channel) else {
            return Vec::new();
        };

        state.update(value, duty, now_ms);

        if self.power.is_on() {
            vec![EngineAction::WriteDuty { channel, duty }]
        } else {
            Vec::new()
        }
    }

    /// Edge triggered power control: `pressed == true` flips the power state,
    /// `false` leaves it alone. Returns the resulting state.
    pub fn set_power(&mut self, pressed: bool, now_ms: u32) -> (bool, Vec<EngineAction>) {
        if !pressed {
            return (self.power.is_on(), Vec::new());
        }

        let is_on = self.power.toggle(now_ms);
        (is_on, self.output_actions())
    }

    pub fn toggle_power(&mut self, now_ms: u32) -> (bool, Vec<EngineAction>) {
        self.set_power(true, now_ms)
    }

    /// Level style helper for collaborators that receive explicit on/off
    /// commands: toggles only when `on` differs from the current state.
    pub fn switch_power(&mut self, on: bool, now_ms: u32) -> (bool, Vec<EngineAction>) {
        self.set_power(on != self.power.is_on(), now_ms)
    }

    /// Flushes every value that has been stable for longer than the quiet
    /// period. Call once per scheduler iteration.
    pub fn tick(&mut self, now_ms: u32) -> Vec<EngineAction> {
        let quiet_ms = self.config.quiet_period_ms;
        let mut actions = Vec::new();

        for (index, channel) in self.channels.iter_mut().enumerate() {
            if channel.dirty.take_due(now_ms, quiet_ms) {
                actions.push(EngineAction::PersistValue {
                    key: persist_key(index),
                    value: channel.logical_value,
                });
            }
        }

        if self.power.take_due(now_ms, quiet_ms) {
            actions.push(EngineAction::PersistPower {
                key: POWER_KEY.to_string(),
                on: self.power.is_on(),
            });
        }

        actions
    }

    pub fn status(&self) -> DimmerStatus {
        DimmerStatus {
            power: self.power.is_on(),
            curve: self.config.curve.as_str(),
            duty_range: self.config.duty_range,
            pending_save: self.has_pending_writes(),
            channels: self
                .channels
                .iter()
                .enumerate()
                .map(|(index, channel)| ChannelStatus {
                    name: channel_label(self.channels.len(), index),
                    key: persist_key(index),
                    value: channel.logical_value,
                    duty: channel.duty,
                    output: self.power.gate(channel.duty),
                })
                .collect(),
        }
    }

    pub fn state_payload(&self) -> DimmerStatePayload {
        DimmerStatePayload {
            power: self.power.is_on(),
            values: self.channels.iter().map(Channel::logical_value).collect(),
            duties: self.channels.iter().map(Channel::duty).collect(),
        }
    }

    fn output_actions(&self) -> Vec<EngineAction> {
        self.channels
            .iter()
            .enumerate()
            .map(|(channel, state)| EngineAction::WriteDuty {
                channel,
                duty: self.power.gate(state.duty),
            })
            .collect()
    }
}
