use std::collections::HashMap;

use crate::engine::EngineAction;

/// Hardware PWM outputs, addressed by channel index.
pub trait DutyOutput {
    fn write_duty(&mut self, channel: usize, duty: u32);
}

/// Power-loss safe key/value storage. Reads fall back to `default`; writes
/// are best effort and report nothing.
pub trait SettingsStore {
    fn get_int(&self, key: &str, default: i32) -> i32;
    fn put_int(&mut self, key: &str, value: i32);
    fn get_bool(&self, key: &str, default: bool) -> bool;
    fn put_bool(&mut self, key: &str, value: bool);
}

/// Applies engine side effects in order.
pub fn apply_actions<O, S>(actions: &[EngineAction], output: &mut O, store: &mut S)
where
    O: DutyOutput + ?Sized,
    S: SettingsStore + ?Sized,
{
    for action in actions {
        match action {
            EngineAction::WriteDuty { channel, duty } => output.write_duty(*channel, *duty),
            EngineAction::PersistValue { key, value } => store.put_int(key, i32::from(*value)),
            EngineAction::PersistPower { key, on } => store.put_bool(key, *on),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredValue {
    Int(i32),
    Bool(bool),
}

/// Heap backed store. Used by tests and as the host runtime's working copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    entries: HashMap<String, StoredValue>,
    writes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<StoredValue> {
        self.entries.get(key).copied()
    }

    pub fn insert(&mut self, key: &str, value: StoredValue) {
        self.entries.insert(key.to_string(), value);
    }

    /// Number of `put_*` calls seen so far.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, StoredValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), *value))
    }
}

impl SettingsStore for MemoryStore {
    fn get_int(&self, key: &str, default: i32) -> i32 {
        match self.entries.get(key) {
            Some(StoredValue::Int(value)) => *value,
            _ => default,
        }
    }

    fn put_int(&mut self, key: &str, value: i32) {
        self.writes += 1;
        self.insert(key, StoredValue::Int(value));
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.entries.get(key) {
            Some(StoredValue::Bool(value)) => *value,
            _ => default,
        }
    }

    fn put_bool(&mut self, key: &str, value: bool) {
        self.writes += 1;
        self.insert(key, StoredValue::Bool(value));
    }
}

/// Records every duty write, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingOutput {
    pub writes: Vec<(usize, u32)>,
}

impl RecordingOutput {
    pub fn last_duty(&self, channel: usize) -> Option<u32> {
        self.writes
            .iter()
            .rev()
            .find(|(index, _)| *index == channel)
            .map(|(_, duty)| *duty)
    }
}

impl DutyOutput for RecordingOutput {
    fn write_duty(&mut self, channel: usize, duty: u32) {
        self.writes.push((channel, duty));
    }
}
