use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub name: &'static str,
    pub key: String,
    pub value: u16,
    pub duty: u32,
    /// Duty actually driven on the pin (0 while powered off).
    pub output: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimmerStatus {
    pub power: bool,
    pub curve: &'static str,
    #[serde(rename = "dutyRange")]
    pub duty_range: u32,
    #[serde(rename = "pendingSave")]
    pub pending_save: bool,
    pub channels: Vec<ChannelStatus>,
}

/// Compact state published over MQTT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimmerStatePayload {
    pub power: bool,
    pub values: Vec<u16>,
    pub duties: Vec<u32>,
}
