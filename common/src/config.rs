use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    channel::{DEFAULT_VALUE, MAX_CHANNELS},
    coalesce::QUIET_PERIOD_MS,
    curve::{DutyCurve, VALUE_MAX},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("channel count {0} outside 1..=4")]
    ChannelCount(usize),
    #[error("duty range must be nonzero")]
    ZeroDutyRange,
    #[error("default value {0} outside 0..=1000")]
    DefaultValue(u16),
    #[error("{curve} curve with range {range} maps the lowest step to off")]
    CurveLosesLowestStep { curve: &'static str, range: u32 },
    #[error("unknown hardware variant `{0}`")]
    UnknownVariant(String),
}

/// LED layouts the firmware can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareVariant {
    /// Single white channel with a true off state.
    White,
    Rgb,
    Rgbw,
    /// Plain RGB LED driven with an 8 bit linear ramp.
    SimpleRgb,
}

impl HardwareVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Rgb => "rgb",
            Self::Rgbw => "rgbw",
            Self::SimpleRgb => "simple_rgb",
        }
    }

    pub fn channel_count(self) -> usize {
        match self {
            Self::White => 1,
            Self::Rgb | Self::SimpleRgb => 3,
            Self::Rgbw => 4,
        }
    }

    pub fn curve(self) -> DutyCurve {
        match self {
            Self::White => DutyCurve::OffsetQuadratic,
            Self::Rgb | Self::Rgbw => DutyCurve::Quadratic,
            Self::SimpleRgb => DutyCurve::Linear,
        }
    }

    pub fn resolution_bits(self) -> u8 {
        match self {
            Self::White => 11,
            Self::Rgb | Self::Rgbw => 10,
            Self::SimpleRgb => 8,
        }
    }
}

impl std::str::FromStr for HardwareVariant {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "white" => Ok(Self::White),
            "rgb" => Ok(Self::Rgb),
            "rgbw" => Ok(Self::Rgbw),
            "simple_rgb" | "simplergb" => Ok(Self::SimpleRgb),
            _ => Err(ConfigError::UnknownVariant(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub channel_count: usize,
    pub curve: DutyCurve,
    pub duty_range: u32,
    pub quiet_period_ms: u32,
    pub default_value: u16,
    pub default_on: bool,
}

impl EngineConfig {
    pub fn for_variant(variant: HardwareVariant) -> Self {
        Self {
            channel_count: variant.channel_count(),
            curve: variant.curve(),
            duty_range: duty_range_for_bits(variant.resolution_bits()),
            quiet_period_ms: QUIET_PERIOD_MS,
            default_value: DEFAULT_VALUE,
            default_on: true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_CHANNELS).contains(&self.channel_count) {
            return Err(ConfigError::ChannelCount(self.channel_count));
        }
        if self.duty_range == 0 {
            return Err(ConfigError::ZeroDutyRange);
        }
        if self.default_value > VALUE_MAX {
            return Err(ConfigError::DefaultValue(self.default_value));
        }
        if self.curve == DutyCurve::OffsetQuadratic && self.curve.map(1, self.duty_range) == 0 {
            return Err(ConfigError::CurveLosesLowestStep {
                curve: self.curve.as_str(),
                range: self.duty_range,
            });
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_variant(HardwareVariant::White)
    }
}

pub fn duty_range_for_bits(bits: u8) -> u32 {
    let bits = bits.clamp(1, 20);
    (1_u32 << bits) - 1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub hostname: String,
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub mqtt_topic: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hostname: "pwm-dimmer".to_string(),
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            mqtt_topic: "dimmer".to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn sanitize(&mut self) {
        let topic = self.mqtt_topic.trim().trim_matches('/');
        self.mqtt_topic = if topic.is_empty() || topic.contains(['+', '#']) {
            NetworkConfig::default().mqtt_topic
        } else {
            topic.to_string()
        };

        if self.hostname.trim().is_empty() {
            self.hostname = NetworkConfig::default().hostname;
        }

        if self.mqtt_port == 0 {
            self.mqtt_port = 1883;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareConfig {
    pub pwm_pins: Vec<i32>,
    pub pwm_frequency_hz: u32,
    pub button_pin: i32,
    pub status_led_pin: i32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            pwm_pins: vec![5, 18, 19, 21],
            pwm_frequency_hz: 25_000,
            button_pin: 0,
            status_led_pin: 2,
        }
    }
}

impl HardwareConfig {
    pub fn sanitize(&mut self) {
        let defaults = HardwareConfig::default();

        self.pwm_pins.retain(|pin| *pin >= 0);
        if self.pwm_pins.is_empty() {
            self.pwm_pins = defaults.pwm_pins;
        }
        self.pwm_pins.truncate(MAX_CHANNELS);

        self.pwm_frequency_hz = self.pwm_frequency_hz.clamp(100, 40_000);

        if self.button_pin < 0 {
            self.button_pin = defaults.button_pin;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub variant: HardwareVariant,
    pub network: NetworkConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            variant: HardwareVariant::White,
            network: NetworkConfig::default(),
            hardware: HardwareConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.network.sanitize();
        self.hardware.sanitize();
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::for_variant(self.variant)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn presets_are_valid() {
        for variant in [
            HardwareVariant::White,
            HardwareVariant::Rgb,
            HardwareVariant::Rgbw,
            HardwareVariant::SimpleRgb,
        ] {
            let config = EngineConfig::for_variant(variant);
            assert_eq!(config.validate(), Ok(()), "{}", variant.as_str());
        }
    }

    #[test]
    fn simple_rgb_is_eight_bit_linear() {
        let config = EngineConfig::for_variant(HardwareVariant::SimpleRgb);
        assert_eq!(config.duty_range, 255);
        assert_eq!(config.curve, DutyCurve::Linear);
        assert_eq!(config.channel_count, 3);
    }

    #[test]
    fn rejects_bad_engine_config() {
        let mut config = EngineConfig::for_variant(HardwareVariant::Rgbw);
        config.channel_count = 5;
        assert_eq!(config.validate(), Err(ConfigError::ChannelCount(5)));

        let mut config = EngineConfig::for_variant(HardwareVariant::Rgb);
        config.duty_range = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroDutyRange));

        let mut config = EngineConfig::for_variant(HardwareVariant::White);
        config.duty_range = 1023;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CurveLosesLowestStep { range: 1023, .. })
        ));
    }

    #[test]
    fn parses_variant_names() {
        assert_eq!("RGBW".parse::<HardwareVariant>(), Ok(HardwareVariant::Rgbw));
        assert_eq!(
            "simple_rgb".parse::<HardwareVariant>(),
            Ok(HardwareVariant::SimpleRgb)
        );
        assert!("cmyk".parse::<HardwareVariant>().is_err());
    }

    #[test]
    fn sanitize_repairs_topic_and_pins() {
        let mut runtime = RuntimeConfig::default();
        runtime.network.mqtt_topic = "/lights/desk/".to_string();
        runtime.network.mqtt_port = 0;
        runtime.hardware.pwm_pins = vec![-1, 4, 5, 6, 7, 8];
        runtime.hardware.pwm_frequency_hz = 1_000_000;
        runtime.sanitize();

        assert_eq!(runtime.network.mqtt_topic, "lights/desk");
        assert_eq!(runtime.network.mqtt_port, 1883);
        assert_eq!(runtime.hardware.pwm_pins, vec![4, 5, 6, 7]);
        assert_eq!(runtime.hardware.pwm_frequency_hz, 40_000);

        runtime.network.mqtt_topic = "dimmer/#".to_string();
        runtime.sanitize();
        assert_eq!(runtime.network.mqtt_topic, "dimmer");
    }

    #[test]
    fn runtime_config_tolerates_missing_hardware_section() {
        let raw = r#"{"variant":"rgb","network":{"hostname":"desk","wifi_ssid":"","wifi_pass":"","mqtt_host":"broker","mqtt_port":1883,"mqtt_user":"","mqtt_pass":"","mqtt_topic":"desk"}}"#;
        let runtime: RuntimeConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(runtime.variant, HardwareVariant::Rgb);
        assert_eq!(runtime.hardware, HardwareConfig::default());
    }
}
