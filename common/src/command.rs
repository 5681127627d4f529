use thiserror::Error;

use crate::{
    channel::parse_persist_key,
    engine::{DutyEngine, EngineAction},
};

/// Largest MQTT payload or form value worth looking at.
pub const MAX_PAYLOAD_BYTES: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("payload of {0} bytes exceeds 512")]
    Oversized(usize),
    #[error("payload is not utf-8")]
    NotUtf8,
    #[error("topic `{0}` is not a command topic")]
    UnknownTopic(String),
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("`{0}` is not an integer value")]
    InvalidValue(String),
}

/// Request from the web page, the MQTT broker or the push button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TogglePower,
    SetPower(bool),
    SetValue { channel: usize, value: i32 },
}

impl Command {
    /// Parses an MQTT message below `root`. `{root}/cmd` accepts `toggle`,
    /// `on` and `off`; `{root}/cmd/sliderN` accepts an integer value.
    pub fn from_mqtt(root: &str, topic: &str, payload: &[u8]) -> Result<Self, CommandError> {
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(CommandError::Oversized(payload.len()));
        }
        let message = core::str::from_utf8(payload)
            .map_err(|_| CommandError::NotUtf8)?
            .trim();

        let Some(rest) = topic
            .strip_prefix(root)
            .and_then(|rest| rest.strip_prefix("/cmd"))
        else {
            return Err(CommandError::UnknownTopic(topic.to_string()));
        };

        match rest {
            "" => Self::from_power_word(message),
            _ => {
                let key = rest
                    .strip_prefix('/')
                    .ok_or_else(|| CommandError::UnknownTopic(topic.to_string()))?;
                Self::from_field(key, message)
                    .map_err(|err| match err {
                        CommandError::UnknownCommand(_) => {
                            CommandError::UnknownTopic(topic.to_string())
                        }
                        other => other,
                    })
            }
        }
    }

    /// Parses one `name=value` field of the web form (`slider1=420`,
    /// `power=toggle`).
    pub fn from_field(name: &str, value: &str) -> Result<Self, CommandError> {
        if value.len() > MAX_PAYLOAD_BYTES {
            return Err(CommandError::Oversized(value.len()));
        }
        if name.eq_ignore_ascii_case("power") {
            return Self::from_power_word(value.trim());
        }

        let channel = parse_persist_key(name)
            .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;
        let value = value
            .trim()
            .parse::<i32>()
            .map_err(|_| CommandError::InvalidValue(value.to_string()))?;

        Ok(Self::SetValue { channel, value })
    }

    fn from_power_word(word: &str) -> Result<Self, CommandError> {
        if word.eq_ignore_ascii_case("toggle") {
            Ok(Self::TogglePower)
        } else if word.eq_ignore_ascii_case("on") {
            Ok(Self::SetPower(true))
        } else if word.eq_ignore_ascii_case("off") {
            Ok(Self::SetPower(false))
        } else {
            Err(CommandError::UnknownCommand(word.to_string()))
        }
    }

    pub fn apply(self, engine: &mut DutyEngine, now_ms: u32) -> Vec<EngineAction> {
        match self {
            Self::TogglePower => engine.toggle_power(now_ms).1,
            Self::SetPower(on) => engine.switch_power(on, now_ms).1,
            Self::SetValue { channel, value } => engine.set_value(channel, value, now_ms),
        }
    }
}

/// Splits an `application/x-www-form-urlencoded` body or query string into
/// decoded `(name, value)` pairs.
pub fn parse_form(body: &str) -> Vec<(String, String)> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(name), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'+' => out.push(b' '),
            b'%' => {
                let hex = bytes
                    .get(index + 1..index + 3)
                    .filter(|hex| hex.iter().all(u8::is_ascii_hexdigit))
                    .and_then(|hex| core::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match hex {
                    Some(byte) => {
                        out.push(byte);
                        index += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            byte => out.push(byte),
        }
        index += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
