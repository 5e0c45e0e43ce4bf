//! `/control` command interpreter

use std::sync::Arc;

use axum::http::StatusCode;
use tracing::{debug, info};

use crate::actuator::{Actuators, Motion};
use crate::capture::{FrameSize, PixelFormat, Sensor};
use crate::error::{ControlError, SensorError};

/// Longest accepted `var` or `val` token
pub const MAX_TOKEN_LEN: usize = 31;

impl ControlError {
    /// HTTP status reported for this failure
    pub fn status(&self) -> StatusCode {
        match self {
            ControlError::Sensor(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::NOT_FOUND,
        }
    }
}

/// A parsed control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    FrameSize(i32),
    Quality(i32),
    Flash(i32),
    Speed(i32),
    Servo(i32),
    Car(i32),
}

impl ControlCommand {
    /// Parse `var=<name>&val=<int>` from a raw query string
    pub fn parse(query: Option<&str>) -> Result<Self, ControlError> {
        let query = query
            .filter(|q| !q.is_empty())
            .ok_or(ControlError::MissingQuery)?;
        let variable = query_value(query, "var")?;
        let value = parse_int(query_value(query, "val")?);
        Self::from_pair(variable, value)
    }

    pub fn from_pair(variable: &str, value: i32) -> Result<Self, ControlError> {
        Ok(match variable {
            "framesize" => ControlCommand::FrameSize(value),
            "quality" => ControlCommand::Quality(value),
            "flash" => ControlCommand::Flash(value),
            "speed" => ControlCommand::Speed(value),
            "servo" => ControlCommand::Servo(value),
            "car" => ControlCommand::Car(value),
            other => return Err(ControlError::UnknownVariable(other.to_string())),
        })
    }

    pub fn variable(&self) -> &'static str {
        match self {
            ControlCommand::FrameSize(_) => "framesize",
            ControlCommand::Quality(_) => "quality",
            ControlCommand::Flash(_) => "flash",
            ControlCommand::Speed(_) => "speed",
            ControlCommand::Servo(_) => "servo",
            ControlCommand::Car(_) => "car",
        }
    }
}

/// First raw value of `key`, taken verbatim without percent-decoding
pub fn query_value<'q>(query: &'q str, key: &'static str) -> Result<&'q str, ControlError> {
    let value = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
        .ok_or(ControlError::MissingParameter(key))?;

    if value.len() > MAX_TOKEN_LEN {
        return Err(ControlError::TokenTooLong(key));
    }
    Ok(value)
}

/// Lenient integer parse: leading whitespace and sign, then digits up to the
/// first non-digit. No digits yields 0; out-of-range values saturate.
pub fn parse_int(s: &str) -> i32 {
    let s = s.trim_start_matches([' ', '\t', '\n', '\r', '\x0b', '\x0c']);
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut acc: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        acc = (acc * 10 + i64::from(b - b'0')).min(i64::from(i32::MAX) + 1);
    }
    let signed = if negative { -acc } else { acc };
    signed.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Applies control commands to the sensor and actuators
pub struct CommandInterpreter {
    sensor: Arc<dyn Sensor>,
    actuators: Actuators,
}

impl CommandInterpreter {
    pub fn new(sensor: Arc<dyn Sensor>, actuators: Actuators) -> Self {
        Self { sensor, actuators }
    }

    pub fn actuators(&self) -> &Actuators {
        &self.actuators
    }

    /// Parse and execute a raw query string
    pub fn handle(&self, query: Option<&str>) -> Result<ControlCommand, ControlError> {
        let command = ControlCommand::parse(query)?;
        self.execute(command)?;
        Ok(command)
    }

    pub fn execute(&self, command: ControlCommand) -> Result<(), ControlError> {
        metrics::counter!("control_commands_total", "var" => command.variable()).increment(1);

        match command {
            ControlCommand::FrameSize(value) => {
                if self.sensor.pixel_format() == PixelFormat::Jpeg {
                    let size =
                        FrameSize::from_index(value).ok_or(SensorError::InvalidFrameSize(value))?;
                    info!("framesize {:?}", size);
                    self.sensor.set_framesize(size)?;
                } else {
                    debug!("framesize ignored, sensor is not in JPEG mode");
                }
            }
            ControlCommand::Quality(value) => {
                info!("quality {}", value);
                self.sensor.set_quality(value)?;
            }
            ControlCommand::Flash(value) => self.actuators.set_flash(value),
            ControlCommand::Speed(value) => {
                self.actuators.set_speed(value);
            }
            ControlCommand::Servo(value) => {
                self.actuators.set_servo(value);
            }
            ControlCommand::Car(value) => match Motion::from_value(value) {
                Some(motion) => {
                    info!("{:?}", motion);
                    self.actuators.drive(motion);
                }
                None => debug!("car value {} out of range, ignored", value),
            },
        }
        Ok(())
    }
}
