pub mod actuator;
pub mod capture;
pub mod codec;
pub mod error;
pub mod handlers;
pub mod server;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod testing;

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use arc_swap::ArcSwap;
use capture::{FrameSize, PixelFormat};
use serde::{Deserialize, Serialize};

use crate::actuator::ChannelMap;

/// Active configuration, published once at startup
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub capture: CaptureConfig,
    pub codec: CodecConfig,
    pub actuator: ActuatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: IpAddr,
    /// Control port; the stream listens on `port + 1`
    pub port: u16,
    /// Concurrent `/stream` clients
    pub max_streams: usize,
    /// Body chunks buffered between a handler and its socket
    pub body_depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    V4l2,
    TestPattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    /// V4L2 device path, empty to auto-detect
    pub device: String,
    pub format: PixelFormat,
    pub framesize: FrameSize,
    /// Sensor JPEG quality, 0 (best) to 63
    pub quality: u8,
    /// Must exceed `server.max_streams` so stalled streams cannot hold
    /// every buffer
    pub buffer_count: u32,
    /// How long an acquisition waits for a buffer before failing
    pub buffer_wait_ms: u64,
    /// Test pattern frame rate, 0 for unpaced
    pub fps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Encoder quality (1..=100) used when converting raw frames
    pub jpeg_quality: u8,
    /// Largest chunk handed to the response while encoding
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverKind {
    Simulated,
    Sysfs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub driver: DriverKind,
    pub initial_speed: u8,
    pub motor_channels: [u8; 4],
    pub flash_channel: u8,
    pub servo_channel: u8,
    pub sysfs: SysfsPwmConfig,
}

impl ActuatorConfig {
    pub fn channels(&self) -> ChannelMap {
        ChannelMap {
            motors: self.motor_channels,
            flash: self.flash_channel,
            servo: self.servo_channel,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SysfsPwmConfig {
    /// e.g. `/sys/class/pwm/pwmchip0`
    pub chip: PathBuf,
    pub channels: Vec<SysfsChannel>,
}

/// Maps a logical channel onto a kernel PWM output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SysfsChannel {
    pub channel: u8,
    pub pwm: u32,
    pub frequency_hz: u32,
    pub resolution_bits: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 80,
            max_streams: 2,
            body_depth: 4,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::V4l2,
            device: String::new(),
            format: PixelFormat::Jpeg,
            framesize: FrameSize::Vga,
            quality: 12,
            buffer_count: 4,
            buffer_wait_ms: 250,
            fps: 25,
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 80,
            chunk_size: 4096,
        }
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        let channels = ChannelMap::default();
        Self {
            driver: DriverKind::Simulated,
            initial_speed: 255,
            motor_channels: channels.motors,
            flash_channel: channels.flash,
            servo_channel: channels.servo,
            sysfs: SysfsPwmConfig::default(),
        }
    }
}

impl Default for SysfsPwmConfig {
    fn default() -> Self {
        let motor = |channel, pwm| SysfsChannel {
            channel,
            pwm,
            frequency_hz: 2000,
            resolution_bits: 8,
        };
        Self {
            chip: PathBuf::from("/sys/class/pwm/pwmchip0"),
            channels: vec![
                motor(3, 0),
                motor(4, 1),
                motor(5, 2),
                motor(6, 3),
                SysfsChannel {
                    channel: 7,
                    pwm: 4,
                    frequency_hz: 5000,
                    resolution_bits: 8,
                },
                SysfsChannel {
                    channel: 8,
                    pwm: 5,
                    frequency_hz: 50,
                    resolution_bits: 16,
                },
            ],
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `ROVERCAM__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix("ROVERCAM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Self>()
            .and_then(Self::validate)
    }

    fn validate(self) -> Result<Self, config::ConfigError> {
        if self.capture.buffer_count as usize <= self.server.max_streams {
            return Err(config::ConfigError::Message(format!(
                "capture.buffer_count ({}) must exceed server.max_streams ({})",
                self.capture.buffer_count, self.server.max_streams
            )));
        }
        Ok(self)
    }
}
