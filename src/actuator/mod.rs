//! PWM actuators: drive motors, steering servo and flash LED

pub mod simulated;
pub mod sysfs;

pub use simulated::SimulatedDriver;
pub use sysfs::SysfsPwm;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::ActuatorConfig;

/// Duty-cycle output layer. Writes are fire-and-forget.
pub trait PwmDriver: Send + Sync {
    fn write(&self, channel: u8, duty: u32);
}

/// Servo positions above this are clamped to it
pub const SERVO_MAX: i32 = 650;
/// Positions below this are treated as out of range
pub const SERVO_MIN: i32 = 225;
/// Where out-of-range low positions land
pub const SERVO_RESET: i32 = 325;

/// Apply the servo position policy.
///
/// High values clamp to [`SERVO_MAX`] but low values snap to [`SERVO_RESET`],
/// not to [`SERVO_MIN`].
pub fn servo_position(value: i32) -> i32 {
    if value > SERVO_MAX {
        SERVO_MAX
    } else if value < SERVO_MIN {
        SERVO_RESET
    } else {
        value
    }
}

/// Persistent drive speed shared by every motion command
#[derive(Debug)]
pub struct DriveSpeed(AtomicU8);

impl DriveSpeed {
    pub fn new(speed: u8) -> Self {
        Self(AtomicU8::new(speed))
    }

    pub fn get(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }

    /// Store `value` clamped to 0..=255, returning what was stored
    pub fn set(&self, value: i32) -> u8 {
        let speed = value.clamp(0, u8::MAX as i32) as u8;
        self.0.store(speed, Ordering::Relaxed);
        speed
    }
}

impl Default for DriveSpeed {
    fn default() -> Self {
        Self::new(u8::MAX)
    }
}

/// Motion requested by the `car` control variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    Forward,
    Left,
    Stop,
    Right,
    Backward,
}

impl Motion {
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            1 => Some(Motion::Forward),
            2 => Some(Motion::Left),
            3 => Some(Motion::Stop),
            4 => Some(Motion::Right),
            5 => Some(Motion::Backward),
            _ => None,
        }
    }

    /// Duties for the four motor inputs at `speed`
    pub fn duties(self, speed: u8) -> [u32; 4] {
        let s = speed as u32;
        match self {
            Motion::Forward => [0, s, s, 0],
            Motion::Left => [s, 0, s, 0],
            Motion::Stop => [0, 0, 0, 0],
            Motion::Right => [0, s, 0, s],
            Motion::Backward => [s, 0, 0, s],
        }
    }
}

/// PWM channel assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMap {
    pub motors: [u8; 4],
    pub flash: u8,
    pub servo: u8,
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self {
            motors: [3, 4, 5, 6],
            flash: 7,
            servo: 8,
        }
    }
}

/// The rover's actuators behind one PWM driver
pub struct Actuators {
    driver: Arc<dyn PwmDriver>,
    channels: ChannelMap,
    speed: Arc<DriveSpeed>,
}

impl Actuators {
    pub fn new(driver: Arc<dyn PwmDriver>, channels: ChannelMap, speed: Arc<DriveSpeed>) -> Self {
        Self {
            driver,
            channels,
            speed,
        }
    }

    pub fn from_config(config: &ActuatorConfig, driver: Arc<dyn PwmDriver>) -> Self {
        Self::new(
            driver,
            config.channels(),
            Arc::new(DriveSpeed::new(config.initial_speed)),
        )
    }

    pub fn speed(&self) -> u8 {
        self.speed.get()
    }

    pub fn set_speed(&self, value: i32) -> u8 {
        let speed = self.speed.set(value);
        debug!("Drive speed set to {}", speed);
        speed
    }

    pub fn set_flash(&self, value: i32) {
        let duty = value.clamp(0, u8::MAX as i32) as u32;
        self.driver.write(self.channels.flash, duty);
    }

    /// Move the servo, returning the duty written
    pub fn set_servo(&self, value: i32) -> u32 {
        let duty = 10 * servo_position(value) as u32;
        self.driver.write(self.channels.servo, duty);
        duty
    }

    pub fn drive(&self, motion: Motion) {
        let speed = self.speed.get();
        let duties = motion.duties(speed);
        debug!("{:?} at speed {}", motion, speed);
        for (channel, duty) in self.channels.motors.iter().zip(duties) {
            self.driver.write(*channel, duty);
        }
    }
}
