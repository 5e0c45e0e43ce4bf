use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::debug;

use super::PwmDriver;

/// In-memory PWM driver for hosts without actuator hardware
#[derive(Debug, Default)]
pub struct SimulatedDriver {
    duties: Mutex<BTreeMap<u8, u32>>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last duty written to `channel`
    pub fn duty(&self, channel: u8) -> Option<u32> {
        self.duties.lock().ok()?.get(&channel).copied()
    }

    pub fn snapshot(&self) -> BTreeMap<u8, u32> {
        self.duties
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

impl PwmDriver for SimulatedDriver {
    fn write(&self, channel: u8, duty: u32) {
        debug!(channel, duty, "pwm write");
        if let Ok(mut duties) = self.duties.lock() {
            duties.insert(channel, duty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_last_duty_per_channel() {
        let driver = SimulatedDriver::new();
        driver.write(3, 100);
        driver.write(3, 40);
        driver.write(8, 4870);

        assert_eq!(driver.duty(3), Some(40));
        assert_eq!(driver.duty(8), Some(4870));
        assert_eq!(driver.duty(7), None);
        assert_eq!(driver.snapshot().len(), 2);
    }
}
