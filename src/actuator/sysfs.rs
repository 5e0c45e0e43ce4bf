//! Linux sysfs PWM backend (`/sys/class/pwm`)

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::{info, warn};

use super::PwmDriver;
use crate::SysfsPwmConfig;

struct Output {
    duty_path: PathBuf,
    period_ns: u64,
    max_duty: u32,
}

/// Drives logical channels through kernel PWM outputs
pub struct SysfsPwm {
    outputs: BTreeMap<u8, Output>,
}

impl SysfsPwm {
    /// Export, configure and enable every configured output
    pub fn open(config: &SysfsPwmConfig) -> io::Result<Self> {
        let mut outputs = BTreeMap::new();

        for ch in &config.channels {
            let dir = config.chip.join(format!("pwm{}", ch.pwm));
            if !dir.exists() {
                fs::write(config.chip.join("export"), ch.pwm.to_string())?;
            }

            let period_ns = 1_000_000_000 / u64::from(ch.frequency_hz.max(1));
            // Duty must never exceed the period, so zero it first
            fs::write(dir.join("duty_cycle"), "0")?;
            fs::write(dir.join("period"), period_ns.to_string())?;
            fs::write(dir.join("enable"), "1")?;

            info!(
                "PWM channel {} -> {} ({} Hz, {} bit)",
                ch.channel,
                dir.display(),
                ch.frequency_hz,
                ch.resolution_bits
            );
            outputs.insert(
                ch.channel,
                Output {
                    duty_path: dir.join("duty_cycle"),
                    period_ns,
                    max_duty: max_duty(ch.resolution_bits),
                },
            );
        }

        Ok(Self { outputs })
    }
}

fn max_duty(resolution_bits: u8) -> u32 {
    match resolution_bits {
        0 => 1,
        bits if bits >= 32 => u32::MAX,
        bits => (1u32 << bits) - 1,
    }
}

/// Convert a duty count at `max_duty` resolution into nanoseconds
pub fn duty_ns(duty: u32, max_duty: u32, period_ns: u64) -> u64 {
    let duty = u64::from(duty.min(max_duty));
    period_ns * duty / u64::from(max_duty.max(1))
}

impl PwmDriver for SysfsPwm {
    fn write(&self, channel: u8, duty: u32) {
        let Some(out) = self.outputs.get(&channel) else {
            warn!("No PWM output configured for channel {}", channel);
            return;
        };

        let ns = duty_ns(duty, out.max_duty, out.period_ns);
        if let Err(e) = fs::write(&out.duty_path, ns.to_string()) {
            warn!("PWM write to {} failed: {}", out.duty_path.display(), e);
        }
    }
}
