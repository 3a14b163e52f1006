//! Per-motion-kind speed ceilings.
//!
//! Values are in MAX_SPEED register units. UNBOUND is the drive's
//! programmed maximum and is read-only; HOMING is stored as a percentage
//! of UNBOUND.

use stepper_common::axis::params::AxisParameters;
use stepper_common::axis::types::SpeedChannel;

/// Speed channel table of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedChannelRegistry {
    values: [u32; SpeedChannel::COUNT],
    /// HOMING channel as a percentage of UNBOUND.
    home_percent: u32,
    unbound: u32,
}

impl SpeedChannelRegistry {
    pub const fn new(unbound: u32, home_percent: u32, jog: u32) -> Self {
        let mut values = [0; SpeedChannel::COUNT];
        values[SpeedChannel::Jog as usize] = jog;
        Self {
            values,
            home_percent,
            unbound,
        }
    }

    /// Channels as configured by a parameter set; motion channels start at zero.
    pub fn from_params(params: &AxisParameters) -> Self {
        Self::new(
            params.drive.max_speed,
            params.home.home_velocity,
            params.jog.max_vel.max(0) as u32,
        )
    }

    #[inline]
    pub const fn unbound(&self) -> u32 {
        self.unbound
    }

    #[inline]
    pub const fn home_percent(&self) -> u32 {
        self.home_percent
    }

    pub fn get(&self, channel: SpeedChannel) -> u32 {
        match channel {
            SpeedChannel::Unbound => self.unbound,
            SpeedChannel::Homing => {
                let scaled = u64::from(self.home_percent) * u64::from(self.unbound) / 100;
                scaled.min(u64::from(self.unbound)) as u32
            }
            other => self.values[other.index()],
        }
    }

    /// Store a channel value. Callers clamp to UNBOUND before use.
    ///
    /// Setting UNBOUND has no effect; HOMING is converted back to a
    /// percentage.
    pub fn set(&mut self, channel: SpeedChannel, value: u32) {
        match channel {
            SpeedChannel::Unbound => {}
            SpeedChannel::Homing => {
                self.home_percent = if self.unbound == 0 {
                    0
                } else {
                    let percent = u64::from(value) * 100 / u64::from(self.unbound);
                    u32::try_from(percent).unwrap_or(u32::MAX)
                };
            }
            other => self.values[other.index()] = value,
        }
    }

    /// Raise the motion channels to UNBOUND on activation.
    ///
    /// JOG is only raised when zero, for parameter sets that never
    /// configured it.
    pub fn reset_all_to_unbound(&mut self) {
        for ch in [
            SpeedChannel::Absolute,
            SpeedChannel::Relative,
            SpeedChannel::Velocity,
        ] {
            self.values[ch.index()] = self.unbound;
        }
        if self.values[SpeedChannel::Jog.index()] == 0 {
            self.values[SpeedChannel::Jog.index()] = self.unbound;
        }
    }

    /// Zero the move channels (connection reset).
    pub fn clear_motion(&mut self) {
        for ch in [
            SpeedChannel::Absolute,
            SpeedChannel::Relative,
            SpeedChannel::Velocity,
        ] {
            self.values[ch.index()] = 0;
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_is_read_only() {
        let mut reg = SpeedChannelRegistry::new(400, 50, 0);
        reg.set(SpeedChannel::Unbound, 10);
        assert_eq!(reg.get(SpeedChannel::Unbound), 400);
    }

    #[test]
    fn homing_is_percentage_of_unbound() {
        let mut reg = SpeedChannelRegistry::new(400, 50, 0);
        assert_eq!(reg.get(SpeedChannel::Homing), 200);

        reg.set(SpeedChannel::Homing, 100);
        assert_eq!(reg.home_percent(), 25);
        assert_eq!(reg.get(SpeedChannel::Homing), 100);
    }

    #[test]
    fn corrupt_home_percent_is_capped_at_unbound() {
        let reg = SpeedChannelRegistry::new(1023, u32::MAX, 0);
        assert_eq!(reg.get(SpeedChannel::Homing), 1023);

        let mut reg = SpeedChannelRegistry::new(1, 0, 0);
        reg.set(SpeedChannel::Homing, u32::MAX);
        assert_eq!(reg.home_percent(), u32::MAX);
        assert_eq!(reg.get(SpeedChannel::Homing), 1);
    }

    #[test]
    fn reset_raises_motion_channels() {
        let mut reg = SpeedChannelRegistry::new(400, 50, 0);
        reg.set(SpeedChannel::Joystick, 7);
        reg.reset_all_to_unbound();
        assert_eq!(reg.get(SpeedChannel::Absolute), 400);
        assert_eq!(reg.get(SpeedChannel::Relative), 400);
        assert_eq!(reg.get(SpeedChannel::Velocity), 400);
        assert_eq!(reg.get(SpeedChannel::Jog), 400);
        assert_eq!(reg.get(SpeedChannel::Joystick), 7);
    }

    #[test]
    fn configured_jog_survives_reset() {
        let mut reg = SpeedChannelRegistry::new(400, 50, 120);
        reg.reset_all_to_unbound();
        assert_eq!(reg.get(SpeedChannel::Jog), 120);
    }

    #[test]
    fn zero_unbound_does_not_divide() {
        let mut reg = SpeedChannelRegistry::new(0, 50, 0);
        reg.set(SpeedChannel::Homing, 100);
        assert_eq!(reg.get(SpeedChannel::Homing), 0);
    }
}
