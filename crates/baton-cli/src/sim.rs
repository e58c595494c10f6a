// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Simulated robot on the other end of the I/O link.
//!
//! Two motors with encoders and one distance sensor facing a wall.
//! Driving motor A forward closes the distance. Every `glitch_every`th
//! frame carries an unreadable distance value.

use baton_rt::hardware::{IoChannel, MotorSetting, RawFrame};
use baton_rt::IoError;

pub const MOTOR_COUNT: usize = 2;
pub const SENSOR_COUNT: usize = 1;
pub const DISTANCE_SENSOR: usize = 0;

/// Encoder counts per unit of power per transfer, divided by this.
const POWER_SCALE: i64 = 10;
/// Encoder counts per millimetre of travel.
const COUNTS_PER_MM: i64 = 4;

#[derive(Debug, Clone)]
pub struct SimulatedChannel {
    encoders: [i64; MOTOR_COUNT],
    wall_mm: i64,
    glitch_every: u64,
    transfers: u64,
}

impl SimulatedChannel {
    pub fn new(wall_mm: i64) -> Self {
        Self {
            encoders: [0; MOTOR_COUNT],
            wall_mm,
            glitch_every: 0,
            transfers: 0,
        }
    }

    /// Make every `n`th distance reading unreadable. `0` disables.
    pub fn with_glitches(mut self, n: u64) -> Self {
        self.glitch_every = n;
        self
    }

    fn distance_mm(&self) -> i64 {
        (self.wall_mm - self.encoders[0] / COUNTS_PER_MM).max(0)
    }
}

impl IoChannel for SimulatedChannel {
    fn transfer(&mut self, motors: &[MotorSetting]) -> Result<RawFrame, IoError> {
        if motors.len() != MOTOR_COUNT {
            return Err(IoError::Link(format!(
                "expected {} motor settings, got {}",
                MOTOR_COUNT,
                motors.len()
            )));
        }
        self.transfers += 1;
        for (encoder, motor) in self.encoders.iter_mut().zip(motors) {
            if motor.enabled {
                *encoder += motor.power as i64 / POWER_SCALE;
            }
        }

        let glitch = self.glitch_every > 0 && self.transfers % self.glitch_every == 0;
        let distance = if glitch { None } else { Some(self.distance_mm()) };
        Ok(RawFrame {
            encoders: self.encoders.iter().copied().map(Some).collect(),
            sensors: vec![distance],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_power_closes_the_distance() {
        let mut sim = SimulatedChannel::new(100);
        let motors = [MotorSetting::run(200), MotorSetting::off()];
        for _ in 0..3 {
            sim.transfer(&motors).unwrap();
        }
        let frame = sim.transfer(&motors).unwrap();
        assert_eq!(frame.encoders, vec![Some(80), Some(0)]);
        assert_eq!(frame.sensors, vec![Some(80)]);
    }

    #[test]
    fn distance_never_goes_negative() {
        let mut sim = SimulatedChannel::new(1);
        let frame = sim
            .transfer(&[MotorSetting::run(255), MotorSetting::run(-255)])
            .unwrap();
        assert_eq!(frame.sensors, vec![Some(0)]);
        assert_eq!(frame.encoders[1], Some(-25));
    }

    #[test]
    fn glitches_come_back_as_invalid_readings() {
        let mut sim = SimulatedChannel::new(50).with_glitches(3);
        let motors = [MotorSetting::off(); MOTOR_COUNT];
        let readings: Vec<_> = (0..6)
            .map(|_| sim.transfer(&motors).unwrap().sensors[0])
            .collect();
        assert_eq!(
            readings,
            vec![Some(50), Some(50), None, Some(50), Some(50), None]
        );
    }

    #[test]
    fn wrong_motor_count_is_a_link_error() {
        let mut sim = SimulatedChannel::new(50);
        let err = sim.transfer(&[MotorSetting::off()]).unwrap_err();
        assert!(err.to_string().contains("expected 2"));
    }
}
