// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Hardware boundary.
//!
//! Once per tick the update task pushes the current motor settings over
//! an `IoChannel` and pulls back encoder and sensor readings. Behaviours
//! only ever see the shared `Registers`.
//!
//! A reading the channel could not decode comes back as `None` and is
//! replaced by `0`, so one bad frame never stops the control loop. The
//! substitution is counted and logged.

use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};

use crate::coroutine::suspend_until;
use crate::error::IoError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotorSetting {
    pub enabled: bool,
    /// Signed drive power, -255..=255 on the reference board.
    pub power: i32,
}

impl MotorSetting {
    pub fn run(power: i32) -> Self {
        Self {
            enabled: true,
            power,
        }
    }

    pub fn off() -> Self {
        Self::default()
    }
}

/// Readings as they came off the link. `None` is an invalid reading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    pub encoders: Vec<Option<i64>>,
    pub sensors: Vec<Option<i64>>,
}

/// One synchronous exchange with the hardware per tick.
pub trait IoChannel: Send {
    fn transfer(&mut self, motors: &[MotorSetting]) -> Result<RawFrame, IoError>;
}

/// Latest motor settings and sanitized readings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registers {
    pub motors: Vec<MotorSetting>,
    pub encoders: Vec<i64>,
    pub sensors: Vec<i64>,
    /// Invalid readings replaced by the default so far.
    pub substitutions: u64,
    pub transfers: u64,
    pub link_errors: u64,
}

pub type SharedRegisters = Arc<Mutex<Registers>>;

impl Registers {
    pub fn new(motor_count: usize, sensor_count: usize) -> Self {
        Self {
            motors: vec![MotorSetting::off(); motor_count],
            encoders: vec![0; motor_count],
            sensors: vec![0; sensor_count],
            ..Self::default()
        }
    }

    pub fn shared(motor_count: usize, sensor_count: usize) -> SharedRegisters {
        Arc::new(Mutex::new(Self::new(motor_count, sensor_count)))
    }

    /// Store a frame, substituting `0` for invalid readings. Returns the
    /// number of substitutions made.
    pub fn apply(&mut self, frame: RawFrame) -> usize {
        let mut substituted = sanitize_into(&mut self.encoders, &frame.encoders, "encoder");
        substituted += sanitize_into(&mut self.sensors, &frame.sensors, "sensor");
        self.substitutions += substituted as u64;
        self.transfers += 1;
        substituted
    }

    pub fn set_motor(&mut self, index: usize, setting: MotorSetting) {
        if let Some(slot) = self.motors.get_mut(index) {
            *slot = setting;
        } else {
            warn!("no motor at index {}", index);
        }
    }

    pub fn sensor(&self, index: usize) -> Option<i64> {
        self.sensors.get(index).copied()
    }

    pub fn encoder(&self, index: usize) -> Option<i64> {
        self.encoders.get(index).copied()
    }
}

fn sanitize_into(out: &mut Vec<i64>, raw: &[Option<i64>], kind: &str) -> usize {
    out.clear();
    let mut substituted = 0;
    for (port, value) in raw.iter().enumerate() {
        match value {
            Some(v) => out.push(*v),
            None => {
                debug!("invalid {} reading on port {}, using 0", kind, port);
                substituted += 1;
                out.push(0);
            }
        }
    }
    substituted
}

/// One exchange: send the motor settings, store the readings.
///
/// On a link error the previous readings are kept.
pub fn update_once<C: IoChannel + ?Sized>(
    channel: &mut C,
    registers: &Mutex<Registers>,
) -> Result<usize, IoError> {
    let motors = registers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .motors
        .clone();

    let result = channel.transfer(&motors);
    let mut regs = registers.lock().unwrap_or_else(PoisonError::into_inner);
    match result {
        Ok(frame) => Ok(regs.apply(frame)),
        Err(e) => {
            regs.link_errors += 1;
            Err(e)
        }
    }
}

/// Body of the periodic update task: one exchange per tick, forever.
pub fn update_body<C>(mut channel: C, registers: SharedRegisters) -> impl FnOnce() + Send
where
    C: IoChannel + 'static,
{
    move || {
        suspend_until(|| {
            if let Err(e) = update_once(&mut channel, &registers) {
                warn!("hardware update failed: {}", e);
            }
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Group, Scheduler};

    /// Echoes motor power into the encoders; sensor 0 goes bad on odd
    /// transfers, every third transfer fails outright.
    struct Flaky {
        count: u32,
        seen: Arc<Mutex<Vec<Vec<MotorSetting>>>>,
    }

    impl IoChannel for Flaky {
        fn transfer(&mut self, motors: &[MotorSetting]) -> Result<RawFrame, IoError> {
            self.count += 1;
            self.seen.lock().unwrap().push(motors.to_vec());
            if self.count % 3 == 0 {
                return Err(IoError::Link("checksum mismatch".into()));
            }
            let bad = self.count % 2 == 1;
            Ok(RawFrame {
                encoders: motors.iter().map(|m| Some(m.power as i64)).collect(),
                sensors: vec![if bad { None } else { Some(40) }, Some(7)],
            })
        }
    }

    #[test]
    fn invalid_readings_become_zero() {
        let mut regs = Registers::new(2, 2);
        let n = regs.apply(RawFrame {
            encoders: vec![Some(10), None],
            sensors: vec![None, Some(3)],
        });
        assert_eq!(n, 2);
        assert_eq!(regs.encoders, vec![10, 0]);
        assert_eq!(regs.sensors, vec![0, 3]);
        assert_eq!(regs.substitutions, 2);
        assert_eq!(regs.transfers, 1);
    }

    #[test]
    fn link_error_keeps_previous_readings() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut chan = Flaky {
            count: 1,
            seen: seen.clone(),
        };
        let regs = Mutex::new(Registers::new(1, 2));
        regs.lock().unwrap().set_motor(0, MotorSetting::run(120));

        // count 2: good frame.
        assert_eq!(update_once(&mut chan, &regs).unwrap(), 0);
        assert_eq!(regs.lock().unwrap().sensors, vec![40, 7]);
        // count 3: link error.
        assert!(update_once(&mut chan, &regs).is_err());
        let r = regs.lock().unwrap();
        assert_eq!(r.sensors, vec![40, 7]);
        assert_eq!(r.encoders, vec![120]);
        assert_eq!(r.link_errors, 1);
        assert_eq!(seen.lock().unwrap()[0], vec![MotorSetting::run(120)]);
    }

    #[test]
    fn update_task_runs_once_per_tick() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let regs = Registers::shared(1, 2);
        let mut sched = Scheduler::default();
        sched
            .add_coroutine(
                Group::Update,
                update_body(
                    Flaky {
                        count: 0,
                        seen: seen.clone(),
                    },
                    regs.clone(),
                ),
            )
            .unwrap();

        for _ in 0..6 {
            sched.drive_tick();
        }
        assert_eq!(seen.lock().unwrap().len(), 6);
        let r = regs.lock().unwrap();
        // Transfers 3 and 6 failed; 1 and 5 had a bad sensor.
        assert_eq!(r.transfers, 4);
        assert_eq!(r.link_errors, 2);
        assert_eq!(r.substitutions, 2);
        assert_eq!(sched.len(), 1);
    }

    #[test]
    fn out_of_range_motor_is_ignored() {
        let mut regs = Registers::new(1, 0);
        regs.set_motor(5, MotorSetting::run(10));
        assert_eq!(regs.motors, vec![MotorSetting::off()]);
        assert_eq!(regs.sensor(0), None);
        assert_eq!(regs.encoder(0), Some(0));
    }
}
