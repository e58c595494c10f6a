// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `baton demo`: a simulated robot driven by straight-line behaviours.
//!
//! - update: one hardware exchange per tick
//! - sensor: reports the distance every 500ms and kicks off the drive
//! - action: motor A forward for 300ms, then a second action reverses it

use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use colored::Colorize;
use log::info;

use baton_rt::hardware::{update_body, MotorSetting, Registers, SharedRegisters};
use baton_rt::{
    clock, run_ticks, suspend_for, Group, RuntimeError, Scheduler, SchedulerConfig,
    SchedulerHandle,
};

use crate::output;
use crate::sim::{SimulatedChannel, DISTANCE_SENSOR, MOTOR_COUNT, SENSOR_COUNT};

pub const DEFAULT_MAX_TICKS: u64 = 100;

const MOTOR_A: usize = 0;
const WALL_MM: i64 = 400;
const DRIVE_POWER: i32 = 150;
const DRIVE_TIME: Duration = Duration::from_millis(300);
const REPORT_EVERY: Duration = Duration::from_millis(500);
const GLITCH_EVERY: u64 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoOptions {
    pub max_ticks: u64,
    /// Overrides `BATON_TICK_MS` when set.
    pub tick_interval: Option<Duration>,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            max_ticks: DEFAULT_MAX_TICKS,
            tick_interval: None,
        }
    }
}

pub fn cmd_demo(opts: DemoOptions) {
    let mut config = SchedulerConfig::from_env();
    if let Some(interval) = opts.tick_interval {
        config = config.with_tick_interval(interval);
    }
    println!(
        "{}\n",
        output::banner_title(&format!(
            "Simulated robot, {}ms tick",
            config.tick_interval.as_millis()
        ))
    );

    let mut sched = Scheduler::new(config);
    let regs = Registers::shared(MOTOR_COUNT, SENSOR_COUNT);
    let finished = Arc::new(AtomicBool::new(false));

    if let Err(e) = start_tasks(&mut sched, &regs, &finished) {
        eprintln!("{}: {}", output::error_label(), e);
        process::exit(1);
    }

    let ticks = run_ticks(&mut sched, |s| {
        s.tick_count() < opts.max_ticks && !finished.load(Ordering::SeqCst)
    });
    let failure = sched.last_failure().cloned();
    sched.stop_all();
    info!("demo stopped after {} ticks", ticks);

    let done = finished.load(Ordering::SeqCst);
    print_summary(ticks, &regs, done);

    match failure {
        Some(f) => {
            eprintln!("\n{}", output::banner_fail("Demo", f.message()));
            process::exit(1);
        }
        None => println!("\n{}", output::banner_ok("Demo")),
    }
}

fn start_tasks(
    sched: &mut Scheduler,
    regs: &SharedRegisters,
    finished: &Arc<AtomicBool>,
) -> Result<(), RuntimeError> {
    let channel = SimulatedChannel::new(WALL_MM).with_glitches(GLITCH_EVERY);
    sched.add_coroutine(Group::Update, update_body(channel, regs.clone()))?;

    let handle = sched.handle();
    let regs = regs.clone();
    let done = finished.clone();
    sched.add_coroutine(Group::Sensor, move || -> Result<(), RuntimeError> {
        let mut drive_started = false;
        while !done.load(Ordering::SeqCst) {
            let distance = lock(&regs).sensor(DISTANCE_SENSOR).unwrap_or(0);
            report(Group::Sensor, format!("distance {}mm", distance));
            if !drive_started {
                let forward = drive_forward(regs.clone(), handle.clone(), done.clone());
                handle.add_coroutine(Group::Action, forward)?;
                drive_started = true;
            }
            suspend_for(REPORT_EVERY);
        }
        Ok(())
    })?;
    Ok(())
}

fn drive_forward(
    regs: SharedRegisters,
    handle: SchedulerHandle,
    done: Arc<AtomicBool>,
) -> impl FnOnce() -> Result<(), RuntimeError> + Send {
    move || {
        set_motor(&regs, MotorSetting::run(DRIVE_POWER));
        suspend_for(DRIVE_TIME);
        set_motor(&regs, MotorSetting::off());
        handle.add_coroutine(Group::Action, drive_back(regs, done))?;
        Ok(())
    }
}

fn drive_back(regs: SharedRegisters, done: Arc<AtomicBool>) -> impl FnOnce() + Send {
    move || {
        set_motor(&regs, MotorSetting::run(-DRIVE_POWER));
        suspend_for(DRIVE_TIME);
        set_motor(&regs, MotorSetting::off());
        done.store(true, Ordering::SeqCst);
    }
}

fn set_motor(regs: &Mutex<Registers>, setting: MotorSetting) {
    lock(regs).set_motor(MOTOR_A, setting);
    let power = if setting.enabled { setting.power } else { 0 };
    report(
        Group::Action,
        format!("motor A {}", output::motor_power(power)),
    );
}

fn lock(regs: &Mutex<Registers>) -> std::sync::MutexGuard<'_, Registers> {
    regs.lock().unwrap_or_else(PoisonError::into_inner)
}

fn report(group: Group, msg: String) {
    println!(
        "{} {} {}",
        output::timestamp(clock::now_millis()),
        output::group_label(group.name()),
        msg
    );
}

fn print_summary(ticks: u64, regs: &Mutex<Registers>, finished: bool) {
    let r = lock(regs);
    println!("\n{}", output::banner_title("Summary"));
    println!("  {}", output::count("ticks", ticks));
    println!("  {}", output::count("transfers", r.transfers));
    println!("  {}", output::warn_count("substitutions", r.substitutions));
    println!("  {}", output::warn_count("link errors", r.link_errors));
    println!(
        "  {:<14} {}",
        "encoder A",
        r.encoder(MOTOR_A).unwrap_or(0).to_string().bold()
    );

    if finished {
        println!("\n{} drive finished", output::status_pass());
    } else {
        println!(
            "\n{} tick limit reached before the drive finished",
            output::status_warn()
        );
    }
}
