// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Tick scheduler.
//!
//! Holds the registered tasks in three groups and steps each of them
//! exactly once per `drive_tick()`: the update task first, then sensor
//! behaviours, then actions, insertion order within a group. Tasks seen
//! terminated after their step are removed.
//!
//! Bodies running inside a tick cannot borrow the scheduler, so they get
//! a `SchedulerHandle`. Its requests go to an injector queue that the
//! next tick drains before stepping anything.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, info, warn};

use crate::clock::{SystemClock, TimeSource};
use crate::coroutine::Coroutine;
use crate::driver::TickDriver;
use crate::error::{BodyOutcome, Failure, RuntimeError};
use crate::generator::{Generator, StepGroup};
use crate::task::{Steppable, TaskId};

/// Default tick period of the control loop.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(20);

/// Environment variable overriding the tick period, in milliseconds.
pub const TICK_ENV: &str = "BATON_TICK_MS";

/// Registration groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    /// Periodic hardware update. At most one task.
    Update,
    /// Per-sensor behaviours. Any number, independent.
    Sensor,
    /// Motion behaviours. Adding one stops the others.
    Action,
}

impl Group {
    /// Stepping order within a tick.
    pub const ALL: [Group; 3] = [Group::Update, Group::Sensor, Group::Action];

    pub fn name(self) -> &'static str {
        match self {
            Group::Update => "update",
            Group::Sensor => "sensor",
            Group::Action => "action",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
}

impl SchedulerConfig {
    /// Defaults, with the tick period taken from `BATON_TICK_MS` when it
    /// holds a positive integer.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(TICK_ENV) {
            match parse_tick_ms(&raw) {
                Some(interval) => config.tick_interval = interval,
                None => warn!("ignoring {}={:?}: expected a positive integer", TICK_ENV, raw),
            }
        }
        config
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

/// Parse a tick period in whole milliseconds. Zero is rejected.
pub fn parse_tick_ms(raw: &str) -> Option<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => None,
    }
}

struct Entry {
    group: Group,
    task: Box<dyn Steppable>,
}

enum Request {
    Add {
        id: TaskId,
        group: Group,
        task: Box<dyn Steppable>,
    },
    Stop(TaskId),
    StopGroup(Group),
}

/// Requests queued from outside the driving thread.
struct Injector {
    queue: Mutex<Vec<Request>>,
    next_id: AtomicU64,
}

impl Injector {
    fn next_id(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn push(&self, request: Request) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
    }

    fn drain(&self) -> Vec<Request> {
        std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    tasks: IndexMap<TaskId, Entry>,
    injector: Arc<Injector>,
    step_group: StepGroup,
    clock: Arc<dyn TimeSource>,
    tick_started: Option<f64>,
    ticks: u64,
    last_failure: Option<Failure>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Scheduler measuring tick timing against `clock`.
    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            config,
            tasks: IndexMap::new(),
            injector: Arc::new(Injector {
                queue: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
            step_group: StepGroup::new(),
            clock,
            tick_started: None,
            ticks: 0,
            last_failure: None,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Handle usable from coroutine bodies and other threads.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            injector: self.injector.clone(),
            step_group: self.step_group.clone(),
        }
    }

    /// The step group generator adapters of this scheduler belong to.
    pub fn step_group(&self) -> &StepGroup {
        &self.step_group
    }

    /// Register a task, applying the group's policy first.
    pub fn add(&mut self, group: Group, task: Box<dyn Steppable>) -> TaskId {
        let id = self.injector.next_id();
        self.insert(id, group, task);
        id
    }

    /// Spawn a coroutine for `body` and register it.
    pub fn add_coroutine<F, O>(&mut self, group: Group, body: F) -> Result<TaskId, RuntimeError>
    where
        F: FnOnce() -> O + Send + 'static,
        O: BodyOutcome,
    {
        let co = Coroutine::new(body)?;
        Ok(self.add(group, Box::new(co)))
    }

    /// Wrap `generator` in an adapter of this scheduler's step group and
    /// register it.
    pub fn add_generator<G: Generator>(
        &mut self,
        group: Group,
        generator: G,
    ) -> Result<TaskId, RuntimeError> {
        let adapter = self.step_group.spawn(generator)?;
        Ok(self.add(group, Box::new(adapter)))
    }

    /// Stop and remove one task. Returns false if it is not registered.
    pub fn stop(&mut self, id: TaskId) -> bool {
        match self.tasks.shift_remove(&id) {
            Some(entry) => {
                entry.task.request_stop();
                self.note_exit(id, entry.group, entry.task.as_ref());
                true
            }
            None => false,
        }
    }

    /// Stop and remove every task in `group`.
    pub fn stop_group(&mut self, group: Group) {
        for id in self.ids_in(group) {
            self.stop(id);
        }
    }

    /// Stop everything, including tasks still queued in the injector.
    pub fn stop_all(&mut self) {
        for request in self.injector.drain() {
            if let Request::Add { task, .. } = request {
                task.request_stop();
            }
        }
        for group in Group::ALL {
            self.stop_group(group);
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn group_len(&self, group: Group) -> usize {
        self.tasks.values().filter(|e| e.group == group).count()
    }

    /// Ticks driven so far.
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    /// Most recent failure of a task reaped by this scheduler.
    pub fn last_failure(&self) -> Option<&Failure> {
        self.last_failure.as_ref()
    }

    /// Step every registered task once.
    pub fn drive_tick(&mut self) {
        self.tick_started = Some(self.clock.now_millis());
        self.apply_requests();

        let order: Vec<TaskId> = Group::ALL
            .iter()
            .flat_map(|&group| self.ids_in(group))
            .collect();

        for id in order {
            let Some(entry) = self.tasks.get(&id) else {
                continue;
            };
            entry.task.step();
            if !entry.task.is_alive() {
                if let Some(entry) = self.tasks.shift_remove(&id) {
                    self.note_exit(id, entry.group, entry.task.as_ref());
                }
            }
        }

        self.ticks += 1;
    }

    /// Milliseconds until the next tick is due. Zero before the first
    /// tick and whenever a tick overran the interval.
    pub fn time_millis_to_next_wake(&self) -> f64 {
        let Some(started) = self.tick_started else {
            return 0.0;
        };
        let interval = self.config.tick_interval.as_secs_f64() * 1000.0;
        let spent = self.clock.now_millis() - started;
        (interval - spent).max(0.0)
    }

    fn ids_in(&self, group: Group) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|(_, e)| e.group == group)
            .map(|(id, _)| *id)
            .collect()
    }

    fn insert(&mut self, id: TaskId, group: Group, task: Box<dyn Steppable>) {
        match group {
            Group::Update | Group::Action => self.stop_group(group),
            Group::Sensor => {}
        }
        debug!("{} registered in {} group", id, group);
        self.tasks.insert(id, Entry { group, task });
    }

    fn apply_requests(&mut self) {
        for request in self.injector.drain() {
            match request {
                Request::Add { id, group, task } => self.insert(id, group, task),
                Request::Stop(id) => {
                    if !self.stop(id) {
                        debug!("stop request for unknown {}", id);
                    }
                }
                Request::StopGroup(group) => self.stop_group(group),
            }
        }
    }

    fn note_exit(&mut self, id: TaskId, group: Group, task: &dyn Steppable) {
        match task.last_failure() {
            Some(failure) => {
                warn!("{} ({} group) terminated with failure: {}", id, group, failure);
                self.last_failure = Some(failure);
            }
            None => info!("{} ({} group) finished", id, group),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl TickDriver for Scheduler {
    fn register(&mut self, group: Group, task: Box<dyn Steppable>) -> TaskId {
        self.add(group, task)
    }

    fn drive_tick(&mut self) {
        Scheduler::drive_tick(self)
    }

    fn time_millis_to_next_wake(&self) -> f64 {
        Scheduler::time_millis_to_next_wake(self)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("tasks", &self.tasks.len())
            .field("ticks", &self.ticks)
            .finish()
    }
}

/// Cloneable, thread-safe way to register or stop tasks. Takes effect at
/// the start of the next tick.
#[derive(Clone)]
pub struct SchedulerHandle {
    injector: Arc<Injector>,
    step_group: StepGroup,
}

impl SchedulerHandle {
    pub fn add(&self, group: Group, task: Box<dyn Steppable>) -> TaskId {
        let id = self.injector.next_id();
        self.injector.push(Request::Add { id, group, task });
        id
    }

    pub fn add_coroutine<F, O>(&self, group: Group, body: F) -> Result<TaskId, RuntimeError>
    where
        F: FnOnce() -> O + Send + 'static,
        O: BodyOutcome,
    {
        let co = Coroutine::new(body)?;
        Ok(self.add(group, Box::new(co)))
    }

    pub fn add_generator<G: Generator>(
        &self,
        group: Group,
        generator: G,
    ) -> Result<TaskId, RuntimeError> {
        let adapter = self.step_group.spawn(generator)?;
        Ok(self.add(group, Box::new(adapter)))
    }

    pub fn stop(&self, id: TaskId) {
        self.injector.push(Request::Stop(id));
    }

    pub fn stop_group(&self, group: Group) {
        self.injector.push(Request::StopGroup(group));
    }
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle").finish_non_exhaustive()
    }
}
