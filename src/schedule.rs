//! Polling scheduler for periodic lifecycle tasks.
//!
//! Jobs run on the calling thread, one at a time, in registration order. The
//! loop wakes every `tick` to check which jobs are due, so a job may start up
//! to one tick late. Shutdown is only observed between jobs: a running job
//! always completes.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, SystemTime};

use log::{debug, info};
use time::{OffsetDateTime, Time, UtcOffset};

use crate::clock::Clock;

/// Longest `Cadence::Every` period honoured; longer periods are capped.
pub const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// When a job becomes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Once per period, measured from the end of the previous run.
    Every(Duration),
    /// Once per day, at the given local time of day.
    DailyAt(Time),
}

/// Cooperative shutdown flag that can also be waited on.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner()) = true;
        cvar.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep for up to `timeout`. Returns `true` if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |requested| !*requested)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

type Task = Box<dyn FnMut() + Send>;

struct Job {
    name: String,
    cadence: Cadence,
    next_run: SystemTime,
    task: Task,
}

/// Runs registered jobs when they fall due.
pub struct Scheduler {
    jobs: Vec<Job>,
    tick: Duration,
    clock: Arc<dyn Clock>,
    offset: UtcOffset,
}

impl Scheduler {
    pub fn new(tick: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: Vec::new(),
            tick,
            clock,
            offset: UtcOffset::UTC,
        }
    }

    /// Offset used to interpret `Cadence::DailyAt` times. Defaults to UTC.
    pub fn with_utc_offset(mut self, offset: UtcOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Register a job. Its first run is one cadence from now.
    pub fn add(&mut self, name: impl Into<String>, cadence: Cadence, task: impl FnMut() + Send + 'static) {
        let name = name.into();
        let next_run = self.next_after(cadence, self.clock.now());
        debug!("Scheduled {} ({:?}), first run at {:?}", name, cadence, next_run);
        self.jobs.push(Job {
            name,
            cadence,
            next_run,
            task: Box::new(task),
        });
    }

    pub fn every(&mut self, name: impl Into<String>, period: Duration, task: impl FnMut() + Send + 'static) {
        self.add(name, Cadence::Every(period), task);
    }

    pub fn daily_at(&mut self, name: impl Into<String>, at: Time, task: impl FnMut() + Send + 'static) {
        self.add(name, Cadence::DailyAt(at), task);
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|job| job.name.as_str()).collect()
    }

    /// Next scheduled run of the named job.
    pub fn next_run(&self, name: &str) -> Option<SystemTime> {
        self.jobs.iter().find(|j| j.name == name).map(|j| j.next_run)
    }

    /// Run the named job immediately and reschedule it from now.
    ///
    /// Returns `false` if no such job is registered.
    pub fn run_now(&mut self, name: &str) -> bool {
        let Some(index) = self.jobs.iter().position(|j| j.name == name) else {
            return false;
        };
        self.run_job(index);
        true
    }

    /// Run every job that is due, stopping early if shutdown is requested.
    ///
    /// Returns the number of jobs run.
    pub fn run_pending(&mut self, shutdown: &Shutdown) -> usize {
        let mut ran = 0;
        for index in 0..self.jobs.len() {
            if shutdown.is_requested() {
                break;
            }
            if self.jobs[index].next_run <= self.clock.now() {
                self.run_job(index);
                ran += 1;
            }
        }
        ran
    }

    /// Poll until shutdown is requested.
    pub fn run(&mut self, shutdown: &Shutdown) {
        info!("Scheduler started with {} jobs, tick {:?}", self.jobs.len(), self.tick);
        loop {
            self.run_pending(shutdown);
            if shutdown.is_requested() || shutdown.wait_timeout(self.tick) {
                break;
            }
        }
        info!("Scheduler stopped");
    }

    fn run_job(&mut self, index: usize) {
        let job = &mut self.jobs[index];
        debug!("Running job {}", job.name);
        (job.task)();
        let cadence = job.cadence;
        let next_run = self.next_after(cadence, self.clock.now());
        self.jobs[index].next_run = next_run;
    }

    fn next_after(&self, cadence: Cadence, now: SystemTime) -> SystemTime {
        match cadence {
            Cadence::Every(period) => now.checked_add(period.min(MAX_PERIOD)).unwrap_or(now),
            Cadence::DailyAt(at) => next_daily(at, now, self.offset),
        }
    }
}

/// First instant strictly after `now` whose local time of day is `at`.
fn next_daily(at: Time, now: SystemTime, offset: UtcOffset) -> SystemTime {
    let local = OffsetDateTime::from(now).to_offset(offset);
    let mut candidate = local.date().with_time(at).assume_offset(offset);
    if candidate <= local {
        candidate += time::Duration::days(1);
    }
    SystemTime::from(candidate)
}
