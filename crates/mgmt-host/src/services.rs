//! # Worker Services
//!
//! The runtime side of the server model. Each `worker=*` resource corresponds to a worker
//! held by a [`WorkerContainer`]; the resource's RUNTIME and VERIFY steps start, confirm,
//! reconfigure and stop workers here, and their rollback handlers undo it.
//!
//! The container is bounded: starting a worker past `capacity` fails, which is how an
//! `add` can fail *after* its model change was staged.

use indexmap::IndexMap;
use mgmt_controller::Value;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Units accepted by `keepalive-time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    pub const ALL: [TimeUnit; 7] = [
        TimeUnit::Nanoseconds,
        TimeUnit::Microseconds,
        TimeUnit::Milliseconds,
        TimeUnit::Seconds,
        TimeUnit::Minutes,
        TimeUnit::Hours,
        TimeUnit::Days,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "NANOSECONDS",
            TimeUnit::Microseconds => "MICROSECONDS",
            TimeUnit::Milliseconds => "MILLISECONDS",
            TimeUnit::Seconds => "SECONDS",
            TimeUnit::Minutes => "MINUTES",
            TimeUnit::Hours => "HOURS",
            TimeUnit::Days => "DAYS",
        }
    }

    pub fn to_duration(self, amount: u64) -> Duration {
        match self {
            TimeUnit::Nanoseconds => Duration::from_nanos(amount),
            TimeUnit::Microseconds => Duration::from_micros(amount),
            TimeUnit::Milliseconds => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
            TimeUnit::Minutes => Duration::from_secs(amount.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(amount.saturating_mul(3_600)),
            TimeUnit::Days => Duration::from_secs(amount.saturating_mul(86_400)),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = ServiceError;

    /// Case-insensitive, as the persisted form is lower case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeUnit::ALL
            .into_iter()
            .find(|unit| unit.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ServiceError::InvalidKeepAlive(format!("unknown time unit '{s}'")))
    }
}

/// How long an idle worker is kept alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    pub time: u64,
    pub unit: TimeUnit,
}

impl KeepAlive {
    pub fn new(time: u64, unit: TimeUnit) -> Self {
        Self { time, unit }
    }

    pub fn duration(&self) -> Duration {
        self.unit.to_duration(self.time)
    }

    /// Reads the `{time, unit}` object form.
    pub fn from_value(value: &Value) -> Result<Self, ServiceError> {
        let time = value
            .get("time")
            .and_then(Value::as_i64)
            .and_then(|t| u64::try_from(t).ok())
            .ok_or_else(|| ServiceError::InvalidKeepAlive(format!("bad time in {value}")))?;
        let unit = value
            .get("unit")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::InvalidKeepAlive(format!("missing unit in {value}")))?
            .parse()?;
        Ok(Self { time, unit })
    }

    pub fn to_value(&self) -> Value {
        Value::object()
            .with("time", self.time as i64)
            .with("unit", self.unit.as_str())
    }
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self::new(60, TimeUnit::Seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Started by a RUNTIME step, not yet confirmed.
    Starting,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worker {
    pub keepalive: KeepAlive,
    pub state: WorkerState,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("Worker container is full ({capacity} workers)")]
    CapacityReached { capacity: usize },

    #[error("Worker '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Worker '{0}' is not running")]
    NotRunning(String),

    #[error("Invalid keepalive-time: {0}")]
    InvalidKeepAlive(String),
}

/// The set of running workers. Clones share the same workers.
#[derive(Debug, Clone)]
pub struct WorkerContainer {
    capacity: usize,
    workers: Arc<Mutex<IndexMap<String, Worker>>>,
}

impl WorkerContainer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            workers: Arc::new(Mutex::new(IndexMap::new())),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn start(&self, name: &str, keepalive: KeepAlive) -> Result<(), ServiceError> {
        let mut workers = self.workers.lock();
        if workers.contains_key(name) {
            return Err(ServiceError::AlreadyRunning(name.to_string()));
        }
        if workers.len() >= self.capacity {
            return Err(ServiceError::CapacityReached {
                capacity: self.capacity,
            });
        }
        info!(worker = name, keepalive = ?keepalive.duration(), "Starting worker");
        workers.insert(
            name.to_string(),
            Worker {
                keepalive,
                state: WorkerState::Starting,
            },
        );
        Ok(())
    }

    /// Moves a started worker to `Running`.
    pub fn confirm(&self, name: &str) -> Result<(), ServiceError> {
        let mut workers = self.workers.lock();
        let worker = workers
            .get_mut(name)
            .ok_or_else(|| ServiceError::NotRunning(name.to_string()))?;
        worker.state = WorkerState::Running;
        debug!(worker = name, "Worker running");
        Ok(())
    }

    /// Stops a worker, returning its last configuration.
    pub fn stop(&self, name: &str) -> Option<Worker> {
        let stopped = self.workers.lock().shift_remove(name);
        if stopped.is_some() {
            info!(worker = name, "Stopped worker");
        }
        stopped
    }

    /// Restarts a stopped worker with its previous configuration, bypassing the capacity
    /// check since the slot it held was freed by the stop being undone.
    pub fn restore(&self, name: &str, worker: Worker) {
        debug!(worker = name, "Restoring worker");
        self.workers.lock().insert(name.to_string(), worker);
    }

    /// Applies a new keepalive to a running worker, returning the previous one.
    pub fn reconfigure(&self, name: &str, keepalive: KeepAlive) -> Result<KeepAlive, ServiceError> {
        let mut workers = self.workers.lock();
        let worker = workers
            .get_mut(name)
            .ok_or_else(|| ServiceError::NotRunning(name.to_string()))?;
        debug!(worker = name, old = ?worker.keepalive, new = ?keepalive, "Reconfiguring worker");
        Ok(std::mem::replace(&mut worker.keepalive, keepalive))
    }

    pub fn get(&self, name: &str) -> Option<Worker> {
        self.workers.lock().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.workers.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
