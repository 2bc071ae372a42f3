//! Cooperative tick scheduler
//!
//! Runs registered `(init, task, period_ms)` triples at their periods from
//! a single thread of execution. The scheduler owns no clock: the embedder
//! drives it by calling [`TickScheduler::tick`] once per base tick from a
//! timer interrupt or a timed main loop, and every period is measured in
//! multiples of that tick.
//!
//! The deferred-task facility schedules a one-shot closure after a delay.
//! This is the intended hook for RS-485 direction-pin timing: when the
//! engine requests `dir_ctrl(TxOnly)`, the embedder can defer the physical
//! switch back to receive until the final bit has left the wire.

use tracing::debug;

use crate::error::{ModbusError, ModbusResult};

/// Periodic task body
pub type TaskFn = Box<dyn FnMut() + Send>;

/// One-time initialisation hook run at [`TickScheduler::start`]
pub type InitFn = Box<dyn FnOnce() + Send>;

struct TickTask {
    init: Option<InitFn>,
    task: Option<TaskFn>,
    period_ms: u32,
    elapsed_ms: u32,
}

struct DeferredTask {
    remaining_ms: u32,
    f: Option<InitFn>,
}

/// Cooperative scheduler driven by an external monotonic tick source
pub struct TickScheduler {
    tick_ms: u32,
    tasks: Vec<TickTask>,
    deferred: Vec<DeferredTask>,
    started: bool,
}

impl TickScheduler {
    /// Create a scheduler with the given base tick period
    pub fn new(tick_ms: u32) -> ModbusResult<Self> {
        if tick_ms == 0 {
            return Err(ModbusError::configuration("tick period must be non-zero"));
        }
        Ok(Self {
            tick_ms,
            tasks: Vec::new(),
            deferred: Vec::new(),
            started: false,
        })
    }

    /// Base tick period
    #[inline]
    pub fn tick_ms(&self) -> u32 {
        self.tick_ms
    }

    /// Number of registered periodic tasks
    #[inline]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Number of deferred one-shots not yet fired
    #[inline]
    pub fn pending_deferred(&self) -> usize {
        self.deferred.len()
    }

    /// Register a periodic task
    ///
    /// `init` runs once at [`TickScheduler::start`] (or immediately when
    /// registering after the scheduler started); `task` then runs every
    /// `period_ms`. Periods shorter than the base tick fire on every tick.
    pub fn register(
        &mut self,
        init: Option<InitFn>,
        task: Option<TaskFn>,
        period_ms: u32,
    ) -> ModbusResult<()> {
        if period_ms == 0 {
            return Err(ModbusError::configuration("task period must be non-zero"));
        }
        let mut entry = TickTask {
            init,
            task,
            period_ms,
            elapsed_ms: 0,
        };
        if self.started {
            if let Some(init) = entry.init.take() {
                init();
            }
        }
        self.tasks.push(entry);
        debug!("task registered: period={}ms", period_ms);
        Ok(())
    }

    /// Schedule a one-shot closure `delay_ms` after the current tick
    ///
    /// A zero delay fires on the next tick.
    pub fn defer(&mut self, delay_ms: u32, f: impl FnOnce() + Send + 'static) {
        self.deferred.push(DeferredTask {
            remaining_ms: delay_ms,
            f: Some(Box::new(f)),
        });
    }

    /// Run every pending init hook once
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        for task in &mut self.tasks {
            if let Some(init) = task.init.take() {
                init();
            }
        }
        self.started = true;
        debug!("scheduler started: {} tasks, tick={}ms", self.tasks.len(), self.tick_ms);
    }

    /// Advance time by one base tick and fire everything that became due
    pub fn tick(&mut self) {
        for task in &mut self.tasks {
            task.elapsed_ms = task.elapsed_ms.saturating_add(self.tick_ms);
            if task.elapsed_ms >= task.period_ms {
                task.elapsed_ms = 0;
                if let Some(f) = task.task.as_mut() {
                    f();
                }
            }
        }

        let mut due = Vec::new();
        for deferred in &mut self.deferred {
            deferred.remaining_ms = deferred.remaining_ms.saturating_sub(self.tick_ms);
            if deferred.remaining_ms == 0 {
                if let Some(f) = deferred.f.take() {
                    due.push(f);
                }
            }
        }
        self.deferred.retain(|d| d.f.is_some());
        for f in due {
            f();
        }
    }
}
