//! Client-side view of one run and the merge rules for stream updates.

use runwatch_core::{
    stream_wire::StreamUpdate, Event, EventId, RunDetail, RunStatus, Task, TaskId,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Seeded,
    EventAppended { event_id: EventId, evicted: usize },
    RunStatusChanged { from: RunStatus, to: RunStatus },
    TaskReplaced { task_id: TaskId },
}

type Observer = Box<dyn FnMut(&StoreChange, &RunDetail) + Send>;

struct ObserverSlot {
    active: Arc<AtomicBool>,
    observer: Observer,
}

/// Handle returned by [`Reconciler::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the observer"]
#[derive(Debug)]
pub struct Subscription {
    active: Arc<AtomicBool>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

pub struct Reconciler {
    capacity: usize,
    detail: Option<RunDetail>,
    observers: Vec<ObserverSlot>,
}

impl Reconciler {
    pub fn new(event_capacity: usize) -> Self {
        Self {
            capacity: event_capacity.max(1),
            detail: None,
            observers: Vec::new(),
        }
    }

    pub fn detail(&self) -> Option<&RunDetail> {
        self.detail.as_ref()
    }

    pub fn is_seeded(&self) -> bool {
        self.detail.is_some()
    }

    /// Registers an observer called synchronously after every mutation.
    pub fn subscribe<F>(&mut self, observer: F) -> Subscription
    where
        F: FnMut(&StoreChange, &RunDetail) + Send + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        self.observers.push(ObserverSlot {
            active: Arc::clone(&active),
            observer: Box::new(observer),
        });
        Subscription { active }
    }

    /// Replaces the whole view with a server baseline.
    pub fn seed(&mut self, mut detail: RunDetail) {
        detail.recent_events.truncate(self.capacity);
        self.detail = Some(detail);
        self.notify(StoreChange::Seeded);
    }

    pub fn apply(&mut self, update: StreamUpdate) -> bool {
        match update {
            StreamUpdate::Event { event } => self.apply_event(event),
            StreamUpdate::RunUpdate { status } => self.apply_run_update(status),
            StreamUpdate::TaskUpdate { task } => self.apply_task_update(task),
        }
    }

    /// Prepends `event` and evicts the oldest entries beyond capacity.
    /// Identifiers are not deduplicated.
    pub fn apply_event(&mut self, event: Event) -> bool {
        let Some(detail) = self.detail.as_mut() else {
            debug!(event = "update_before_seed", kind = "event", event_id = event.id);
            return false;
        };
        let event_id = event.id;
        detail.recent_events.insert(0, event);
        let evicted = detail.recent_events.len().saturating_sub(self.capacity);
        detail.recent_events.truncate(self.capacity);
        self.notify(StoreChange::EventAppended { event_id, evicted });
        true
    }

    /// Replaces the run status and nothing else.
    pub fn apply_run_update(&mut self, status: RunStatus) -> bool {
        let Some(detail) = self.detail.as_mut() else {
            debug!(event = "update_before_seed", kind = "run_update", status = %status);
            return false;
        };
        let from = std::mem::replace(&mut detail.run.status, status);
        self.notify(StoreChange::RunStatusChanged { from, to: status });
        true
    }

    /// Replaces a known task in place. Tasks first seen on the stream are dropped
    /// until the next seed brings them in.
    pub fn apply_task_update(&mut self, task: Task) -> bool {
        let Some(detail) = self.detail.as_mut() else {
            debug!(event = "update_before_seed", kind = "task_update", task_id = task.id);
            return false;
        };
        let Some(slot) = detail.tasks.iter_mut().find(|known| known.id == task.id) else {
            debug!(event = "task_update_unknown", task_id = task.id);
            return false;
        };
        let task_id = task.id;
        *slot = task;
        self.notify(StoreChange::TaskReplaced { task_id });
        true
    }

    fn notify(&mut self, change: StoreChange) {
        let Some(detail) = self.detail.as_ref() else {
            return;
        };
        self.observers
            .retain(|slot| slot.active.load(Ordering::Acquire));
        for slot in &mut self.observers {
            (slot.observer)(&change, detail);
        }
    }
}
