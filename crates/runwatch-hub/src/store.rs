use chrono::{SecondsFormat, Utc};
use runwatch_core::{
    Event, NewEvent, NewRun, NewTask, Run, RunDetail, RunId, RunStatus, Task, TaskId,
};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug)]
struct RunRecord {
    run: Run,
    tasks: Vec<Task>,
    /// Oldest first; snapshots reverse it.
    events: Vec<Event>,
}

#[derive(Debug, Default)]
struct StoreInner {
    next_run_id: RunId,
    next_task_id: TaskId,
    next_event_id: i64,
    runs: BTreeMap<RunId, RunRecord>,
}

/// In-memory runs, tasks and events.
#[derive(Debug)]
pub struct RunStore {
    inner: RwLock<StoreInner>,
    event_window: usize,
}

impl RunStore {
    pub fn new(event_window: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            event_window: event_window.max(1),
        }
    }

    pub async fn create_run(&self, request: NewRun) -> Run {
        let mut inner = self.inner.write().await;
        inner.next_run_id += 1;
        let now = now_rfc3339();
        let run = Run {
            id: inner.next_run_id,
            title: request.title,
            description: request.description,
            status: RunStatus::Pending,
            created_at: now.clone(),
            updated_at: now,
        };
        inner.runs.insert(
            run.id,
            RunRecord {
                run: run.clone(),
                tasks: Vec::new(),
                events: Vec::new(),
            },
        );
        run
    }

    /// Newest first, skipping `skip` runs and returning at most `limit`.
    pub async fn list_runs(&self, skip: usize, limit: usize) -> Vec<Run> {
        let inner = self.inner.read().await;
        inner
            .runs
            .values()
            .rev()
            .skip(skip)
            .take(limit)
            .map(|record| record.run.clone())
            .collect()
    }

    pub async fn contains(&self, run_id: RunId) -> bool {
        self.inner.read().await.runs.contains_key(&run_id)
    }

    pub async fn run_detail(&self, run_id: RunId) -> Option<RunDetail> {
        let inner = self.inner.read().await;
        let record = inner.runs.get(&run_id)?;
        Some(RunDetail {
            run: record.run.clone(),
            tasks: record.tasks.clone(),
            recent_events: record
                .events
                .iter()
                .rev()
                .take(self.event_window)
                .cloned()
                .collect(),
        })
    }

    pub async fn set_run_status(&self, run_id: RunId, status: RunStatus) -> Option<Run> {
        let mut inner = self.inner.write().await;
        let record = inner.runs.get_mut(&run_id)?;
        record.run.status = status;
        record.run.updated_at = now_rfc3339();
        Some(record.run.clone())
    }

    pub async fn create_task(&self, run_id: RunId, request: NewTask) -> Option<Task> {
        let mut inner = self.inner.write().await;
        if !inner.runs.contains_key(&run_id) {
            return None;
        }
        inner.next_task_id += 1;
        let now = now_rfc3339();
        let task = Task {
            id: inner.next_task_id,
            run_id,
            title: request.title,
            description: request.description,
            status: RunStatus::Pending,
            created_at: now.clone(),
            updated_at: now,
        };
        let record = inner.runs.get_mut(&run_id)?;
        record.tasks.push(task.clone());
        Some(task)
    }

    /// Tasks in creation order, or `None` when the run is unknown.
    pub async fn list_tasks(&self, run_id: RunId) -> Option<Vec<Task>> {
        let inner = self.inner.read().await;
        inner.runs.get(&run_id).map(|record| record.tasks.clone())
    }

    pub async fn set_task_status(
        &self,
        run_id: RunId,
        task_id: TaskId,
        status: RunStatus,
    ) -> Result<Task, Missing> {
        let mut inner = self.inner.write().await;
        let record = inner.runs.get_mut(&run_id).ok_or(Missing::Run)?;
        let task = record
            .tasks
            .iter_mut()
            .find(|task| task.id == task_id)
            .ok_or(Missing::Task)?;
        task.status = status;
        task.updated_at = now_rfc3339();
        Ok(task.clone())
    }

    pub async fn append_event(&self, run_id: RunId, request: NewEvent) -> Option<Event> {
        let mut inner = self.inner.write().await;
        if !inner.runs.contains_key(&run_id) {
            return None;
        }
        inner.next_event_id += 1;
        let event = Event {
            id: inner.next_event_id,
            run_id,
            event_type: request.event_type,
            message: request.message,
            event_metadata: request.event_metadata,
            created_at: now_rfc3339(),
        };
        let record = inner.runs.get_mut(&run_id)?;
        record.events.push(event.clone());
        Some(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Run,
    Task,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
