use runwatch_core::{Event, Run, RunDetail};
use runwatch_sync::{ConnectionStatus, SyncView};
use std::collections::HashSet;

pub fn run_line(run: &Run) -> String {
    format!(
        "#{:<5} {:<9} {}  ({})",
        run.id,
        run.status.as_str(),
        run.title,
        run.created_at
    )
}

pub fn event_line(event: &Event) -> String {
    format!(
        "{} [{}] {}",
        event.created_at,
        event.event_type.as_str(),
        event.message
    )
}

pub fn detail_lines(detail: &RunDetail) -> Vec<String> {
    let mut lines = vec![format!(
        "run #{} \"{}\" [{}]",
        detail.run.id,
        detail.run.title,
        detail.run.status.as_str()
    )];
    if let Some(description) = detail.run.description.as_deref() {
        lines.push(format!("  {description}"));
    }
    lines.push(format!("tasks ({}):", detail.tasks.len()));
    for task in &detail.tasks {
        lines.push(format!(
            "  #{:<5} {:<9} {}",
            task.id,
            task.status.as_str(),
            task.title
        ));
    }
    lines.push(format!("events ({}):", detail.recent_events.len()));
    // Held newest first; printed in reading order.
    for event in detail.recent_events.iter().rev() {
        lines.push(format!("  {}", event_line(event)));
    }
    lines
}

fn connection_line(status: &ConnectionStatus) -> String {
    match status {
        ConnectionStatus::Disconnected { reason } => format!("connection: disconnected ({reason})"),
        other => format!("connection: {}", other.label()),
    }
}

/// Lines describing what changed between two published views.
pub fn describe_changes(prev: &SyncView, next: &SyncView) -> Vec<String> {
    let mut lines = Vec::new();
    if prev.connection != next.connection {
        lines.push(connection_line(&next.connection));
    }
    if prev.load_error != next.load_error {
        if let Some(err) = &next.load_error {
            lines.push(format!("load failed: {err} (press r to retry)"));
        }
    }

    let Some(detail) = next.detail.as_ref() else {
        return lines;
    };
    let Some(before) = prev.detail.as_ref().filter(|before| before.run.id == detail.run.id) else {
        lines.extend(detail_lines(detail));
        return lines;
    };

    if before.run.status != detail.run.status {
        lines.push(format!(
            "run status: {} -> {}",
            before.run.status, detail.run.status
        ));
    }
    for task in &detail.tasks {
        match before.tasks.iter().find(|old| old.id == task.id) {
            Some(old) if old.status != task.status => lines.push(format!(
                "task #{} {}: {} -> {}",
                task.id, task.title, old.status, task.status
            )),
            Some(_) => {}
            None => lines.push(format!("task #{} {}: {}", task.id, task.title, task.status)),
        }
    }
    let seen: HashSet<i64> = before.recent_events.iter().map(|event| event.id).collect();
    for event in detail
        .recent_events
        .iter()
        .rev()
        .filter(|event| !seen.contains(&event.id))
    {
        lines.push(event_line(event));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use runwatch_core::{EventType, RunStatus, Task};
    use runwatch_sync::SyncError;

    fn detail(status: RunStatus, tasks: Vec<Task>, events: Vec<Event>) -> RunDetail {
        RunDetail {
            run: Run {
                id: 1,
                title: "nightly".to_string(),
                description: None,
                status,
                created_at: "2026-02-07T21:00:00Z".to_string(),
                updated_at: "2026-02-07T21:00:00Z".to_string(),
            },
            tasks,
            recent_events: events,
        }
    }

    fn task(id: i64, status: RunStatus) -> Task {
        Task {
            id,
            run_id: 1,
            title: format!("step-{id}"),
            description: None,
            status,
            created_at: "2026-02-07T21:00:00Z".to_string(),
            updated_at: "2026-02-07T21:00:00Z".to_string(),
        }
    }

    fn event(id: i64, message: &str) -> Event {
        Event {
            id,
            run_id: 1,
            event_type: EventType::Warning,
            message: message.to_string(),
            event_metadata: None,
            created_at: "t".to_string(),
        }
    }

    fn view(detail: Option<RunDetail>, connection: ConnectionStatus) -> SyncView {
        SyncView {
            run_id: Some(1),
            detail,
            connection,
            load_error: None,
            revision: 0,
        }
    }

    #[test]
    fn first_detail_prints_whole_run() {
        let prev = view(None, ConnectionStatus::Loading);
        let next = view(
            Some(detail(RunStatus::Running, vec![task(1, RunStatus::Pending)], Vec::new())),
            ConnectionStatus::Loading,
        );
        let lines = describe_changes(&prev, &next);
        assert_eq!(lines[0], "run #1 \"nightly\" [running]");
        assert!(lines.iter().any(|line| line.contains("step-1")));
    }

    #[test]
    fn reports_status_task_and_new_events_only() {
        let prev = view(
            Some(detail(
                RunStatus::Pending,
                vec![task(1, RunStatus::Pending)],
                vec![event(1, "old")],
            )),
            ConnectionStatus::Connected,
        );
        let next = view(
            Some(detail(
                RunStatus::Running,
                vec![task(1, RunStatus::Completed)],
                vec![event(3, "newest"), event(2, "newer"), event(1, "old")],
            )),
            ConnectionStatus::Connected,
        );
        assert_eq!(
            describe_changes(&prev, &next),
            vec![
                "run status: pending -> running".to_string(),
                "task #1 step-1: pending -> completed".to_string(),
                "t [warning] newer".to_string(),
                "t [warning] newest".to_string(),
            ]
        );
    }

    #[test]
    fn connection_and_load_error_changes_are_reported() {
        let prev = view(None, ConnectionStatus::Loading);
        let mut next = view(
            None,
            ConnectionStatus::Disconnected {
                reason: "run not found: 1".to_string(),
            },
        );
        next.load_error = Some(SyncError::NotFound(1));

        let lines = describe_changes(&prev, &next);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "connection: disconnected (run not found: 1)");
        assert!(lines[1].starts_with("load failed: "));
    }

    #[test]
    fn unchanged_view_prints_nothing() {
        let current = view(
            Some(detail(RunStatus::Running, Vec::new(), vec![event(1, "old")])),
            ConnectionStatus::Connected,
        );
        assert!(describe_changes(&current, &current).is_empty());
    }
}
