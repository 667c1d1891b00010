// src/render/dashboard/rows.rs

//! Flattening of the model into display rows.
//!
//! Pure: takes a model snapshot and UI state, returns rows plus the row span
//! of each host so the selection can be scrolled into view.

use std::time::Duration;

use serde_json::Value;

use crate::model::{ExecutionModel, HostExecution, Stage, StageEntry, Step, StepEntry};
use crate::render::format::{failure_lines, format_elapsed, FailureLine};
use crate::render::dashboard::state::UiState;
use crate::types::{Outcome, Timestamp};

pub const SPINNER_FRAMES: [&str; 8] = ["⣾", "⣽", "⣻", "⢿", "⡿", "⣟", "⣯", "⣷"];
pub const SPINNER_INTERVAL: Duration = Duration::from_millis(200);

pub fn spinner_frame(elapsed: Duration) -> &'static str {
    let idx = (elapsed.as_millis() / SPINNER_INTERVAL.as_millis()) as usize % SPINNER_FRAMES.len();
    SPINNER_FRAMES[idx]
}

/// Status glyph of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Succeeded,
    Warning,
    Failed,
}

impl Status {
    fn of(outcome: Outcome, finished: bool, warned: bool) -> Self {
        match (finished, outcome) {
            (false, _) => Status::Running,
            (true, Outcome::Failed) => Status::Failed,
            (true, _) if warned => Status::Warning,
            (true, _) => Status::Succeeded,
        }
    }

    pub fn glyph(self, spinner: &'static str) -> &'static str {
        match self {
            Status::Running => spinner,
            Status::Succeeded => "✓",
            Status::Warning => "⚠",
            Status::Failed => "╳",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Host,
    Stage,
    Step,
}

/// A host, stage or step line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRow {
    pub level: Level,
    /// Column of the label.
    pub col: usize,
    /// Draw a `|_` connector in front of the label.
    pub connector: bool,
    /// `+`/`-` expansion marker (hosts only).
    pub marker: Option<char>,
    pub label: String,
    pub status: Status,
    pub elapsed: String,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    Item(ItemRow),
    Failure {
        col: usize,
        connector: bool,
        line: FailureLine,
    },
    Blank,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowLayout {
    pub rows: Vec<Row>,
    /// `(first row, row count)` per host, in model order.
    pub host_spans: Vec<(usize, usize)>,
}

impl RowLayout {
    pub fn span_of(&self, host: Option<usize>) -> Option<(usize, usize)> {
        host.and_then(|idx| self.host_spans.get(idx).copied())
    }
}

fn elapsed(begin: Timestamp, end: Option<Timestamp>, now: Timestamp) -> String {
    format_elapsed(end.unwrap_or(now) - begin)
}

fn stage_row(stage: &Stage, col: usize, connector: bool, now: Timestamp) -> Row {
    Row::Item(ItemRow {
        level: Level::Stage,
        col,
        connector,
        marker: None,
        label: stage.desc().to_string(),
        status: Status::of(stage.outcome(), stage.is_finished(), stage.has_warning()),
        elapsed: elapsed(stage.begin_time(), stage.end_time(), now),
        selected: false,
    })
}

fn step_row(step: &Step, col: usize, connector: bool, now: Timestamp) -> Row {
    Row::Item(ItemRow {
        level: Level::Step,
        col,
        connector,
        marker: None,
        label: step.desc().to_string(),
        status: Status::of(step.outcome(), step.is_finished(), false),
        elapsed: elapsed(step.begin_time(), step.end_time(), now),
        selected: false,
    })
}

fn push_failure(rows: &mut Vec<Row>, col: usize, connector: bool, failure: &Value, width: usize) {
    let lines = failure_lines(failure, width.saturating_sub(col + 1));
    for (i, line) in lines.into_iter().enumerate() {
        rows.push(Row::Failure {
            col,
            connector: connector && i == 0,
            line,
        });
    }
}

fn host_rows(
    rows: &mut Vec<Row>,
    host: &HostExecution,
    expanded: bool,
    selected: bool,
    now: Timestamp,
    width: usize,
) {
    rows.push(Row::Item(ItemRow {
        level: Level::Host,
        col: 3,
        connector: false,
        marker: Some(if expanded { '-' } else { '+' }),
        label: host.id().to_string(),
        status: Status::of(host.outcome(), host.is_finished(), host.has_warnings()),
        elapsed: elapsed(host.begin_time(), host.end_time(), now),
        selected,
    }));

    if !expanded {
        // Collapsed: only a running host shows where it is.
        if host.is_finished() {
            return;
        }
        if let Some(stage) = host.last_stage() {
            rows.push(stage_row(stage, 6, true, now));
            if let Some(step) = stage.last_step() {
                rows.push(step_row(step, 9, true, now));
            }
        }
        return;
    }

    for (i, entry) in host.entries().iter().enumerate() {
        let first = i == 0;
        match entry {
            StageEntry::Failure(record) => push_failure(rows, 6, first, record.payload(), width),
            StageEntry::Stage(stage) => {
                rows.push(stage_row(stage, 6, first, now));
                for (j, step_entry) in stage.entries().iter().enumerate() {
                    let first_step = j == 0;
                    match step_entry {
                        StepEntry::Failure(record) => {
                            push_failure(rows, 9, first_step, record.payload(), width)
                        }
                        StepEntry::Step(step) => {
                            rows.push(step_row(step, 9, first_step, now));
                            if let Some(failure) = step.failure() {
                                push_failure(rows, 12, true, failure, width);
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Build the body rows for a `width` columns wide view.
pub fn build_rows(model: &ExecutionModel, ui: &UiState, now: Timestamp, width: usize) -> RowLayout {
    let mut layout = RowLayout::default();
    for (idx, host) in model.hosts().iter().enumerate() {
        let start = layout.rows.len();
        host_rows(
            &mut layout.rows,
            host,
            ui.is_expanded(idx),
            ui.selected() == Some(idx),
            now,
            width,
        );
        layout.host_spans.push((start, layout.rows.len() - start));
        layout.rows.push(Row::Blank);
    }
    layout
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FailureData, LifecycleEvent, LifecycleKind};
    use crate::render::dashboard::state::KeyAction;
    use crate::types::{now, JobSpec};
    use serde_json::json;

    fn model() -> ExecutionModel {
        ExecutionModel::new(
            JobSpec::new("ceph-salt", json!({})),
            &["node1".to_string(), "node2".to_string()],
            None,
        )
        .expect("model")
    }

    fn labels(layout: &RowLayout) -> Vec<String> {
        layout
            .rows
            .iter()
            .map(|row| match row {
                Row::Item(item) => item.label.clone(),
                Row::Failure { line, .. } => format!("!{}", line.text),
                Row::Blank => String::new(),
            })
            .collect()
    }

    #[test]
    fn collapsed_running_host_shows_last_stage_and_step() {
        let mut m = model();
        let at = now();
        let host = m.host_mut("node1").expect("host");
        host.stage_begin("Stage 1", at);
        host.stage_end("Stage 1", at);
        host.stage_begin("Stage 2", at);
        host.step_begin("Step A", at);

        let layout = build_rows(&m, &UiState::new(2), at, 80);
        assert_eq!(labels(&layout), vec!["node1", "Stage 2", "Step A", "", "node2", ""]);
        assert_eq!(layout.host_spans, vec![(0, 3), (4, 1)]);
    }

    #[test]
    fn expanded_host_lists_history_with_failures() {
        let mut m = model();
        let at = now();
        let host = m.host_mut("node1").expect("host");
        host.stage_begin("Stage 1", at);
        host.step_begin("Step 1", at);
        let ev = LifecycleEvent::new(LifecycleKind::BeginStep, "Step 1")
            .within(LifecycleEvent::new(LifecycleKind::BeginStage, "Stage 1"));
        host.report_failure(Some(&ev), FailureData::Single(json!("disk full")), at);

        let mut ui = UiState::new(2);
        ui.expand(0);
        let layout = build_rows(&m, &ui, at, 80);
        assert_eq!(
            labels(&layout),
            vec!["node1", "Stage 1", "Step 1", "!disk full", "", "node2", ""]
        );
        let Row::Item(host_row) = &layout.rows[0] else {
            panic!("host row expected");
        };
        assert_eq!(host_row.status, Status::Failed);
        assert_eq!(host_row.marker, Some('-'));
    }

    #[test]
    fn selection_marks_host_row() {
        let m = model();
        let mut ui = UiState::new(2);
        ui.handle(KeyAction::Down);
        ui.handle(KeyAction::Down);
        let layout = build_rows(&m, &ui, now(), 80);
        let selected: Vec<bool> = layout
            .rows
            .iter()
            .filter_map(|r| match r {
                Row::Item(item) => Some(item.selected),
                _ => None,
            })
            .collect();
        assert_eq!(selected, vec![false, true]);
        assert_eq!(layout.span_of(ui.selected()), Some((2, 1)));
    }

    #[test]
    fn spinner_advances_every_interval() {
        assert_eq!(spinner_frame(Duration::from_millis(0)), "⣾");
        assert_eq!(spinner_frame(Duration::from_millis(210)), "⣽");
        assert_eq!(spinner_frame(Duration::from_millis(1600)), "⣾");
    }
}
