// src/render/dashboard/screen.rs

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState},
};

use crate::model::{ExecutionModel, Summary};
use crate::render::dashboard::rows::{ItemRow, Level, Row, RowLayout, Status};
use crate::render::dashboard::state::UiState;
use crate::render::format::format_elapsed;
use crate::render::RenderPhase;
use crate::types::Timestamp;

pub const HEADER_HEIGHT: u16 = 1;
pub const FOOTER_HEIGHT: u16 = 2;

/// Width reserved right of the dots: glyph plus timer.
const TAIL_WIDTH: usize = 12;

/// Header content, taken from the model under its read lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub command: String,
    pub summary: Summary,
    pub duration: Option<String>,
    pub finished: bool,
}

impl Header {
    pub fn from_model(model: &ExecutionModel, now: Timestamp) -> Self {
        let duration = model
            .begin_time()
            .map(|begin| format_elapsed(model.end_time().unwrap_or(now) - begin));
        Self {
            command: model.command_line(),
            summary: model.summary(),
            duration,
            finished: model.is_finished(),
        }
    }
}

/// Everything one frame shows.
#[derive(Debug, Clone)]
pub struct FrameView {
    pub header: Header,
    pub layout: RowLayout,
    pub spinner: &'static str,
}

/// Areas of the screen: header, body, scrollbar column, footer.
pub fn split(area: Rect) -> (Rect, Rect, Rect, Rect) {
    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(HEADER_HEIGHT),
            Constraint::Min(1),
            Constraint::Length(FOOTER_HEIGHT),
        ])
        .split(area);
    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(outer[1]);
    (outer[0], body[0], body[1], outer[2])
}

pub fn draw(f: &mut Frame, view: &FrameView, ui: &UiState) {
    let (header, body, bar, footer) = split(f.area());
    render_header(f, &view.header, header);
    render_body(f, view, ui, body, bar);
    render_footer(f, view, ui, footer);
}

fn render_header(f: &mut Frame, header: &Header, area: Rect) {
    let style = Style::default()
        .fg(Color::Black)
        .bg(Color::Cyan)
        .add_modifier(Modifier::BOLD);
    let s = &header.summary;
    let finished = format!("Finished: {}/{}", s.finished, s.total);
    let left = if header.finished {
        format!(
            " {finished}  Succeeded: {}  Warnings: {}  Failed: {}",
            s.succeeded, s.warned, s.failed
        )
    } else {
        let running = format!(" Running: {}", header.command);
        if running.chars().count() + finished.len() + 4 < area.width as usize {
            format!("{running}  {finished}")
        } else {
            format!(" {finished}")
        }
    };
    let right = format!(
        "Duration: {} ",
        header.duration.as_deref().unwrap_or("-")
    );
    let pad = (area.width as usize).saturating_sub(left.chars().count() + right.chars().count());
    let line = Line::from(format!("{left}{}{right}", " ".repeat(pad)));
    f.render_widget(Paragraph::new(line).style(style), area);
}

fn item_line(item: &ItemRow, width: usize, spinner: &'static str) -> Line<'static> {
    let color = match item.level {
        Level::Host => Color::White,
        Level::Stage => Color::Cyan,
        Level::Step => Color::Blue,
    };
    let mut label_style = Style::default().fg(color);
    if item.level == Level::Host {
        label_style = label_style.add_modifier(Modifier::BOLD);
    }
    let selected = if item.selected {
        Style::default().add_modifier(Modifier::REVERSED)
    } else {
        Style::default()
    };

    let mut spans = Vec::new();
    let lead = match (item.marker, item.connector) {
        (Some(marker), _) => format!(" {marker} "),
        (None, true) => format!("{}|_ ", " ".repeat(item.col.saturating_sub(3))),
        (None, false) => " ".repeat(item.col),
    };
    let used = lead.chars().count() + item.label.chars().count() + 1 + TAIL_WIDTH;
    let dots = width.saturating_sub(used);
    spans.push(Span::styled(lead, Style::default().fg(Color::DarkGray)));
    spans.push(Span::styled(item.label.clone(), label_style.patch(selected)));
    spans.push(Span::styled(
        format!(" {}", ".".repeat(dots)),
        Style::default().fg(color).patch(selected),
    ));

    let glyph_color = match item.status {
        Status::Running => color,
        Status::Succeeded => Color::Green,
        Status::Warning => Color::Yellow,
        Status::Failed => Color::Red,
    };
    spans.push(Span::styled(
        format!(" {} ", item.status.glyph(spinner)),
        Style::default().fg(glyph_color).patch(selected),
    ));
    spans.push(Span::styled(
        format!("{:>width$}", format!("({})", item.elapsed), width = TAIL_WIDTH - 3),
        Style::default().fg(Color::DarkGray).patch(selected),
    ));
    Line::from(spans)
}

fn row_line(row: &Row, width: usize, spinner: &'static str) -> Line<'static> {
    match row {
        Row::Item(item) => item_line(item, width, spinner),
        Row::Failure {
            col,
            connector,
            line,
        } => {
            let lead = if *connector {
                format!("{}|_ ", " ".repeat(col.saturating_sub(3)))
            } else {
                " ".repeat(*col)
            };
            Line::from(vec![
                Span::styled(lead, Style::default().fg(Color::DarkGray)),
                Span::raw(" ".repeat(line.indent)),
                Span::styled(line.label, Style::default().fg(Color::DarkGray)),
                Span::styled(line.text.clone(), Style::default().fg(Color::Red)),
            ])
        }
        Row::Blank => Line::default(),
    }
}

fn render_body(f: &mut Frame, view: &FrameView, ui: &UiState, area: Rect, bar: Rect) {
    let height = area.height as usize;
    let width = area.width as usize;
    let lines: Vec<Line> = view
        .layout
        .rows
        .iter()
        .skip(ui.scroll())
        .take(height)
        .map(|row| row_line(row, width, view.spinner))
        .collect();
    f.render_widget(Paragraph::new(lines), area);

    let total = view.layout.rows.len();
    if total > height {
        let mut state = ScrollbarState::new(total.saturating_sub(height))
            .position(ui.scroll())
            .viewport_content_length(height);
        f.render_stateful_widget(
            Scrollbar::new(ScrollbarOrientation::VerticalRight),
            bar,
            &mut state,
        );
    }
}

fn key_hint(spans: &mut Vec<Span<'static>>, key: &str, desc: &str) {
    spans.push(Span::styled(
        format!(" {key}"),
        Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled(
        format!("{desc:<10}"),
        Style::default().fg(Color::Black).bg(Color::Cyan),
    ));
}

fn render_footer(f: &mut Frame, view: &FrameView, ui: &UiState, area: Rect) {
    let mut hints = Vec::new();
    if !ui.is_paused() {
        key_hint(&mut hints, "↑|↓", "Navigate");
        if ui.all_collapsed() {
            key_hint(&mut hints, "c", "ExpandAll");
        } else {
            key_hint(&mut hints, "c", "CollapAll");
        }
        if let Some(sel) = ui.selected() {
            if ui.is_expanded(sel) {
                key_hint(&mut hints, "space", "CollapSel");
            } else {
                key_hint(&mut hints, "space", "ExpandSel");
            }
        }
        if ui.has_scroll(view.layout.rows.len()) {
            key_hint(&mut hints, "j|k", "Scroll");
            key_hint(&mut hints, "PgDn|PgUp", "ScrollPage");
        }
        if ui.phase() != RenderPhase::Finished {
            key_hint(&mut hints, "p", "Pause");
        }
    }

    let status = match ui.phase() {
        RenderPhase::Paused => Line::from(Span::styled(
            " Paused - Press p to resume",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
        RenderPhase::Finished => Line::from(Span::styled(
            " Press q to exit",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
        _ => Line::default(),
    };
    f.render_widget(Paragraph::new(vec![Line::from(hints), status]), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::dashboard::rows::build_rows;
    use crate::render::dashboard::state::KeyAction;
    use crate::types::{now, JobSpec};
    use ratatui::{Terminal, backend::TestBackend};
    use serde_json::json;

    fn screen_text(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        let width = buffer.area.width as usize;
        buffer
            .content()
            .chunks(width)
            .map(|row| row.iter().map(|c| c.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render(model: &ExecutionModel, ui: &mut UiState, width: u16, height: u16) -> String {
        let at = now();
        let layout = build_rows(model, ui, at, width as usize - 1);
        ui.settle(
            layout.rows.len(),
            (height - HEADER_HEIGHT - FOOTER_HEIGHT) as usize,
            layout.span_of(ui.selected()),
        );
        let view = FrameView {
            header: Header::from_model(model, at),
            layout,
            spinner: "⣾",
        };
        let mut terminal = Terminal::new(TestBackend::new(width, height)).expect("terminal");
        terminal.draw(|f| draw(f, &view, ui)).expect("draw");
        screen_text(&terminal)
    }

    fn model() -> ExecutionModel {
        ExecutionModel::new(
            JobSpec::new("ceph-salt", json!({})),
            &["node1".to_string(), "node2".to_string()],
            None,
        )
        .expect("model")
    }

    #[test]
    fn running_view_shows_header_hosts_and_hints() {
        let mut m = model();
        let at = now();
        m.begin(at);
        m.host_mut("node1").expect("host").stage_begin("Install packages", at);
        let mut ui = UiState::new(2);
        ui.start();

        let text = render(&m, &mut ui, 80, 12);
        assert!(text.contains("Running: fleetexec apply ceph-salt"), "{text}");
        assert!(text.contains("Finished: 0/2"), "{text}");
        assert!(text.contains(" + node1 ....."), "{text}");
        assert!(text.contains("|_ Install packages"), "{text}");
        assert!(text.contains("ExpandAll"), "{text}");
        assert!(text.contains("Pause"), "{text}");
        assert!(!text.contains("Press q to exit"), "{text}");
    }

    #[test]
    fn finished_view_shows_summary_and_exit_hint() {
        let mut m = model();
        let at = now();
        m.begin(at);
        m.host_mut("node1").expect("host").end(at, true);
        m.host_mut("node2").expect("host").end(at, false);
        m.end(at);
        let mut ui = UiState::new(2);
        ui.start();
        ui.finish();
        ui.handle(KeyAction::Down);

        let text = render(&m, &mut ui, 80, 12);
        assert!(text.contains("Succeeded: 1"), "{text}");
        assert!(text.contains("Failed: 1"), "{text}");
        assert!(text.contains("✓"), "{text}");
        assert!(text.contains("╳"), "{text}");
        assert!(text.contains("ExpandSel"), "{text}");
        assert!(text.contains("Press q to exit"), "{text}");
    }

    #[test]
    fn paused_view_hides_hints() {
        let m = model();
        let mut ui = UiState::new(2);
        ui.start();
        ui.handle(KeyAction::Pause);
        let text = render(&m, &mut ui, 80, 12);
        assert!(text.contains("Paused - Press p to resume"), "{text}");
        assert!(!text.contains("Navigate"), "{text}");
    }
}
