// src/render/dashboard/state.rs

use crossterm::event::KeyCode;

use crate::render::RenderPhase;

/// Operator input understood by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Up,
    Down,
    ToggleSelected,
    ToggleAll,
    ScrollDown,
    ScrollUp,
    PageDown,
    PageUp,
    Pause,
    Quit,
}

impl KeyAction {
    pub fn from_key(code: KeyCode) -> Option<Self> {
        match code {
            KeyCode::Up => Some(KeyAction::Up),
            KeyCode::Down => Some(KeyAction::Down),
            KeyCode::Char(' ') => Some(KeyAction::ToggleSelected),
            KeyCode::Char('c') => Some(KeyAction::ToggleAll),
            KeyCode::Char('j') => Some(KeyAction::ScrollDown),
            KeyCode::Char('k') => Some(KeyAction::ScrollUp),
            KeyCode::PageDown => Some(KeyAction::PageDown),
            KeyCode::PageUp => Some(KeyAction::PageUp),
            KeyCode::Char('p') => Some(KeyAction::Pause),
            KeyCode::Char('q') => Some(KeyAction::Quit),
            _ => None,
        }
    }
}

/// Selection, expansion and scroll state of the dashboard.
///
/// Holds host indexes only, never references into the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiState {
    selected: Option<usize>,
    expanded: Vec<bool>,
    scroll: usize,
    viewport: usize,
    phase: RenderPhase,
    jump_to_selected: bool,
}

impl UiState {
    pub fn new(host_count: usize) -> Self {
        Self {
            selected: None,
            expanded: vec![false; host_count],
            scroll: 0,
            viewport: 1,
            phase: RenderPhase::NotStarted,
            jump_to_selected: false,
        }
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn scroll(&self) -> usize {
        self.scroll
    }

    pub fn phase(&self) -> RenderPhase {
        self.phase
    }

    pub fn is_paused(&self) -> bool {
        self.phase == RenderPhase::Paused
    }

    pub fn is_expanded(&self, idx: usize) -> bool {
        self.expanded.get(idx).copied().unwrap_or(false)
    }

    pub fn all_collapsed(&self) -> bool {
        self.expanded.iter().all(|e| !e)
    }

    pub fn expand(&mut self, idx: usize) {
        if let Some(e) = self.expanded.get_mut(idx) {
            *e = true;
        }
    }

    pub fn start(&mut self) {
        if self.phase == RenderPhase::NotStarted {
            self.phase = RenderPhase::Running;
        }
    }

    pub fn finish(&mut self) {
        self.phase = RenderPhase::Finished;
    }

    /// Apply one key. Returns true when the dashboard should close.
    pub fn handle(&mut self, action: KeyAction) -> bool {
        let count = self.expanded.len();
        match action {
            KeyAction::Up | KeyAction::Down if count == 0 => {}
            KeyAction::Up => {
                self.selected = Some(self.selected.map_or(0, |s| s.saturating_sub(1)));
                self.jump_to_selected = true;
            }
            KeyAction::Down => {
                self.selected = Some(self.selected.map_or(0, |s| (s + 1).min(count - 1)));
                self.jump_to_selected = true;
            }
            KeyAction::ToggleSelected => {
                if let Some(e) = self.selected.and_then(|s| self.expanded.get_mut(s)) {
                    *e = !*e;
                    self.jump_to_selected = true;
                }
            }
            KeyAction::ToggleAll => {
                let expand = self.all_collapsed();
                self.expanded.iter_mut().for_each(|e| *e = expand);
            }
            KeyAction::ScrollDown => self.scroll += 1,
            KeyAction::ScrollUp => self.scroll = self.scroll.saturating_sub(1),
            KeyAction::PageDown => self.scroll += self.viewport,
            KeyAction::PageUp => self.scroll = self.scroll.saturating_sub(self.viewport),
            KeyAction::Pause => {
                self.phase = match self.phase {
                    RenderPhase::Running => RenderPhase::Paused,
                    RenderPhase::Paused => RenderPhase::Running,
                    other => other,
                };
            }
            KeyAction::Quit => return self.phase == RenderPhase::Finished,
        }
        false
    }

    /// Fit the scroll offset to a freshly built layout.
    ///
    /// `span` is the `(first row, row count)` of the selected host.
    pub fn settle(&mut self, total_rows: usize, viewport: usize, span: Option<(usize, usize)>) {
        self.viewport = viewport.max(1);
        if self.jump_to_selected {
            self.jump_to_selected = false;
            if let Some((start, len)) = span {
                self.make_visible(start, len);
            }
        }
        let max_scroll = total_rows.saturating_sub(self.viewport);
        self.scroll = self.scroll.min(max_scroll);
    }

    fn make_visible(&mut self, start: usize, len: usize) {
        if start < self.scroll {
            self.scroll = start;
        } else if start + len > self.scroll + self.viewport {
            self.scroll = (start + len).saturating_sub(self.viewport).min(start);
        }
    }

    pub fn has_scroll(&self, total_rows: usize) -> bool {
        total_rows > self.viewport
    }
}
