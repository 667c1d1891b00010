// src/render/dashboard/mod.rs

//! Full-screen progress view.
//!
//! Layout of a frame is pure ([`rows`], [`screen`]); selection and scrolling
//! live in [`state::UiState`]. This module owns the terminal and the loop.

pub mod rows;
pub mod screen;
pub mod state;

use std::io::{self, Stdout};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};

use crossterm::{
    cursor,
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, error};

use crate::errors::{FleetError, Result};
use crate::model::SharedModel;
use crate::render::{RenderPhase, RenderSignal, Renderer};
use crate::types::now;

use rows::{build_rows, spinner_frame};
use screen::{FOOTER_HEIGHT, FrameView, HEADER_HEIGHT, Header};
use state::{KeyAction, UiState};

const INPUT_POLL: Duration = Duration::from_millis(50);

/// Raw mode and alternate screen for as long as it lives.
struct UiGuard;

impl UiGuard {
    fn enter() -> Result<Self> {
        terminal::enable_raw_mode()?;
        if let Err(e) = execute!(io::stdout(), EnterAlternateScreen, cursor::Hide) {
            let _ = terminal::disable_raw_mode();
            return Err(e.into());
        }
        Ok(Self)
    }
}

impl Drop for UiGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), LeaveAlternateScreen, cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

pub struct DashboardRenderer {
    model: SharedModel,
    ui: UiState,
    tick: Duration,
    started: Instant,
}

impl DashboardRenderer {
    pub fn new(model: SharedModel, tick: Duration) -> Self {
        let hosts = model.read().hosts().len();
        Self {
            model,
            ui: UiState::new(hosts),
            tick,
            started: Instant::now(),
        }
    }

    /// Apply pending signals. Returns true when the model changed.
    fn drain(&mut self, signals: &mut mpsc::UnboundedReceiver<RenderSignal>) -> bool {
        let mut changed = false;
        loop {
            match signals.try_recv() {
                Ok(RenderSignal::ExecutionStarted) => {
                    self.ui.start();
                    changed = true;
                }
                Ok(RenderSignal::HostUpdated(_)) => changed = true,
                Ok(RenderSignal::HostFailure { host, .. }) => {
                    let idx = self.model.read().hosts().iter().position(|h| h.id() == host);
                    if let Some(idx) = idx {
                        self.ui.expand(idx);
                    }
                    changed = true;
                }
                Ok(RenderSignal::ExecutionStopped) => {
                    self.ui.finish();
                    changed = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.ui.phase() != RenderPhase::Finished {
                        debug!("signal channel closed, finishing dashboard");
                        self.ui.finish();
                        changed = true;
                    }
                    break;
                }
            }
        }
        changed
    }

    /// Keys read within one poll interval. Returns `(redraw, quit)`.
    fn poll_keys(&mut self) -> Result<(bool, bool)> {
        let mut redraw = false;
        if event::poll(INPUT_POLL)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if let Some(action) = KeyAction::from_key(key.code) {
                        if self.ui.handle(action) {
                            return Ok((true, true));
                        }
                        redraw = true;
                    }
                }
                Event::Resize(..) => redraw = true,
                _ => {}
            }
        }
        Ok((redraw, false))
    }

    fn frame_view(&mut self, width: u16, height: u16) -> FrameView {
        let at = now();
        let model = self.model.read();
        // One column is kept for the scrollbar.
        let layout = build_rows(&model, &self.ui, at, width.saturating_sub(1) as usize);
        let viewport = height.saturating_sub(HEADER_HEIGHT + FOOTER_HEIGHT) as usize;
        self.ui
            .settle(layout.rows.len(), viewport, layout.span_of(self.ui.selected()));
        FrameView {
            header: Header::from_model(&model, at),
            layout,
            spinner: spinner_frame(self.started.elapsed()),
        }
    }

    fn draw(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let size = terminal.size()?;
        let view = self.frame_view(size.width, size.height);
        let ui = &self.ui;
        let drawn = catch_unwind(AssertUnwindSafe(|| {
            terminal.draw(|f| screen::draw(f, &view, ui)).map(|_| ())
        }));
        match drawn {
            Ok(result) => Ok(result?),
            Err(_) => {
                error!("dashboard draw panicked");
                Err(FleetError::Other(anyhow::anyhow!("dashboard draw panicked")))
            }
        }
    }
}

impl Renderer for DashboardRenderer {
    fn run(&mut self, signals: &mut mpsc::UnboundedReceiver<RenderSignal>) -> Result<()> {
        let _guard = UiGuard::enter()?;
        let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
        terminal.clear()?;

        let mut last_draw = Instant::now();
        self.draw(&mut terminal)?;
        loop {
            let changed = self.drain(signals);
            let (keyed, quit) = self.poll_keys()?;
            if quit {
                debug!("dashboard closed by operator");
                break;
            }
            let ticked = last_draw.elapsed() >= self.tick;
            let paused = self.ui.is_paused();
            if keyed || (!paused && (changed || ticked)) {
                self.draw(&mut terminal)?;
                last_draw = Instant::now();
            } else if paused && changed {
                debug!("dashboard paused, update held back");
            }
        }
        Ok(())
    }
}
