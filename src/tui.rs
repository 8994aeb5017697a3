use std::collections::VecDeque;
use std::io::{self, Stdout};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::domain::Experiment;
use crate::error::SynomixError;
use crate::progress::{BatchProgress, ItemState, ProgressEvent, ProgressSink};
use crate::session::WizardPhase;
use crate::staging::StagingStore;
use crate::upload::BatchSummary;

const EVENTS_MAX: usize = 8;
const BAR_WIDTH: usize = 20;

type DashboardTerminal = Terminal<CrosstermBackend<Stdout>>;

#[derive(Debug)]
struct DashboardState {
    experiment: String,
    phase: WizardPhase,
    progress: BatchProgress,
    summary: Option<BatchSummary>,
    events: VecDeque<String>,
    notice: Option<String>,
    started: Instant,
    finished: bool,
}

pub struct Dashboard {
    state: Arc<Mutex<DashboardState>>,
}

struct DashboardProgress {
    state: Arc<Mutex<DashboardState>>,
}

impl ProgressSink for DashboardProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            record(&mut state, event);
        }
    }
}

impl Dashboard {
    pub fn new(experiment: &Experiment, staging: &StagingStore) -> Self {
        Self {
            state: Arc::new(Mutex::new(DashboardState {
                experiment: format!("{} ({}, {})", experiment.name, experiment.id, experiment.cancer_type),
                phase: WizardPhase::Staging,
                progress: BatchProgress::from_store(staging),
                summary: None,
                events: VecDeque::new(),
                notice: None,
                started: Instant::now(),
                finished: false,
            })),
        }
    }

    // The view only closes once `f` has returned.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, SynomixError> + Send,
        R: Send,
    {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = mpsc::channel();
        let sink = DashboardProgress {
            state: self.state.clone(),
        };
        let outcome = thread::scope(|scope| {
            scope.spawn(move || {
                let _ = tx.send(f(&sink));
            });
            self.event_loop(&mut terminal, &rx)
        });

        disable_raw_mode().into_diagnostic()?;
        io::stdout().execute(LeaveAlternateScreen).into_diagnostic()?;
        outcome?.map_err(miette::Report::new)
    }

    fn event_loop<R>(
        &self,
        terminal: &mut DashboardTerminal,
        rx: &Receiver<Result<R, SynomixError>>,
    ) -> miette::Result<Result<R, SynomixError>> {
        let mut outcome = None;
        let mut tick = 0usize;
        loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, &state, tick))
                    .into_diagnostic()?;
            }

            if outcome.is_none() {
                match rx.try_recv() {
                    Ok(result) => {
                        outcome = Some(result);
                        self.update(|state| {
                            state.finished = true;
                            state.notice = None;
                        });
                    }
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => {
                        return Err(miette::Report::msg(
                            "upload worker stopped before reporting a result",
                        ));
                    }
                }
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if key.kind == KeyEventKind::Press && is_close_key(key) {
                        match outcome.take() {
                            Some(result) => return Ok(result),
                            None => self.update(|state| {
                                state.notice =
                                    Some("uploads in progress, wait for the batch to finish".to_string());
                            }),
                        }
                    }
                }
            }

            tick = tick.wrapping_add(1);
        }
    }

    fn update(&self, apply: impl FnOnce(&mut DashboardState)) {
        if let Ok(mut state) = self.state.lock() {
            apply(&mut state);
        }
    }
}

fn record(state: &mut DashboardState, event: ProgressEvent) {
    match &event {
        ProgressEvent::PhaseChanged { to, .. } => state.phase = *to,
        ProgressEvent::BatchCompleted(summary) => state.summary = Some(*summary),
        _ => {}
    }
    state.progress.apply(&event);
    // Per-percent ticks already show up in the item bars.
    if !matches!(event, ProgressEvent::ItemProgress { .. }) {
        push_event(&mut state.events, format!("[{}] {event}", timestamp()));
    }
}

fn is_close_key(key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc | KeyCode::Enter => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

fn draw_ui(frame: &mut ratatui::Frame, state: &DashboardState, tick: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Min(5),
            Constraint::Length(EVENTS_MAX as u16 + 2),
            Constraint::Length(1),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(state, tick), chunks[0]);
    frame.render_widget(draw_stepper(state.phase), chunks[1]);
    frame.render_widget(draw_items(state), chunks[2]);
    frame.render_widget(draw_events(state), chunks[3]);
    frame.render_widget(draw_footer(state), chunks[4]);
}

fn draw_header(state: &DashboardState, tick: usize) -> Paragraph<'static> {
    let heartbeat = if state.finished || tick % 2 == 0 { "*" } else { " " };
    let elapsed = state.started.elapsed().as_secs();
    let title = Line::from(vec![
        Span::styled(
            "SYNOMIX",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw(format!("   Elapsed: {:02}:{:02}   ", elapsed / 60, elapsed % 60)),
        Span::styled(heartbeat, Style::default().fg(Color::Green)),
    ]);
    let experiment = Line::from(vec![
        Span::styled("Experiment: ", Style::default().fg(Color::Gray)),
        Span::raw(state.experiment.clone()),
    ]);
    Paragraph::new(vec![title, experiment]).block(Block::default().borders(Borders::BOTTOM))
}

fn draw_stepper(current: WizardPhase) -> Paragraph<'static> {
    let mut spans = Vec::new();
    for phase in WizardPhase::ALL {
        let style = if phase < current {
            Style::default().fg(Color::Green)
        } else if phase == current {
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let marker = if phase < current { "x" } else { " " };
        spans.push(Span::styled(
            format!("[{marker}] {} {}", phase.step(), phase.label()),
            style,
        ));
        if phase != WizardPhase::Ready {
            spans.push(Span::styled("  >  ", Style::default().fg(Color::DarkGray)));
        }
    }
    Paragraph::new(Line::from(spans))
}

fn draw_items(state: &DashboardState) -> Paragraph<'static> {
    let total = state.progress.items().len();
    let aggregate = state.progress.aggregate_percent();
    let mut lines = vec![Line::from(vec![
        Span::styled(
            "Overall ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(progress_bar(aggregate, BAR_WIDTH)),
        Span::raw(format!(
            " {aggregate:>3}%   {}/{total} resolved",
            state.progress.resolved()
        )),
    ])];

    for view in state.progress.items() {
        let color = match view.state {
            ItemState::Success => Color::Green,
            ItemState::Error => Color::Red,
            ItemState::Uploading => Color::Cyan,
            ItemState::Pending => Color::Gray,
        };
        let layer = view
            .layer_type
            .map(|layer| layer.label().to_string())
            .unwrap_or_else(|| "auto".to_string());
        let mut spans = vec![
            Span::raw(format!(
                "{:>4} {:<28} {:>8} {:<14} ",
                view.id,
                truncate(&view.file_name, 28),
                size_label(view.size_mb),
                layer
            )),
            Span::raw(progress_bar(view.percent, BAR_WIDTH)),
            Span::raw(format!(" {:>3}% ", view.percent)),
            Span::styled(format!("{:<9}", view.state.label()), Style::default().fg(color)),
        ];
        if let Some(detail) = &view.detail {
            spans.push(Span::styled(detail.clone(), Style::default().fg(color)));
        }
        lines.push(Line::from(spans));
    }

    Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Layers"))
}

fn draw_events(state: &DashboardState) -> Paragraph<'static> {
    let lines: Vec<Line> = state
        .events
        .iter()
        .map(|event| Line::from(event.clone()))
        .collect();
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Events"))
        .wrap(Wrap { trim: true })
}

fn draw_footer(state: &DashboardState) -> Paragraph<'static> {
    let line = if state.finished {
        let summary = state
            .summary
            .map(|summary| {
                format!(
                    "{} succeeded, {} failed, {} skipped.  ",
                    summary.succeeded, summary.failed, summary.skipped
                )
            })
            .unwrap_or_default();
        Line::from(vec![
            Span::styled(summary, Style::default().fg(Color::Green)),
            Span::styled("q/Enter/Esc to close", Style::default().fg(Color::Gray)),
        ])
    } else if let Some(notice) = &state.notice {
        Line::from(Span::styled(notice.clone(), Style::default().fg(Color::Yellow)))
    } else {
        Line::from(Span::styled("uploading...", Style::default().fg(Color::Gray)))
    };
    Paragraph::new(line)
}

fn progress_bar(percent: u8, width: usize) -> String {
    let filled = (usize::from(percent.min(100)) * width) / 100;
    let mut out = String::from("[");
    for i in 0..width {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}

fn size_label(size_mb: Option<f64>) -> String {
    match size_mb {
        Some(size) => format!("{size:.2} MB"),
        None => "-".to_string(),
    }
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let kept: String = value.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}~")
}

fn push_event(buffer: &mut VecDeque<String>, item: String) {
    buffer.push_back(item);
    while buffer.len() > EVENTS_MAX {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StagedFile;
    use crate::staging::ItemId;

    fn state_with_two_items() -> (DashboardState, Vec<ItemId>) {
        let mut store = StagingStore::new();
        let ids = store.add(vec![
            StagedFile::from_parts("a.csv", 10).unwrap(),
            StagedFile::from_parts("b.csv", 10).unwrap(),
        ]);
        let state = DashboardState {
            experiment: "Cohort A".to_string(),
            phase: WizardPhase::Staging,
            progress: BatchProgress::from_store(&store),
            summary: None,
            events: VecDeque::new(),
            notice: None,
            started: Instant::now(),
            finished: false,
        };
        (state, ids)
    }

    #[test]
    fn progress_bar_fills_proportionally() {
        assert_eq!(progress_bar(0, 4), "[....]");
        assert_eq!(progress_bar(50, 4), "[##..]");
        assert_eq!(progress_bar(100, 4), "[####]");
    }

    #[test]
    fn item_rows_show_size_and_state() {
        let (mut state, ids) = state_with_two_items();
        state.progress.apply(&ProgressEvent::ItemFailed {
            id: ids[1],
            reason: "network timeout".to_string(),
        });
        let views = state.progress.items();
        assert_eq!(views[0].state, ItemState::Pending);
        assert_eq!(views[1].state, ItemState::Error);
        assert_eq!(size_label(views[0].size_mb), "0.00 MB");
        assert_eq!(size_label(Some(1.5)), "1.50 MB");
        assert_eq!(size_label(None), "-");
    }

    #[test]
    fn records_phase_and_skips_percent_ticks_in_log() {
        let (mut state, ids) = state_with_two_items();
        record(
            &mut state,
            ProgressEvent::PhaseChanged {
                from: WizardPhase::Staging,
                to: WizardPhase::Processing,
            },
        );
        record(
            &mut state,
            ProgressEvent::ItemStarted {
                id: ids[0],
                file_name: "a.csv".to_string(),
                layer_type: None,
            },
        );
        record(&mut state, ProgressEvent::ItemProgress { id: ids[0], percent: 40 });

        assert_eq!(state.phase, WizardPhase::Processing);
        assert_eq!(state.events.len(), 2);
        assert_eq!(state.progress.items()[0].percent, 40);
    }

    #[test]
    fn event_log_is_bounded() {
        let (mut state, ids) = state_with_two_items();
        for _ in 0..(EVENTS_MAX + 5) {
            record(
                &mut state,
                ProgressEvent::ItemFailed {
                    id: ids[1],
                    reason: "network timeout".to_string(),
                },
            );
        }
        assert_eq!(state.events.len(), EVENTS_MAX);
    }

    #[test]
    fn ctrl_c_closes_only_with_modifier() {
        let plain = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::NONE);
        let ctrl = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert!(!is_close_key(plain));
        assert!(is_close_key(ctrl));
    }
}
