use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use printwatch_core::{Device, DeviceState, FleetSnapshot, Poller, SnmpClient};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph, Row, Table};
use ratatui::Terminal;

struct CountSeries {
    label: &'static str,
    color: Color,
    points: VecDeque<(f64, f64)>,
}

impl CountSeries {
    fn new(label: &'static str, color: Color) -> Self {
        Self {
            label,
            color,
            points: VecDeque::new(),
        }
    }

    fn push(&mut self, x: f64, y: f64, window_sec: f64) {
        self.points.push_back((x, y));
        while let Some((old_x, _)) = self.points.front() {
            if x - old_x > window_sec {
                self.points.pop_front();
            } else {
                break;
            }
        }
    }
}

struct ViewerState {
    start: Instant,
    latest: Option<FleetSnapshot>,
    online: CountSeries,
    issues: CountSeries,
    critical: CountSeries,
}

impl ViewerState {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            latest: None,
            online: CountSeries::new("online", Color::Green),
            issues: CountSeries::new("with issues", Color::Yellow),
            critical: CountSeries::new("critical", Color::Red),
        }
    }

    fn update(&mut self, fleet: FleetSnapshot, window_sec: f64) {
        let t = self.start.elapsed().as_secs_f64();
        self.online.push(t, fleet.online_count() as f64, window_sec);
        self.issues.push(t, fleet.with_issues as f64, window_sec);
        self.critical.push(t, fleet.critical_count() as f64, window_sec);
        self.latest = Some(fleet);
    }
}

pub async fn run_viewer<C: SnmpClient>(
    poller: &mut Poller<C>,
    devices: &[Device],
    window_sec: f64,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut state = ViewerState::new();
    let mut next_tick = Instant::now();
    let interval = poller.config().interval;

    let run_result = async {
        loop {
            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => break,
                        KeyCode::Char('r') => next_tick = Instant::now(),
                        _ => {}
                    }
                }
            }

            if Instant::now() >= next_tick {
                let fleet = poller.poll_fleet(devices).await;
                state.update(fleet, window_sec);
                next_tick = Instant::now() + interval;
            }

            terminal.draw(|frame| draw_ui(frame.size(), frame, &state, window_sec))?;
        }

        Ok::<(), anyhow::Error>(())
    }
    .await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    run_result
}

fn draw_ui(area: Rect, frame: &mut ratatui::Frame<'_>, state: &ViewerState, window_sec: f64) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Length(12),
        ])
        .split(area);

    frame.render_widget(render_header(state), rows[0]);
    frame.render_widget(render_table(state), rows[1]);
    render_counts_chart(frame, rows[2], state, window_sec);
}

fn render_header(state: &ViewerState) -> Paragraph<'static> {
    let line = match &state.latest {
        Some(fleet) => Line::from(vec![
            Span::styled("Printer Fleet  ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
            Span::raw(format!(
                "polled={} total={} online={} issues={} critical={}  ('r' refresh, 'q' quit)",
                fleet.timestamp.format("%H:%M:%S"),
                fleet.total,
                fleet.online_count(),
                fleet.with_issues,
                fleet.critical_count()
            )),
        ]),
        None => Line::from("Polling the fleet..."),
    };
    Paragraph::new(line).block(Block::default().borders(Borders::ALL).title("Status"))
}

fn state_color(state: DeviceState) -> Color {
    match state {
        DeviceState::OnlineClean => Color::Green,
        DeviceState::OnlineWarning => Color::Yellow,
        DeviceState::OnlineCritical => Color::Red,
        DeviceState::Offline => Color::DarkGray,
        DeviceState::Unknown => Color::Gray,
    }
}

fn render_table(state: &ViewerState) -> Table<'static> {
    let rows: Vec<Row> = state
        .latest
        .iter()
        .flat_map(|fleet| fleet.printers.iter())
        .map(|printer| {
            let device_state = DeviceState::from_snapshot(printer);
            let toner = printer
                .toner_level
                .map(|t| format!("{t}%"))
                .unwrap_or_else(|| "-".to_string());
            Row::new(vec![
                printer.sigla.clone(),
                printer.ip.clone(),
                device_state.label().to_string(),
                printer.status.clone(),
                toner,
                printer.error_state.clone(),
            ])
            .style(Style::default().fg(state_color(device_state)))
        })
        .collect();

    Table::new(
        rows,
        [
            Constraint::Length(18),
            Constraint::Length(16),
            Constraint::Length(16),
            Constraint::Length(10),
            Constraint::Length(6),
            Constraint::Min(10),
        ],
    )
    .header(
        Row::new(vec!["Label", "Address", "State", "Status", "Toner", "Errors"])
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .block(Block::default().borders(Borders::ALL).title("Devices"))
}

fn render_counts_chart(frame: &mut ratatui::Frame<'_>, area: Rect, state: &ViewerState, window_sec: f64) {
    let now_sec = state.start.elapsed().as_secs_f64();
    let series = [&state.online, &state.issues, &state.critical];
    let points: Vec<Vec<(f64, f64)>> = series
        .iter()
        .map(|s| s.points.iter().copied().collect())
        .collect();

    let y_max = points
        .iter()
        .flatten()
        .map(|(_, y)| *y)
        .fold(1.0_f64, f64::max)
        .ceil();
    let x_min = (now_sec - window_sec).max(0.0);
    let x_max = now_sec.max(window_sec);

    let datasets = series
        .iter()
        .zip(&points)
        .map(|(s, data)| {
            Dataset::default()
                .name(s.label)
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(s.color))
                .data(data)
        })
        .collect();

    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title("Fleet over time"))
        .x_axis(
            Axis::default()
                .title("time (s)")
                .style(Style::default().fg(Color::Gray))
                .bounds([x_min, x_max])
                .labels(vec![
                    Span::raw(format!("{x_min:.0}")),
                    Span::raw(format!("{x_max:.0}")),
                ]),
        )
        .y_axis(
            Axis::default()
                .title("devices")
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, y_max])
                .labels(vec![Span::raw("0"), Span::raw(format!("{y_max:.0}"))]),
        );

    frame.render_widget(chart, area);
}
