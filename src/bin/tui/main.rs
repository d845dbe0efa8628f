mod app;

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, Wrap},
    Frame, Terminal,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use app::{cycle_sheet, price_or_dash, truncate, AppState, Focus};
use sheet_bridge::config::Config;
use sheet_bridge::sheet::{SqliteWorkbook, Workbook};
use sheet_bridge::{ChannelStatusSink, HttpJobClient, Orchestrator, Severity, StatusEvent};

/// A search in flight: its task and the token that stops its poll loop.
struct ActiveRun {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();
    let cfg = Config::from_env().map_err(|e| io::Error::other(format!("Config error: {e}")))?;

    // The terminal belongs to the UI, so logs go to a file.
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cfg.log_file)?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();

    let workbook: Arc<dyn Workbook> = Arc::new(
        SqliteWorkbook::open(&cfg.workbook_path)
            .await
            .map_err(|e| io::Error::other(format!("Workbook error: {e}")))?,
    );
    let backend = Arc::new(HttpJobClient::from_config(&cfg).map_err(|e| io::Error::other(e.to_string()))?);
    let orchestrator = Arc::new(Orchestrator::new(backend, Arc::clone(&workbook), cfg.poll_policy()));
    info!(proxy = %cfg.proxy_base_url, workbook = %cfg.workbook_path, "TUI starting");

    let mut app = AppState::new();
    refresh_sheet(&mut app, workbook.as_ref()).await;

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, &mut app, orchestrator, workbook).await;

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    orchestrator: Arc<Orchestrator>,
    workbook: Arc<dyn Workbook>,
) -> io::Result<()> {
    let tick = Duration::from_millis(200);
    let (status_tx, mut status_rx) = mpsc::unbounded_channel::<StatusEvent>();
    let mut active: Option<ActiveRun> = None;

    loop {
        terminal.draw(|f| render(f, app))?;

        if event::poll(tick)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            if let Some(run) = &active {
                                run.cancel.cancel();
                            }
                            return Ok(());
                        }
                        KeyCode::Esc => match &active {
                            Some(run) => run.cancel.cancel(),
                            None => return Ok(()),
                        },
                        KeyCode::Tab | KeyCode::BackTab => app.focus = app.focus.next(),
                        KeyCode::F(2) => app.toggle_destination(),
                        KeyCode::Enter => {
                            if let Some(request) = app.start_search() {
                                let sink = ChannelStatusSink::new(status_tx.clone());
                                let cancel = CancellationToken::new();
                                let token = cancel.clone();
                                let orch = Arc::clone(&orchestrator);
                                let task = tokio::spawn(async move {
                                    if let Err(e) = orch.run(request, &sink, token).await {
                                        debug!(kind = ?e.kind(), "Search ended with error: {e}");
                                    }
                                });
                                active = Some(ActiveRun { task, cancel });
                            }
                        }
                        KeyCode::PageDown | KeyCode::PageUp => {
                            let forward = key.code == KeyCode::PageDown;
                            if let Some(name) = cycle_sheet(&app.sheets, &app.sheet.name, forward) {
                                if let Err(e) = workbook.activate_sheet(&name).await {
                                    warn!("Could not activate sheet '{name}': {e}");
                                }
                                refresh_sheet(app, workbook.as_ref()).await;
                            }
                        }
                        KeyCode::Backspace => app.backspace(),
                        KeyCode::Char(c) => app.push_char(c),
                        _ => {}
                    }
                }
            }
        }

        while let Ok(event) = status_rx.try_recv() {
            app.apply(event);
        }

        if active.as_ref().is_some_and(|run| run.task.is_finished()) {
            active = None;
            // pick up anything sent just before the task ended
            while let Ok(event) = status_rx.try_recv() {
                app.apply(event);
            }
            app.running = false;
            refresh_sheet(app, workbook.as_ref()).await;
        }
    }
}

/// Show the workbook's active sheet.
async fn refresh_sheet(app: &mut AppState, workbook: &dyn Workbook) {
    let loaded = async {
        let sheets = workbook.sheet_names().await?;
        let active = workbook.active_sheet().await?;
        let grid = workbook.read_sheet(&active).await?;
        Ok::<_, sheet_bridge::sheet::DocumentError>((sheets, grid))
    }
    .await;

    match loaded {
        Ok((sheets, grid)) => {
            app.sheets = sheets;
            app.sheet = grid;
        }
        Err(e) => warn!("Could not read workbook: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &AppState) {
    let area = f.area();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // status
            Constraint::Length(3), // inputs
            Constraint::Length(3), // price boxes
            Constraint::Length(4), // trend
            Constraint::Min(0),    // sheet
            Constraint::Length(1), // footer
        ])
        .split(area);

    render_status(f, app, chunks[0]);
    render_inputs(f, app, chunks[1]);
    render_prices(f, app, chunks[2]);
    render_trend(f, app, chunks[3]);
    render_sheet(f, app, chunks[4]);
    render_footer(f, chunks[5]);
}

fn bordered(title: &str, color: Color) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
        .title(Span::styled(
            title,
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ))
}

fn render_status(f: &mut Frame, app: &AppState, area: Rect) {
    let (text, color) = match &app.status {
        Some((message, Severity::Normal)) => (message.clone(), Color::Green),
        Some((message, Severity::Error)) => (message.clone(), Color::Red),
        None => ("Ready.".to_string(), Color::DarkGray),
    };

    let mut spans = vec![
        Span::styled(
            " Sheet Bridge  ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(text, Style::default().fg(color)),
    ];
    if app.running {
        spans.push(Span::raw("  │  "));
        spans.push(Span::styled("◌ running", Style::default().fg(Color::Yellow)));
    }

    let paragraph = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::DarkGray)));
    f.render_widget(paragraph, area);
}

fn render_inputs(f: &mut Frame, app: &AppState, area: Rect) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(55),
            Constraint::Percentage(30),
            Constraint::Percentage(15),
        ])
        .split(area);

    let field = |value: &str, focused: bool, title: &'static str| {
        let border = if focused { Color::Yellow } else { Color::DarkGray };
        let cursor = if focused { "▏" } else { "" };
        Paragraph::new(format!("{value}{cursor}")).block(bordered(title, border))
    };

    f.render_widget(field(&app.site_url, app.focus == Focus::SiteUrl, " SITE URL "), cols[0]);
    f.render_widget(field(&app.keywords, app.focus == Focus::Keywords, " KEYWORDS "), cols[1]);

    let destination = match app.destination {
        sheet_bridge::Destination::NewSheet => "new sheet",
        sheet_bridge::Destination::ActiveSheet => "active sheet",
    };
    f.render_widget(
        Paragraph::new(destination).block(bordered(" WRITE TO ", Color::DarkGray)),
        cols[2],
    );
}

fn render_prices(f: &mut Frame, app: &AppState, area: Rect) {
    let boxes = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(33),
            Constraint::Percentage(34),
            Constraint::Percentage(33),
        ])
        .split(area);

    let prices = [
        (" LOWEST ", &app.summary.lowest, Color::Green),
        (" AVERAGE ", &app.summary.average, Color::White),
        (" HIGHEST ", &app.summary.highest, Color::Red),
    ];
    for (i, (title, value, color)) in prices.into_iter().enumerate() {
        let paragraph = Paragraph::new(Span::styled(
            price_or_dash(value).to_string(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ))
        .block(bordered(title, Color::DarkGray));
        f.render_widget(paragraph, boxes[i]);
    }
}

fn render_trend(f: &mut Frame, app: &AppState, area: Rect) {
    let paragraph = Paragraph::new(app.summary.trend.as_str())
        .wrap(Wrap { trim: true })
        .block(bordered(" TREND ", Color::DarkGray));
    f.render_widget(paragraph, area);
}

fn render_sheet(f: &mut Frame, app: &AppState, area: Rect) {
    let cols = app.sheet.col_count();
    let rows: Vec<Row> = app
        .sheet
        .rows
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let mut cells = vec![Cell::from(format!("{}", i + 1)).style(Style::default().fg(Color::DarkGray))];
            cells.extend((0..cols).map(|c| match line.get(c) {
                Some(cell) if cell.bold => Cell::from(truncate(&cell.value.to_string(), 24))
                    .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
                Some(cell) => Cell::from(truncate(&cell.value.to_string(), 24)),
                None => Cell::from(""),
            }));
            Row::new(cells)
        })
        .collect();

    let mut widths = vec![Constraint::Length(4)];
    widths.extend(std::iter::repeat(Constraint::Min(8)).take(cols));

    let title = match app.sheet_position() {
        Some(i) => format!(" {} ({}/{}) ", app.sheet.name, i + 1, app.sheets.len()),
        None => format!(" {} ", app.sheet.name),
    };

    let table = Table::new(rows, widths).block(bordered(&title, Color::DarkGray));
    f.render_widget(table, area);
}

fn render_footer(f: &mut Frame, area: Rect) {
    let line = Line::from(vec![
        Span::styled(" [enter] ", Style::default().fg(Color::Yellow)),
        Span::raw("search  "),
        Span::styled("[tab] ", Style::default().fg(Color::Yellow)),
        Span::raw("next field  "),
        Span::styled("[F2] ", Style::default().fg(Color::Yellow)),
        Span::raw("new/active sheet  "),
        Span::styled("[pgup/pgdn] ", Style::default().fg(Color::Yellow)),
        Span::raw("switch sheet  "),
        Span::styled("[esc] ", Style::default().fg(Color::Yellow)),
        Span::raw("cancel / quit"),
    ]);
    let paragraph = Paragraph::new(line).style(Style::default().fg(Color::White));
    f.render_widget(paragraph, area);
}
