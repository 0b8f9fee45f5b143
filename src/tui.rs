//! Terminal render loop: draws the resource table and forwards key events
//! into the Interactive Controller. Out of core scope — the logic under
//! test lives in `controller`, this is just the `ratatui`/`crossterm`
//! plumbing around it.

use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Constraint;
use ratatui::style::{Modifier, Style};
use ratatui::widgets::{Block, Borders, Cell, Row, Table};

use crate::controller::{
    ArrowKey, Command, Controller, ReplicaCounts, command_for_arrow, command_for_key, derive_status_text,
};

const POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Runs the interactive table until the user quits. Installs and restores
/// raw mode / the alternate screen around the loop.
pub async fn run(mut controller: Controller) -> io::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, &mut controller).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

async fn event_loop<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    controller: &mut Controller,
) -> io::Result<()> {
    loop {
        let rows = snapshot_rows(controller).await;
        let selected = controller.selected_index();
        terminal.draw(|frame| draw(frame, &rows, selected))?;

        if !event::poll(POLL_INTERVAL)? {
            continue;
        }

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        let command = match key.code {
            KeyCode::Up => Command::MoveUp,
            KeyCode::Down => Command::MoveDown,
            KeyCode::Esc => command_for_arrow(ArrowKey::Escape),
            KeyCode::Char(c) => command_for_key(c),
            _ => Command::Noop,
        };

        controller.apply(command).await;
        if controller.quit_requested() {
            return Ok(());
        }
    }
}

/// A row worth of already-derived display data for one resource, fetched
/// fresh on every draw so the table never holds a lock across frames.
struct RowView {
    kind: String,
    namespace: String,
    name: String,
    replicas: Option<i64>,
    status: String,
}

async fn snapshot_rows(controller: &Controller) -> Vec<RowView> {
    let mut rows = Vec::with_capacity(controller.resources().len());
    for resource in controller.resources() {
        let observed = resource.observed().await;
        let counts = observed
            .status
            .as_ref()
            .map(ReplicaCounts::from_status_json)
            .unwrap_or_default();
        let status = derive_status_text(counts, observed.proxy_installed, resource.is_forwarding().await);
        rows.push(RowView {
            kind: resource.kind().await,
            namespace: resource.namespace().await,
            name: resource.name().await,
            replicas: resource.replicas().await,
            status: status.to_string(),
        });
    }
    rows
}

fn draw(frame: &mut ratatui::Frame, rows: &[RowView], selected: usize) {
    let header = Row::new(vec!["", "KIND", "NAMESPACE", "NAME", "REPLICAS", "STATUS"])
        .style(Style::default().add_modifier(Modifier::BOLD));

    let table_rows: Vec<Row> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let marker = if i == selected { ">" } else { " " };
            Row::new(vec![
                Cell::from(marker),
                Cell::from(row.kind.clone()),
                Cell::from(row.namespace.clone()),
                Cell::from(row.name.clone()),
                Cell::from(row.replicas.map(|r| r.to_string()).unwrap_or_default()),
                Cell::from(row.status.clone()),
            ])
        })
        .collect();

    let widths = [
        Constraint::Length(1),
        Constraint::Length(14),
        Constraint::Length(14),
        Constraint::Length(24),
        Constraint::Length(9),
        Constraint::Min(10),
    ];

    let table = Table::new(table_rows, widths)
        .header(header)
        .block(Block::default().title("devexy").borders(Borders::ALL));

    frame.render_widget(table, frame.area());
}
