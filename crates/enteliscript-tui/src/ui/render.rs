use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use enteliscript_core::auth::SessionState;

use crate::app::{App, AppState};

use super::styles;

/// Prompt prefix shown before the command line
const PROMPT: &str = "> ";
const PASSWORD_PROMPT: &str = "Password: ";

pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2), // Title bar
            Constraint::Min(5),    // Output log
            Constraint::Length(3), // Prompt
            Constraint::Length(1), // Status bar
        ])
        .split(frame.area());

    render_title_bar(frame, app, chunks[0]);
    render_output(frame, app, chunks[1]);
    render_prompt(frame, app, chunks[2]);
    render_status_bar(frame, app, chunks[3]);
}

fn render_title_bar(frame: &mut Frame, app: &App, area: Rect) {
    let title = "  enteliscript";
    let server = app
        .status
        .server
        .as_ref()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "no server".to_string());
    let right = format!("{}  ", server);

    let title_line = Line::from(vec![
        Span::styled(title, styles::title_style()),
        Span::raw(" ".repeat(
            (area.width as usize).saturating_sub(title.len() + right.chars().count()),
        )),
        Span::styled(right, styles::muted_style()),
    ]);

    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(styles::muted_style());

    frame.render_widget(Paragraph::new(title_line).block(block), area);
}

fn render_output(frame: &mut Frame, app: &App, area: Rect) {
    let (start, end) = visible_window(app.output.len(), area.height as usize, app.scroll);
    let lines: Vec<Line> = app.output[start..end]
        .iter()
        .map(|line| Line::from(Span::styled(line.text.as_str(), styles::line_style(line.kind))))
        .collect();

    frame.render_widget(Paragraph::new(lines), area);
}

fn render_prompt(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(styles::border_style(!app.is_busy()));
    let inner = block.inner(area);

    let (label, text, cursor) = match app.state {
        AppState::EnteringPassword => {
            let masked = "*".repeat(app.password.chars().count());
            let cursor = masked.len();
            (PASSWORD_PROMPT, masked, cursor)
        }
        _ => (PROMPT, app.prompt.text().to_string(), app.prompt.cursor()),
    };

    let width = (inner.width as usize).saturating_sub(label.len());
    let (visible, cursor_col) = prompt_view(&text, cursor, width);

    let line = Line::from(vec![
        Span::styled(label, styles::highlight_style()),
        Span::raw(visible),
    ]);
    frame.render_widget(Paragraph::new(line).block(block), area);

    if !app.is_busy() {
        frame.set_cursor_position((
            inner.x + (label.len() + cursor_col) as u16,
            inner.y,
        ));
    }
}

fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let left = if app.is_busy() {
        format!(" {} working... ", app.spinner())
    } else {
        let state = match app.status.state {
            SessionState::Active => "connected",
            SessionState::Expired => "session expired",
            SessionState::Unauthenticated => "not logged in",
        };
        match app.status.username {
            Some(ref user) => format!(" {} ({}) ", user, state),
            None => format!(" {} ", state),
        }
    };

    let right = match app.state {
        AppState::EnteringPassword => " [Enter] log in | [Esc] cancel ",
        _ => " [↑↓] history | [PgUp/PgDn] scroll | [Ctrl+C] quit ",
    };

    let padding = (area.width as usize)
        .saturating_sub(left.chars().count())
        .saturating_sub(right.chars().count());
    let left_style = match app.status.state {
        _ if app.is_busy() => styles::highlight_style(),
        SessionState::Active => styles::success_style(),
        SessionState::Expired => styles::highlight_style(),
        SessionState::Unauthenticated => styles::error_style(),
    };

    let status_line = Line::from(vec![
        Span::styled(left, left_style),
        Span::raw(" ".repeat(padding)),
        Span::styled(right, styles::help_key_style()),
    ]);
    frame.render_widget(
        Paragraph::new(status_line).style(styles::status_bar_style()),
        area,
    );
}

/// Range of output lines to show in `height` rows, `scroll` lines up from
/// the bottom.
fn visible_window(len: usize, height: usize, scroll: usize) -> (usize, usize) {
    let end = len.saturating_sub(scroll);
    (end.saturating_sub(height), end)
}

/// Slice of `text` that fits in `width` columns with the cursor visible,
/// and the cursor's column within that slice.
fn prompt_view(text: &str, cursor: usize, width: usize) -> (String, usize) {
    if width == 0 {
        return (String::new(), 0);
    }
    let offset = cursor.saturating_sub(width - 1);
    let visible = text.chars().skip(offset).take(width).collect();
    (visible, cursor - offset)
}
