//! Keyboard input handling for the TUI.
//!
//! Translates key events into prompt edits, history recall, scrolling and
//! command submission.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::app::{App, AppState, PAGE_SCROLL_SIZE};

/// Handle keyboard input. Returns true if the app should quit.
pub fn handle_input(app: &mut App, key: KeyEvent) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return handle_control(app, key.code);
    }

    match app.state {
        AppState::EnteringPassword => handle_password_input(app, key),
        AppState::Normal => handle_prompt_input(app, key),
        AppState::Quitting => {}
    }
    app.state == AppState::Quitting
}

fn handle_control(app: &mut App, code: KeyCode) -> bool {
    match code {
        KeyCode::Char('c') | KeyCode::Char('d') => return true,
        KeyCode::Char('l') => app.clear_output(),
        KeyCode::Char('u') if app.state == AppState::Normal => app.prompt.clear(),
        KeyCode::Char('a') => app.prompt.home(),
        KeyCode::Char('e') => app.prompt.end(),
        _ => {}
    }
    false
}

fn handle_password_input(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Enter => app.submit_password(),
        KeyCode::Esc => app.cancel_password(),
        KeyCode::Backspace => {
            app.password.pop();
        }
        KeyCode::Char(c) => app.add_password_char(c),
        _ => {}
    }
}

fn handle_prompt_input(app: &mut App, key: KeyEvent) {
    // Scrolling works while a command is running; editing does not
    match key.code {
        KeyCode::PageUp => return app.scroll_up(PAGE_SCROLL_SIZE),
        KeyCode::PageDown => return app.scroll_down(PAGE_SCROLL_SIZE),
        _ if app.is_busy() => return,
        _ => {}
    }

    match key.code {
        KeyCode::Enter => app.submit(),
        KeyCode::Char(c) => app.prompt.insert(c),
        KeyCode::Backspace => app.prompt.backspace(),
        KeyCode::Delete => app.prompt.delete(),
        KeyCode::Left => app.prompt.left(),
        KeyCode::Right => app.prompt.right(),
        KeyCode::Home => app.prompt.home(),
        KeyCode::End => app.prompt.end(),
        KeyCode::Up => app.prompt.history_up(),
        KeyCode::Down => app.prompt.history_down(),
        KeyCode::Esc => app.prompt.clear(),
        _ => {}
    }
}
