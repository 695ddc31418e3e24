//! Interactive main menu.
//!
//! The menu owns the terminal only while it is on screen. Selecting an entry
//! restores the terminal, runs the action in the plain console and then
//! draws the menu again with the action's result in the status line.

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuItem {
    AddFace,
    VerifyFace,
    Exit,
}

impl MenuItem {
    pub fn all() -> &'static [MenuItem] {
        &[MenuItem::AddFace, MenuItem::VerifyFace, MenuItem::Exit]
    }

    pub fn label(&self) -> &'static str {
        match self {
            MenuItem::AddFace => "Add New Face",
            MenuItem::VerifyFace => "Verify Face",
            MenuItem::Exit => "Exit",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MenuItem::AddFace => "Enroll a person from the camera",
            MenuItem::VerifyFace => "Liveness check, then identify",
            MenuItem::Exit => "Quit facegate",
        }
    }
}

#[derive(Debug, Default)]
pub struct MenuState {
    pub index: usize,
    status: Option<String>,
    status_is_error: bool,
}

impl MenuState {
    pub fn selected(&self) -> MenuItem {
        MenuItem::all()[self.index]
    }

    pub fn next(&mut self) {
        self.index = (self.index + 1) % MenuItem::all().len();
    }

    pub fn previous(&mut self) {
        let len = MenuItem::all().len();
        self.index = (self.index + len - 1) % len;
    }

    pub fn set_status(&mut self, msg: impl Into<String>, is_error: bool) {
        self.status = Some(msg.into());
        self.status_is_error = is_error;
    }

    /// Apply a key press. Returns the item to run, if one was chosen.
    pub fn handle_key(&mut self, key: KeyEvent) -> Option<MenuItem> {
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => self.previous(),
            KeyCode::Down | KeyCode::Char('j') | KeyCode::Tab => self.next(),
            KeyCode::Enter => return Some(self.selected()),
            KeyCode::Char(c @ '1'..='9') => {
                let idx = c as usize - '1' as usize;
                if let Some(item) = MenuItem::all().get(idx) {
                    self.index = idx;
                    return Some(*item);
                }
            }
            KeyCode::Char('q') | KeyCode::Esc => return Some(MenuItem::Exit),
            _ => {}
        }
        None
    }
}

pub fn draw(frame: &mut Frame, state: &MenuState) {
    let area = frame.area();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Title
            Constraint::Min(0),    // Items
            Constraint::Length(1), // Status
            Constraint::Length(1), // Help
        ])
        .split(area);

    let title = Paragraph::new("facegate")
        .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(title, chunks[0]);

    let items: Vec<ListItem> = MenuItem::all()
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let prefix = if i == state.index { "▶ " } else { "  " };
            let style = if i == state.index {
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            let content = format!("{prefix}{:<14} {}", item.label(), item.description());
            ListItem::new(content).style(style)
        })
        .collect();
    frame.render_widget(List::new(items), centered_rect(80, 50, chunks[1]));

    if let Some(status) = &state.status {
        let color = if state.status_is_error { Color::Red } else { Color::Green };
        frame.render_widget(
            Paragraph::new(status.as_str()).style(Style::default().fg(color)),
            chunks[2],
        );
    }

    let help = Paragraph::new("↑/↓ move  Enter select  q quit")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, chunks[3]);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

/// Show the menu until the user picks an entry.
fn pick<B: Backend>(terminal: &mut Terminal<B>, state: &mut MenuState) -> Result<MenuItem> {
    loop {
        terminal.draw(|f| draw(f, state))?;
        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            if let Some(item) = state.handle_key(key) {
                return Ok(item);
            }
        }
    }
}

/// Run the menu, calling `on_select` for every entry except Exit.
///
/// `on_select` runs with the terminal restored. Its message goes to the
/// status line; an error is shown in red and does not end the menu.
pub fn run<F>(mut on_select: F) -> Result<()>
where
    F: FnMut(MenuItem) -> Result<String>,
{
    let mut state = MenuState::default();
    loop {
        // Setup terminal
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

        let choice = pick(&mut terminal, &mut state);

        // Restore terminal
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        match choice? {
            MenuItem::Exit => return Ok(()),
            item => match on_select(item) {
                Ok(msg) => state.set_status(msg, false),
                Err(e) => {
                    tracing::error!(error = %e, item = item.label(), "menu action failed");
                    state.set_status(format!("{e:#}"), true);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyModifiers;
    use ratatui::backend::TestBackend;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn rendered(state: &MenuState) -> String {
        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
        terminal.draw(|f| draw(f, state)).unwrap();
        let buffer = terminal.backend().buffer();
        buffer.content().iter().map(|c| c.symbol()).collect()
    }

    #[test]
    fn test_navigation_wraps() {
        let mut state = MenuState::default();
        state.handle_key(key(KeyCode::Up));
        assert_eq!(state.selected(), MenuItem::Exit);
        state.handle_key(key(KeyCode::Down));
        assert_eq!(state.selected(), MenuItem::AddFace);
        state.handle_key(key(KeyCode::Char('j')));
        assert_eq!(state.selected(), MenuItem::VerifyFace);
    }

    #[test]
    fn test_selection_keys() {
        let mut state = MenuState::default();
        assert_eq!(state.handle_key(key(KeyCode::Enter)), Some(MenuItem::AddFace));
        assert_eq!(state.handle_key(key(KeyCode::Char('2'))), Some(MenuItem::VerifyFace));
        assert_eq!(state.index, 1);
        assert_eq!(state.handle_key(key(KeyCode::Char('7'))), None);
        assert_eq!(state.handle_key(key(KeyCode::Esc)), Some(MenuItem::Exit));
        assert_eq!(state.handle_key(key(KeyCode::Char('x'))), None);
    }

    #[test]
    fn test_draw_shows_items_and_status() {
        let mut state = MenuState::default();
        state.set_status("No faces saved. Please add a face first.", true);
        let screen = rendered(&state);

        for item in MenuItem::all() {
            assert!(screen.contains(item.label()), "missing {}", item.label());
        }
        assert!(screen.contains("No faces saved"));
    }
}
