use anyhow::{anyhow, Result};
use chrono::{Duration as ChronoDuration, Local, TimeZone};
use crossterm::event::{
    self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use nudge::input::{self, DATE_FORMAT, TIME_FORMAT};
use nudge::model::Task;
use nudge::presenter::format_time_until;
use nudge::{config, logging, Mutations, PopupPoller, Settings, TaskList, TaskStore};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::{Alignment, Color, Modifier, Rect, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Terminal;
use std::io::{stdout, Stdout};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn run(settings: Settings, store: TaskStore) -> Result<()> {
    if let Some(dir) = config::data_dir() {
        logging::init_file(&dir.join("nudge.log"), "info");
    }
    let mut terminal = setup_terminal()?;
    let mut app = App::new(settings, Arc::new(store));
    let result = app.event_loop(&mut terminal);
    teardown_terminal(&mut terminal)?;
    result
}

struct App {
    settings: Settings,
    store: Arc<TaskStore>,
    list: TaskList,
    poller: PopupPoller,
    /// Reminder popups currently on screen, newest first.
    popups: Vec<Task>,
    selected: usize,
    last_sync: Instant,
    status: String,
    mode: Mode,
}

enum Mode {
    Normal,
    Creating(TaskForm),
    Editing { task: Task, form: TaskForm },
    ConfirmDelete { task: Task },
}

struct TaskForm {
    message: FieldValue,
    time: FieldValue,
    date: FieldValue,
    field: FormField,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum FormField {
    Message,
    Time,
    Date,
}

#[derive(Clone)]
struct FieldValue {
    value: String,
    cursor: usize,
}

impl FieldValue {
    fn new(value: &str) -> Self {
        FieldValue {
            value: value.to_string(),
            cursor: value.len(),
        }
    }

    fn move_left(&mut self) {
        if let Some((idx, _)) = self.value[..self.cursor].char_indices().next_back() {
            self.cursor = idx;
        }
    }

    fn move_right(&mut self) {
        if let Some(ch) = self.value[self.cursor..].chars().next() {
            self.cursor += ch.len_utf8();
        }
    }

    fn backspace(&mut self) {
        let end = self.cursor;
        self.move_left();
        self.value.drain(self.cursor..end);
    }

    fn insert_char(&mut self, ch: char) {
        self.value.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
    }

    fn with_caret(&self) -> String {
        let mut text = self.value.clone();
        text.insert_str(self.cursor, "▌");
        text
    }
}

impl TaskForm {
    fn new() -> Self {
        let soon = Local::now() + ChronoDuration::minutes(10);
        TaskForm {
            message: FieldValue::new(""),
            time: FieldValue::new(&soon.format(TIME_FORMAT).to_string()),
            date: FieldValue::new(&soon.format(DATE_FORMAT).to_string()),
            field: FormField::Message,
        }
    }

    fn from_task(task: &Task) -> Self {
        let when = Local.timestamp_opt(task.fire_at, 0).single();
        let fmt = |pattern: &str| {
            when.map(|dt| dt.format(pattern).to_string()).unwrap_or_default()
        };
        TaskForm {
            message: FieldValue::new(&task.message),
            time: FieldValue::new(&fmt(TIME_FORMAT)),
            date: FieldValue::new(&fmt(DATE_FORMAT)),
            field: FormField::Message,
        }
    }

    fn next_field(&mut self) {
        self.field = match self.field {
            FormField::Message => FormField::Time,
            FormField::Time => FormField::Date,
            FormField::Date => FormField::Message,
        };
    }

    fn prev_field(&mut self) {
        self.field = match self.field {
            FormField::Message => FormField::Date,
            FormField::Time => FormField::Message,
            FormField::Date => FormField::Time,
        };
    }

    fn active_field_mut(&mut self) -> &mut FieldValue {
        match self.field {
            FormField::Message => &mut self.message,
            FormField::Time => &mut self.time,
            FormField::Date => &mut self.date,
        }
    }
}

impl App {
    fn new(settings: Settings, store: Arc<TaskStore>) -> Self {
        let status = format!("Queue at {}", store.path().display());
        let list = TaskList::new(Arc::clone(&store), &settings.list);
        let poller = PopupPoller::new(Arc::clone(&store), &settings.popup);
        App {
            settings,
            store,
            list,
            poller,
            popups: Vec::new(),
            selected: 0,
            last_sync: Instant::now(),
            status,
            mode: Mode::Normal,
        }
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        loop {
            self.poll_store();
            terminal.draw(|f| self.draw(f))?;
            if event::poll(Duration::from_millis(250))? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        if self.handle_key(key)? {
                            break;
                        }
                    }
                    Event::FocusGained => self.refresh("Refreshed"),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn poll_store(&mut self) {
        let now = Local::now().timestamp();
        if self.list.maybe_reload(now) {
            self.after_reload();
        }
        let due = self.poller.poll(now);
        if !due.is_empty() {
            self.status = format!("{} reminder(s) due", due.len());
            for task in due {
                self.popups.insert(0, task);
            }
        }
    }

    /// Called when the terminal regains focus or the user asks for it.
    fn refresh(&mut self, message: &str) {
        let now = Local::now().timestamp();
        self.list.on_visible(now);
        self.poller.refresh();
        self.after_reload();
        self.status = message.into();
    }

    fn after_reload(&mut self) {
        self.last_sync = Instant::now();
        let len = self.list.tasks().len();
        if self.selected >= len {
            self.selected = len.saturating_sub(1);
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        match self.mode {
            Mode::Normal if !self.popups.is_empty() => self.handle_popup_key(key),
            Mode::Normal => self.handle_normal_key(key),
            Mode::Creating(_) | Mode::Editing { .. } => self.handle_form_key(key),
            Mode::ConfirmDelete { .. } => self.handle_confirm_key(key),
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Up | KeyCode::Char('k') => self.selected = self.selected.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected + 1 < self.list.tasks().len() {
                    self.selected += 1;
                }
            }
            KeyCode::Char('n') | KeyCode::Char('a') => {
                self.mode = Mode::Creating(TaskForm::new());
                self.status = "New reminder (Tab/Shift-Tab move, Enter save, Esc cancel)".into();
            }
            KeyCode::Char('e') => match self.current_task() {
                Some(task) => {
                    let form = TaskForm::from_task(&task);
                    self.status = format!("Editing \"{}\"", task.message);
                    self.mode = Mode::Editing { task, form };
                }
                None => self.status = "No reminder selected to edit".into(),
            },
            KeyCode::Char('d') => match self.current_task() {
                Some(task) => {
                    self.status = format!(
                        "Delete \"{}\"? (y to confirm, n/Esc to cancel)",
                        task.message
                    );
                    self.mode = Mode::ConfirmDelete { task };
                }
                None => self.status = "No reminder selected to delete".into(),
            },
            KeyCode::Char('c') => {
                if let Some(task) = self.current_task() {
                    self.complete(&task);
                }
            }
            KeyCode::Char('s') => {
                if let Some(task) = self.current_task() {
                    self.snooze(&task);
                }
            }
            KeyCode::Char('r') => self.refresh("Reloaded from disk"),
            _ => {}
        }
        Ok(false)
    }

    fn handle_popup_key(&mut self, key: KeyEvent) -> Result<bool> {
        let task = self.popups[0].clone();
        match key.code {
            KeyCode::Char('c') => {
                self.complete(&task);
                self.popups.remove(0);
            }
            KeyCode::Char('s') => {
                self.snooze(&task);
                self.popups.remove(0);
            }
            KeyCode::Esc | KeyCode::Char('x') => {
                self.popups.remove(0);
                self.status = "Dismissed".into();
            }
            KeyCode::Char('q') => return Ok(true),
            _ => {}
        }
        Ok(false)
    }

    fn handle_form_key(&mut self, key: KeyEvent) -> Result<bool> {
        let mut mode = std::mem::replace(&mut self.mode, Mode::Normal);
        let close_form = match &mut mode {
            Mode::Creating(form) => self.process_form_key(None, form, key),
            Mode::Editing { task, form } => {
                let task = task.clone();
                self.process_form_key(Some(task), form, key)
            }
            Mode::ConfirmDelete { .. } | Mode::Normal => false,
        };
        self.mode = if close_form { Mode::Normal } else { mode };
        Ok(false)
    }

    fn handle_confirm_key(&mut self, key: KeyEvent) -> Result<bool> {
        let task = match &self.mode {
            Mode::ConfirmDelete { task } => task.clone(),
            _ => return Ok(false),
        };
        match key.code {
            KeyCode::Char('y') | KeyCode::Enter => {
                if Mutations::new(&self.store).delete(&task) {
                    self.reload_after_write(format!("Deleted \"{}\"", task.message));
                } else {
                    self.status = "Delete failed, see log".into();
                }
                self.mode = Mode::Normal;
            }
            KeyCode::Char('n') | KeyCode::Esc => {
                self.status = "Delete canceled".into();
                self.mode = Mode::Normal;
            }
            _ => {}
        }
        Ok(false)
    }

    fn process_form_key(
        &mut self,
        editing: Option<Task>,
        form: &mut TaskForm,
        key: KeyEvent,
    ) -> bool {
        match key.code {
            KeyCode::Esc => {
                self.status = "Canceled".into();
                return true;
            }
            KeyCode::Tab => form.next_field(),
            KeyCode::BackTab => form.prev_field(),
            KeyCode::Left => form.active_field_mut().move_left(),
            KeyCode::Right => form.active_field_mut().move_right(),
            KeyCode::Enter => match self.submit(editing, form) {
                Ok(message) => {
                    self.reload_after_write(message);
                    return true;
                }
                Err(err) => self.status = format!("Not saved: {}", err),
            },
            KeyCode::Backspace => form.active_field_mut().backspace(),
            KeyCode::Char(c) => {
                if !key
                    .modifiers
                    .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT)
                {
                    form.active_field_mut().insert_char(c);
                }
            }
            _ => {}
        }
        false
    }

    fn submit(&self, editing: Option<Task>, form: &TaskForm) -> Result<String> {
        let now = Local::now();
        let api = Mutations::new(&self.store);
        match editing {
            None => {
                let task = input::new_task(
                    &form.message.value,
                    &form.time.value,
                    Some(&form.date.value),
                    &now,
                )?;
                let message = format!("Added \"{}\"", task.message);
                if !api.add(task) {
                    return Err(anyhow!("could not write the queue"));
                }
                Ok(message)
            }
            Some(old) => {
                let task = input::edited_task(
                    &old,
                    Some(&form.message.value),
                    Some(&form.time.value),
                    Some(&form.date.value),
                    &now,
                )?;
                let message = format!("Updated \"{}\"", task.message);
                if !api.update(&old, task) {
                    return Err(anyhow!("could not write the queue"));
                }
                Ok(message)
            }
        }
    }

    fn complete(&mut self, task: &Task) {
        if Mutations::new(&self.store).complete(task) {
            self.reload_after_write(format!("Completed \"{}\"", task.message));
        } else {
            self.status = "Complete failed, see log".into();
        }
    }

    fn snooze(&mut self, task: &Task) {
        let minutes = self.settings.snooze.minutes;
        if Mutations::new(&self.store).snooze(task, minutes) {
            self.reload_after_write(format!("Snoozed \"{}\" for {} min", task.message, minutes));
        } else {
            self.status = "Snooze failed, see log".into();
        }
    }

    fn reload_after_write(&mut self, message: String) {
        self.list.reload(Local::now().timestamp());
        self.after_reload();
        self.status = message;
    }

    fn current_task(&self) -> Option<Task> {
        self.list.tasks().get(self.selected).cloned()
    }

    fn draw(&mut self, f: &mut ratatui::Frame<'_>) {
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(5),
                Constraint::Length(3),
            ])
            .split(f.size());

        self.draw_header(f, layout[0]);
        self.draw_tasks(f, layout[1]);
        self.draw_footer(f, layout[2]);

        match &self.mode {
            Mode::Creating(form) => draw_form(f, "New Reminder", form),
            Mode::Editing { form, .. } => draw_form(f, "Edit Reminder", form),
            Mode::ConfirmDelete { task } => draw_confirm(f, task),
            Mode::Normal => {}
        }
        if let Some(task) = self.popups.first() {
            draw_popup(f, task, self.popups.len());
        }
    }

    fn draw_header(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let pill = self.list.next_pill(Local::now().timestamp());
        let mut spans = vec![
            Span::styled(
                "nudge ",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(pill.title, Style::default().add_modifier(Modifier::BOLD)),
        ];
        if let Some(meta) = pill.meta {
            spans.push(Span::raw("  •  "));
            spans.push(Span::styled(meta, Style::default().fg(Color::Green)));
        }
        spans.push(Span::raw("  •  "));
        spans.push(Span::styled(
            format!("synced {}", format_elapsed(self.last_sync)),
            Style::default().fg(Color::Gray),
        ));

        let block = Block::default()
            .borders(Borders::BOTTOM)
            .border_style(Style::default().fg(Color::DarkGray));
        let paragraph = Paragraph::new(Line::from(spans))
            .alignment(Alignment::Center)
            .block(block);
        f.render_widget(paragraph, area);
    }

    fn draw_tasks(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let now = Local::now().timestamp();
        let tasks = self.list.tasks();
        if tasks.is_empty() {
            let empty = Paragraph::new("No upcoming reminders. Press n to add one.")
                .alignment(Alignment::Center)
                .style(Style::default().fg(Color::DarkGray));
            f.render_widget(empty, area);
            return;
        }
        let items: Vec<ListItem> = tasks.iter().map(|t| task_item(t, now)).collect();
        let mut state = ListState::default();
        state.select(Some(self.selected));
        let list = List::new(items)
            .block(
                Block::default()
                    .title(format!("Upcoming ({})", tasks.len()))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .highlight_style(
                Style::default()
                    .bg(Color::LightCyan)
                    .fg(Color::Black)
                    .add_modifier(Modifier::BOLD),
            );
        f.render_stateful_widget(list, area, &mut state);
    }

    fn draw_footer(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(1), Constraint::Length(2)])
            .split(area);
        f.render_widget(
            Paragraph::new(help_line(!self.popups.is_empty())).alignment(Alignment::Center),
            rows[0],
        );
        let status = Paragraph::new(self.status.clone())
            .wrap(Wrap { trim: true })
            .block(
                Block::default()
                    .borders(Borders::TOP)
                    .border_style(Style::default().fg(Color::DarkGray)),
            );
        f.render_widget(status, rows[1]);
    }
}

fn help_line(popup: bool) -> Line<'static> {
    let keys: &[(&str, &str)] = if popup {
        &[("c", "complete"), ("s", "snooze"), ("x/Esc", "dismiss"), ("q", "quit")]
    } else {
        &[
            ("n", "new"),
            ("e", "edit"),
            ("d", "delete"),
            ("c", "complete"),
            ("s", "snooze"),
            ("r", "reload"),
            ("q", "quit"),
        ]
    };
    let mut spans = Vec::new();
    for (key, label) in keys {
        spans.push(Span::styled(*key, Style::default().fg(Color::LightCyan)));
        spans.push(Span::raw(format!(" {}  ", label)));
    }
    Line::from(spans)
}

fn task_item(task: &Task, now: i64) -> ListItem<'static> {
    let when = Local
        .timestamp_opt(task.fire_at, 0)
        .single()
        .map(|dt| dt.format("%d.%m %H:%M").to_string())
        .unwrap_or_default();
    ListItem::new(Line::from(vec![
        Span::styled(format!("{:<12}", when), Style::default().fg(Color::LightRed)),
        Span::styled(
            format!("{:<10}", format_time_until(task.fire_at, now)),
            Style::default().fg(Color::Gray),
        ),
        Span::raw(task.message.clone()),
    ]))
}

fn draw_form(f: &mut ratatui::Frame<'_>, title: &str, form: &TaskForm) {
    let area = centered_rect(60, 40, f.size());
    let fields = vec![
        field_line("Message", &form.message, form.field == FormField::Message),
        field_line("Time (HH:MM)", &form.time, form.field == FormField::Time),
        field_line("Date (DD-MM-YYYY)", &form.date, form.field == FormField::Date),
        Line::from(""),
        Line::from(Span::styled(
            "Enter to save • Esc to cancel • Tab/Shift-Tab to move",
            Style::default().fg(Color::Gray),
        )),
    ];
    let dialog = Paragraph::new(fields)
        .block(
            Block::default()
                .title(Span::styled(
                    title.to_string(),
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .wrap(Wrap { trim: true });

    f.render_widget(Clear, area);
    f.render_widget(dialog, area);
}

fn draw_confirm(f: &mut ratatui::Frame<'_>, task: &Task) {
    let area = centered_rect(50, 30, f.size());
    let body = vec![
        Line::from(Span::styled(
            format!("Delete \"{}\"?", task.message),
            Style::default()
                .fg(Color::LightRed)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from("Press y to confirm, n or Esc to cancel"),
    ];
    let dialog = Paragraph::new(body).alignment(Alignment::Center).block(
        Block::default()
            .title(Span::styled(
                "Confirm Delete",
                Style::default()
                    .fg(Color::LightRed)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::LightRed)),
    );
    f.render_widget(Clear, area);
    f.render_widget(dialog, area);
}

/// Reminder card pinned to the top-right corner.
fn draw_popup(f: &mut ratatui::Frame<'_>, task: &Task, pending: usize) {
    let screen = f.size();
    let width = screen.width.min(44);
    let area = Rect::new(screen.x + screen.width - width, screen.y, width, 7.min(screen.height));
    let scheduled = Local
        .timestamp_opt(task.fire_at, 0)
        .single()
        .map(|dt| dt.format("%H:%M").to_string())
        .unwrap_or_default();
    let mut body = vec![
        Line::from(Span::styled(
            task.message.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            format!("Scheduled: {}", scheduled),
            Style::default().fg(Color::Gray),
        )),
    ];
    if pending > 1 {
        body.push(Line::from(Span::styled(
            format!("+{} more", pending - 1),
            Style::default().fg(Color::DarkGray),
        )));
    }
    let card = Paragraph::new(body).wrap(Wrap { trim: true }).block(
        Block::default()
            .title(Span::styled(
                "⏰ Task Reminder",
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow)),
    );
    f.render_widget(Clear, area);
    f.render_widget(card, area);
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen, EnableFocusChange)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn teardown_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        DisableFocusChange,
        LeaveAlternateScreen
    )?;
    terminal.show_cursor()?;
    Ok(())
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

fn field_line(label: &str, field: &FieldValue, active: bool) -> Line<'static> {
    let label_style = Style::default()
        .fg(Color::Gray)
        .add_modifier(Modifier::BOLD | Modifier::DIM);
    let value_style = Style::default().fg(if active { Color::Cyan } else { Color::White });
    let text = if active {
        field.with_caret()
    } else {
        field.value.clone()
    };
    Line::from(vec![
        Span::styled(format!("{}: ", label), label_style),
        Span::styled(text, value_style),
    ])
}

fn format_elapsed(last: Instant) -> String {
    let secs = last.elapsed().as_secs();
    if secs < 60 {
        format!("{}s ago", secs)
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else {
        format!("{}h ago", secs / 3600)
    }
}
