use super::events::{key_to_app_event, AppEvent, InputMode};
use super::TerminalManager;
use crate::audio::track::format_duration;
use crate::audio::{PlaybackState, PlayerBackend, Track, TrackStatus};
use crate::config::Config;
use crate::controller::Controller;
use anyhow::Result;
use crossterm::event::{self, Event, KeyEventKind};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Overlay {
    None,
    Help,
    UrlInput,
    PlaylistSave,
    PlaylistLoad,
}

pub struct App {
    terminal: TerminalManager,
    controller: Controller,
    tick_rate: Duration,

    overlay: Overlay,
    input: String,
    input_error: Option<String>,
    message: Option<String>,
    queue_state: ListState,
    playlist_names: Vec<String>,
    playlist_state: ListState,
    should_quit: bool,
}

/// Everything one frame needs, copied out so drawing doesn't borrow the app
struct View {
    tracks: Vec<Track>,
    current: Option<usize>,
    shuffled: bool,
    player_state: PlaybackState,
    download_percent: Option<f32>,
    playback_secs: u64,
    status: Option<String>,
    overlay: Overlay,
    input: String,
    input_error: Option<String>,
    playlist_names: Vec<String>,
}

impl App {
    pub fn new(config: &Config, backend: PlayerBackend) -> Result<Self> {
        let controller = Controller::new(config, backend);
        let terminal = TerminalManager::new()?;

        Ok(Self {
            terminal,
            controller,
            tick_rate: config.ui.tick_rate(),
            overlay: Overlay::None,
            input: String::new(),
            input_error: None,
            message: None,
            queue_state: ListState::default(),
            playlist_names: Vec::new(),
            playlist_state: ListState::default(),
            should_quit: false,
        })
    }

    /// Queue links given on the command line
    pub fn queue_urls(&mut self, urls: &[String]) {
        for url in urls {
            if let Err(e) = self.controller.add_url(url) {
                warn!(url = %url, error = %e, "skipping start-up url");
                self.message = Some(e.to_string());
            }
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("ui started");

        let mut terminal_events = spawn_terminal_reader();
        let mut ticker = time::interval(self.tick_rate.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !self.should_quit {
            tokio::select! {
                incoming = terminal_events.recv() => match incoming {
                    Some(Ok(event)) => self.handle_terminal_event(event)?,
                    Some(Err(e)) => return Err(e.into()),
                    None => self.should_quit = true,
                },
                _ = self.controller.process_next() => {}
                _ = ticker.tick() => self.render()?,
            }
        }

        self.controller.shutdown();
        info!("ui stopped");
        Ok(())
    }

    fn handle_terminal_event(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if let Some(app_event) = key_to_app_event(self.input_mode(), key) {
                    self.handle_event(app_event);
                    self.render()?;
                }
            }
            Event::Resize(_, _) => self.render()?,
            _ => {}
        }
        Ok(())
    }

    fn input_mode(&self) -> InputMode {
        match self.overlay {
            Overlay::UrlInput | Overlay::PlaylistSave => InputMode::Text,
            Overlay::PlaylistLoad => InputMode::PlaylistPicker,
            Overlay::None | Overlay::Help => InputMode::Normal,
        }
    }

    fn handle_event(&mut self, event: AppEvent) {
        match (self.overlay, event) {
            (_, AppEvent::Quit) => self.should_quit = true,
            (_, AppEvent::Cancel) => self.close_overlay(),

            // text fields
            (Overlay::UrlInput | Overlay::PlaylistSave, AppEvent::Input(c)) => {
                self.input.push(c);
                self.input_error = None;
            }
            (Overlay::UrlInput | Overlay::PlaylistSave, AppEvent::Backspace) => {
                self.input.pop();
            }
            (Overlay::UrlInput, AppEvent::Submit) => {
                match self.controller.add_url(self.input.trim()) {
                    Ok(_) => self.close_overlay(),
                    Err(e) => self.input_error = Some(e.to_string()),
                }
            }
            (Overlay::PlaylistSave, AppEvent::Submit) => {
                let name = self.input.trim().to_string();
                match self.controller.save_playlist(&name) {
                    Ok(playlist) => {
                        self.close_overlay();
                        self.message = Some(format!(
                            "Saved \"{}\" ({} tracks)",
                            playlist.name,
                            playlist.tracks.len()
                        ));
                    }
                    Err(e) => self.input_error = Some(e.to_string()),
                }
            }

            // playlist picker
            (Overlay::PlaylistLoad, AppEvent::Up) => {
                move_selection(&mut self.playlist_state, self.playlist_names.len(), -1)
            }
            (Overlay::PlaylistLoad, AppEvent::Down) => {
                move_selection(&mut self.playlist_state, self.playlist_names.len(), 1)
            }
            (Overlay::PlaylistLoad, AppEvent::Submit) => {
                if let Some(name) = self.selected_playlist() {
                    match self.controller.load_playlist(&name) {
                        Ok(count) => {
                            self.close_overlay();
                            self.queue_state.select(Some(0));
                            self.message = Some(format!("Loaded \"{}\" ({} tracks)", name, count));
                        }
                        Err(e) => self.input_error = Some(e.to_string()),
                    }
                }
            }
            (Overlay::PlaylistLoad, AppEvent::DeletePlaylist) => {
                if let Some(name) = self.selected_playlist() {
                    match self.controller.delete_playlist(&name) {
                        Ok(()) => self.refresh_playlists(),
                        Err(e) => self.input_error = Some(e.to_string()),
                    }
                }
            }

            // main view
            (Overlay::None | Overlay::Help, event) => self.handle_main_event(event),

            _ => {}
        }
    }

    fn handle_main_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::TogglePlayPause => self.controller.toggle_play_pause(),
            AppEvent::NextTrack => {
                self.controller.next();
            }
            AppEvent::PreviousTrack => {
                self.controller.previous();
            }
            AppEvent::ToggleShuffle => {
                let enabled = self.controller.toggle_shuffle();
                self.message = Some(if enabled { "Shuffle on" } else { "Shuffle off" }.to_string());
            }
            AppEvent::ClearQueue => {
                self.controller.clear();
                self.queue_state.select(None);
            }
            AppEvent::RemoveSelected => {
                if let Some(index) = self.queue_state.selected() {
                    match self.controller.remove(index) {
                        Ok(track) => {
                            self.message = Some(format!("Removed {}", track.display_title()))
                        }
                        Err(e) => self.message = Some(e.to_string()),
                    }
                }
            }
            AppEvent::Up => {
                let len = self.controller.tracks().len();
                move_selection(&mut self.queue_state, len, -1);
            }
            AppEvent::Down => {
                let len = self.controller.tracks().len();
                move_selection(&mut self.queue_state, len, 1);
            }
            AppEvent::ToggleHelp => {
                self.overlay = if self.overlay == Overlay::Help {
                    Overlay::None
                } else {
                    Overlay::Help
                };
            }
            AppEvent::OpenUrlInput => self.open_overlay(Overlay::UrlInput),
            AppEvent::OpenPlaylistSave => self.open_overlay(Overlay::PlaylistSave),
            AppEvent::OpenPlaylistLoad => {
                self.refresh_playlists();
                self.open_overlay(Overlay::PlaylistLoad);
            }
            _ => {}
        }
    }

    fn open_overlay(&mut self, overlay: Overlay) {
        self.overlay = overlay;
        self.input.clear();
        self.input_error = None;
    }

    fn close_overlay(&mut self) {
        self.overlay = Overlay::None;
        self.input.clear();
        self.input_error = None;
        self.message = None;
        self.controller.clear_notice();
    }

    fn refresh_playlists(&mut self) {
        match self.controller.playlists() {
            Ok(names) => self.playlist_names = names,
            Err(e) => {
                self.playlist_names.clear();
                self.input_error = Some(e.to_string());
            }
        }
        let selected = match self.playlist_names.len() {
            0 => None,
            len => Some(self.playlist_state.selected().unwrap_or(0).min(len - 1)),
        };
        self.playlist_state.select(selected);
    }

    fn selected_playlist(&self) -> Option<String> {
        self.playlist_state
            .selected()
            .and_then(|i| self.playlist_names.get(i))
            .cloned()
    }

    fn view(&self) -> View {
        let current = self.controller.current_track();
        View {
            tracks: self.controller.tracks(),
            current: self.controller.current_index(),
            shuffled: self.controller.is_shuffled(),
            player_state: self.controller.player_state(),
            download_percent: current
                .as_ref()
                .and_then(|t| self.controller.download_percent(t.video_id())),
            playback_secs: self.controller.playback_secs(),
            status: self
                .message
                .clone()
                .or_else(|| self.controller.notice().map(str::to_string)),
            overlay: self.overlay,
            input: self.input.clone(),
            input_error: self.input_error.clone(),
            playlist_names: self.playlist_names.clone(),
        }
    }

    fn render(&mut self) -> Result<()> {
        let view = self.view();

        // keep the selection inside the list as tracks come and go
        let selected = match view.tracks.len() {
            0 => None,
            len => self.queue_state.selected().map(|i| i.min(len - 1)),
        };
        self.queue_state.select(selected);

        let mut queue_state = self.queue_state.clone();
        let mut playlist_state = self.playlist_state.clone();
        self.terminal.draw(|f| {
            Self::render_ui(f, &view, &mut queue_state, &mut playlist_state);
        })?;
        self.queue_state = queue_state;
        self.playlist_state = playlist_state;

        Ok(())
    }

    fn render_ui(
        f: &mut Frame,
        view: &View,
        queue_state: &mut ListState,
        playlist_state: &mut ListState,
    ) {
        let area = f.area();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(4), // Header
                Constraint::Length(5), // Now playing
                Constraint::Min(0),    // Queue
                Constraint::Length(3), // Status
            ])
            .split(area);

        Self::render_header(f, chunks[0], view.shuffled);
        Self::render_now_playing(f, chunks[1], view);
        Self::render_queue(f, chunks[2], view, queue_state);
        Self::render_status(f, chunks[3], view.status.as_deref());

        match view.overlay {
            Overlay::None => {}
            Overlay::Help => Self::render_help(f, area),
            Overlay::UrlInput => Self::render_text_input(
                f,
                area,
                "Add YouTube URL - Enter to add, Esc to cancel",
                &view.input,
                view.input_error.as_deref(),
            ),
            Overlay::PlaylistSave => Self::render_text_input(
                f,
                area,
                "Save playlist as - Enter to save, Esc to cancel",
                &view.input,
                view.input_error.as_deref(),
            ),
            Overlay::PlaylistLoad => Self::render_playlist_picker(
                f,
                area,
                &view.playlist_names,
                view.input_error.as_deref(),
                playlist_state,
            ),
        }
    }

    fn render_header(f: &mut Frame, area: Rect, shuffled: bool) {
        let mut title = vec![Span::styled(
            "♪ tubepipe - YouTube audio player ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )];
        if shuffled {
            title.push(Span::styled(
                "[SHUFFLE]",
                Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
            ));
        }

        let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));
        let hints = Line::from(vec![
            key("h"),
            Span::raw(" help • "),
            key("u"),
            Span::raw(" add URL • "),
            key("s"),
            Span::raw(" save • "),
            key("l"),
            Span::raw(" load • "),
            key("r"),
            Span::raw(" shuffle • "),
            key("q"),
            Span::raw(" quit"),
        ]);

        let header = Paragraph::new(vec![Line::from(title), hints])
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(header, area);
    }

    fn render_now_playing(f: &mut Frame, area: Rect, view: &View) {
        let block = Block::default().borders(Borders::ALL).title("Now Playing");
        let Some(track) = view.current.and_then(|i| view.tracks.get(i)) else {
            let empty = Paragraph::new("Nothing queued - press u to add a URL")
                .style(Style::default().fg(Color::DarkGray))
                .block(block);
            f.render_widget(empty, area);
            return;
        };

        let inner = block.inner(area);
        f.render_widget(block, area);

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(1), Constraint::Length(1), Constraint::Min(0)])
            .split(inner);

        let title = Paragraph::new(Line::from(vec![
            Span::styled(
                track.display_title(),
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("  {}", status_label(track.status(), view.player_state)),
                Style::default().fg(status_color(track.status())),
            ),
        ]));
        f.render_widget(title, rows[0]);

        let (ratio, label) = progress_for(
            track,
            view.player_state,
            view.download_percent,
            view.playback_secs,
        );
        let gauge = Gauge::default()
            .gauge_style(Style::default().fg(Color::Green).bg(Color::Black))
            .ratio(ratio)
            .label(label);
        f.render_widget(gauge, rows[1]);

        if let Some(error) = track.error() {
            let error = Paragraph::new(error.to_string())
                .style(Style::default().fg(Color::Red))
                .wrap(Wrap { trim: true });
            f.render_widget(error, rows[2]);
        }
    }

    fn render_queue(f: &mut Frame, area: Rect, view: &View, queue_state: &mut ListState) {
        let items: Vec<ListItem> = view
            .tracks
            .iter()
            .enumerate()
            .map(|(i, track)| {
                let is_current = view.current == Some(i);
                let marker = if is_current { "♪ " } else { "  " };
                let content = format!(
                    "{}{} {} ({})",
                    marker,
                    status_glyph(track.status()),
                    track.display_title(),
                    track.duration_string()
                );

                let style = if is_current {
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
                } else if track.status() == TrackStatus::Error {
                    Style::default().fg(Color::Red)
                } else {
                    Style::default()
                };
                ListItem::new(content).style(style)
            })
            .collect();

        let title = format!("Queue ({})", view.tracks.len());
        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title(title))
            .highlight_style(Style::default().bg(Color::DarkGray))
            .highlight_symbol("► ");

        f.render_stateful_widget(list, area, queue_state);
    }

    fn render_status(f: &mut Frame, area: Rect, status: Option<&str>) {
        let status = Paragraph::new(status.unwrap_or(""))
            .style(Style::default().fg(Color::Green))
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(status, area);
    }

    fn render_help(f: &mut Frame, area: Rect) {
        let popup_area = centered_rect(60, 70, area);
        f.render_widget(Clear, popup_area);

        let key = |k: &'static str, what: &'static str| {
            Line::from(vec![
                Span::styled(format!("{:>7}", k), Style::default().fg(Color::Yellow)),
                Span::raw(format!("  {}", what)),
            ])
        };
        let lines = vec![
            key("space", "play / pause"),
            key("n", "next track"),
            key("p", "previous track"),
            key("r", "toggle shuffle"),
            key("u", "add a YouTube URL"),
            key("x", "remove selected track"),
            key("↑/↓", "select in queue"),
            key("c", "clear queue"),
            key("s", "save queue as playlist"),
            key("l", "load a playlist"),
            key("h / ?", "toggle this help"),
            key("esc", "close dialogs"),
            key("q", "quit"),
        ];

        let help = Paragraph::new(lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Controls")
                    .border_style(Style::default().fg(Color::Cyan)),
            )
            .style(Style::default().bg(Color::Black).fg(Color::White))
            .wrap(Wrap { trim: false });
        f.render_widget(help, popup_area);
    }

    fn render_text_input(f: &mut Frame, area: Rect, title: &str, input: &str, error: Option<&str>) {
        let popup_area = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(area.height.saturating_sub(6)),
                Constraint::Length(4),
                Constraint::Length(2),
            ])
            .split(area)[1];

        let mut lines = vec![Line::from(format!("> {}█", input))];
        if let Some(error) = error {
            lines.push(Line::styled(error.to_string(), Style::default().fg(Color::Red)));
        }

        let widget = Paragraph::new(lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title.to_string())
                    .border_style(Style::default().fg(Color::Blue)),
            )
            .style(Style::default().fg(Color::White).bg(Color::Black));

        f.render_widget(Clear, popup_area);
        f.render_widget(widget, popup_area);
    }

    fn render_playlist_picker(
        f: &mut Frame,
        area: Rect,
        names: &[String],
        error: Option<&str>,
        playlist_state: &mut ListState,
    ) {
        let popup_area = centered_rect(50, 60, area);
        f.render_widget(Clear, popup_area);

        let title = match error {
            Some(error) => format!("Load playlist - {}", error),
            None => "Load playlist - Enter load, d delete, Esc cancel".to_string(),
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(Style::default().fg(Color::Blue));

        if names.is_empty() {
            let empty = Paragraph::new("No saved playlists yet - press s to save the queue")
                .style(Style::default().fg(Color::DarkGray).bg(Color::Black))
                .block(block);
            f.render_widget(empty, popup_area);
            return;
        }

        let items: Vec<ListItem> = names.iter().map(|n| ListItem::new(n.clone())).collect();
        let list = List::new(items)
            .block(block)
            .style(Style::default().bg(Color::Black).fg(Color::White))
            .highlight_style(Style::default().bg(Color::DarkGray))
            .highlight_symbol("► ");
        f.render_stateful_widget(list, popup_area, playlist_state);
    }
}

fn move_selection(state: &mut ListState, len: usize, delta: i32) {
    if len == 0 {
        state.select(None);
        return;
    }

    let current = state.selected().unwrap_or(0);
    let new_index = if delta < 0 {
        current.saturating_sub(delta.unsigned_abs() as usize)
    } else {
        (current + delta as usize).min(len - 1)
    };
    state.select(Some(new_index));
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

fn status_glyph(status: TrackStatus) -> &'static str {
    match status {
        TrackStatus::Pending => "○",
        TrackStatus::Downloading => "↓",
        TrackStatus::Ready => "✓",
        TrackStatus::Playing => "▶",
        TrackStatus::Error => "✗",
    }
}

fn status_color(status: TrackStatus) -> Color {
    match status {
        TrackStatus::Pending => Color::DarkGray,
        TrackStatus::Downloading => Color::Blue,
        TrackStatus::Ready => Color::Green,
        TrackStatus::Playing => Color::Yellow,
        TrackStatus::Error => Color::Red,
    }
}

fn status_label(status: TrackStatus, player: PlaybackState) -> &'static str {
    match (status, player) {
        (TrackStatus::Playing, PlaybackState::Paused) => "⏸ Paused",
        (TrackStatus::Playing, PlaybackState::Buffering) => "… Buffering",
        (TrackStatus::Playing, _) => "▶ Playing",
        (TrackStatus::Downloading, _) => "↓ Downloading",
        (TrackStatus::Pending, _) => "○ Waiting",
        (TrackStatus::Ready, _) => "✓ Ready",
        (TrackStatus::Error, _) => "✗ Error",
    }
}

/// Gauge ratio and label for the current track
fn progress_for(
    track: &Track,
    player: PlaybackState,
    download_percent: Option<f32>,
    playback_secs: u64,
) -> (f64, String) {
    match track.status() {
        TrackStatus::Downloading => {
            let percent = f64::from(download_percent.unwrap_or(0.0)).clamp(0.0, 100.0);
            (percent / 100.0, format!("Downloading {:.0}%", percent))
        }
        TrackStatus::Playing if player == PlaybackState::Paused => (0.0, "Paused".to_string()),
        TrackStatus::Playing => {
            let ratio = match track.duration_secs() {
                Some(total) if total > 0 => (playback_secs as f64 / total as f64).clamp(0.0, 1.0),
                _ => 0.0,
            };
            (
                ratio,
                format!("{} / {}", format_duration(playback_secs), track.duration_string()),
            )
        }
        _ => (0.0, String::new()),
    }
}

// crossterm's poll/read block, so they get a blocking thread of their own.
// The thread exits once the receiver is gone.
fn spawn_terminal_reader() -> mpsc::UnboundedReceiver<io::Result<Event>> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::task::spawn_blocking(move || {
        while !tx.is_closed() {
            match event::poll(Duration::from_millis(50)) {
                Ok(false) => {}
                Ok(true) => {
                    if tx.send(event::read()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
        debug!("terminal reader stopped");
    });
    rx
}
