use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Quit,

    // Playback
    TogglePlayPause,
    NextTrack,
    PreviousTrack,
    ToggleShuffle,

    // Queue
    ClearQueue,
    RemoveSelected,
    Up,
    Down,

    // Overlays
    ToggleHelp,
    OpenUrlInput,
    OpenPlaylistSave,
    OpenPlaylistLoad,
    Cancel,

    // Text entry and pickers
    Input(char),
    Backspace,
    Submit,
    DeletePlaylist,
}

/// What the keyboard is currently talking to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    /// Typing into a text field: every printable key is text
    Text,
    PlaylistPicker,
}

pub fn key_to_app_event(mode: InputMode, key: KeyEvent) -> Option<AppEvent> {
    // Ctrl+C gets out from anywhere
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Some(AppEvent::Quit);
    }

    match mode {
        InputMode::Normal => normal_key(key),
        InputMode::Text => text_key(key),
        InputMode::PlaylistPicker => picker_key(key),
    }
}

fn normal_key(key: KeyEvent) -> Option<AppEvent> {
    match key.code {
        KeyCode::Char('q') => Some(AppEvent::Quit),

        KeyCode::Char(' ') => Some(AppEvent::TogglePlayPause),
        KeyCode::Char('n') => Some(AppEvent::NextTrack),
        KeyCode::Char('p') => Some(AppEvent::PreviousTrack),
        KeyCode::Char('r') => Some(AppEvent::ToggleShuffle),

        KeyCode::Char('c') => Some(AppEvent::ClearQueue),
        KeyCode::Char('x') | KeyCode::Delete => Some(AppEvent::RemoveSelected),
        KeyCode::Up | KeyCode::Char('k') => Some(AppEvent::Up),
        KeyCode::Down | KeyCode::Char('j') => Some(AppEvent::Down),

        KeyCode::Char('h') | KeyCode::Char('?') => Some(AppEvent::ToggleHelp),
        KeyCode::Char('u') => Some(AppEvent::OpenUrlInput),
        KeyCode::Char('s') => Some(AppEvent::OpenPlaylistSave),
        KeyCode::Char('l') => Some(AppEvent::OpenPlaylistLoad),
        KeyCode::Esc => Some(AppEvent::Cancel),

        _ => None,
    }
}

fn text_key(key: KeyEvent) -> Option<AppEvent> {
    match key.code {
        KeyCode::Enter => Some(AppEvent::Submit),
        KeyCode::Esc => Some(AppEvent::Cancel),
        KeyCode::Backspace => Some(AppEvent::Backspace),
        KeyCode::Char(c) if !c.is_control() => Some(AppEvent::Input(c)),
        _ => None,
    }
}

fn picker_key(key: KeyEvent) -> Option<AppEvent> {
    match key.code {
        KeyCode::Up | KeyCode::Char('k') => Some(AppEvent::Up),
        KeyCode::Down | KeyCode::Char('j') => Some(AppEvent::Down),
        KeyCode::Enter => Some(AppEvent::Submit),
        KeyCode::Char('d') | KeyCode::Delete => Some(AppEvent::DeletePlaylist),
        KeyCode::Esc => Some(AppEvent::Cancel),
        KeyCode::Char('q') => Some(AppEvent::Quit),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_normal_bindings() {
        let cases = [
            ('q', AppEvent::Quit),
            (' ', AppEvent::TogglePlayPause),
            ('n', AppEvent::NextTrack),
            ('p', AppEvent::PreviousTrack),
            ('c', AppEvent::ClearQueue),
            ('h', AppEvent::ToggleHelp),
            ('?', AppEvent::ToggleHelp),
            ('u', AppEvent::OpenUrlInput),
            ('s', AppEvent::OpenPlaylistSave),
            ('l', AppEvent::OpenPlaylistLoad),
            ('r', AppEvent::ToggleShuffle),
            ('x', AppEvent::RemoveSelected),
        ];
        for (c, expected) in cases {
            assert_eq!(
                key_to_app_event(InputMode::Normal, key(KeyCode::Char(c))),
                Some(expected),
                "key {:?}",
                c
            );
        }
        assert_eq!(
            key_to_app_event(InputMode::Normal, key(KeyCode::Esc)),
            Some(AppEvent::Cancel)
        );
        assert_eq!(key_to_app_event(InputMode::Normal, key(KeyCode::Char('z'))), None);
    }

    #[test]
    fn test_text_mode_swallows_shortcuts() {
        // a URL can contain q, n, p...
        assert_eq!(
            key_to_app_event(InputMode::Text, key(KeyCode::Char('q'))),
            Some(AppEvent::Input('q'))
        );
        assert_eq!(
            key_to_app_event(InputMode::Text, key(KeyCode::Enter)),
            Some(AppEvent::Submit)
        );
        assert_eq!(
            key_to_app_event(InputMode::Text, key(KeyCode::Esc)),
            Some(AppEvent::Cancel)
        );
        assert_eq!(
            key_to_app_event(InputMode::Text, key(KeyCode::Backspace)),
            Some(AppEvent::Backspace)
        );
    }

    #[test]
    fn test_ctrl_c_quits_everywhere() {
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        for mode in [InputMode::Normal, InputMode::Text, InputMode::PlaylistPicker] {
            assert_eq!(key_to_app_event(mode, ctrl_c), Some(AppEvent::Quit));
        }
    }

    #[test]
    fn test_picker_bindings() {
        assert_eq!(
            key_to_app_event(InputMode::PlaylistPicker, key(KeyCode::Char('d'))),
            Some(AppEvent::DeletePlaylist)
        );
        assert_eq!(
            key_to_app_event(InputMode::PlaylistPicker, key(KeyCode::Enter)),
            Some(AppEvent::Submit)
        );
        assert_eq!(
            key_to_app_event(InputMode::PlaylistPicker, key(KeyCode::Down)),
            Some(AppEvent::Down)
        );
    }
}
