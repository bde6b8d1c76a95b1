use crate::app::InputMode;
use crate::model::LifecycleAction;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Quit,
    Down,
    Up,
    Top,
    Bottom,
    ToggleHelp,
    ToggleMenu,
    CloseMenu,
    MenuSelect,
    Invoke(LifecycleAction),
    Refresh,
    ProbeSession,
    Logout,
    StartFilter,
    SubmitInput,
    CancelInput,
    Backspace,
    InputChar(char),
    ConfirmYes,
    ConfirmNo,
    PointerDown { column: u16, row: u16 },
}

pub fn map_key(mode: InputMode, key: KeyEvent) -> Option<Action> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(Action::Quit);
    }
    match mode {
        InputMode::Normal => map_normal_mode_key(key),
        InputMode::Menu => map_menu_mode_key(key),
        InputMode::Filter => map_input_mode_key(key),
    }
}

fn map_normal_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Char('j') | KeyCode::Down => Some(Action::Down),
        KeyCode::Char('k') | KeyCode::Up => Some(Action::Up),
        KeyCode::Char('g') | KeyCode::Home => Some(Action::Top),
        KeyCode::Char('G') | KeyCode::End => Some(Action::Bottom),
        KeyCode::Char('?') => Some(Action::ToggleHelp),
        KeyCode::Enter | KeyCode::Char('m') | KeyCode::Char(' ') => Some(Action::ToggleMenu),
        KeyCode::Char('r') | KeyCode::F(5) => Some(Action::Refresh),
        KeyCode::Char('R') => Some(Action::ProbeSession),
        KeyCode::Char('L') => Some(Action::Logout),
        KeyCode::Char('/') => Some(Action::StartFilter),
        KeyCode::Char('y') | KeyCode::Char('Y') => Some(Action::ConfirmYes),
        KeyCode::Char('n') | KeyCode::Char('N') => Some(Action::ConfirmNo),
        KeyCode::Esc => Some(Action::CancelInput),
        _ => None,
    }
}

fn map_menu_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('m') => Some(Action::CloseMenu),
        KeyCode::Char('j') | KeyCode::Down => Some(Action::Down),
        KeyCode::Char('k') | KeyCode::Up => Some(Action::Up),
        KeyCode::Enter | KeyCode::Char(' ') => Some(Action::MenuSelect),
        KeyCode::Char('y') | KeyCode::Char('Y') => Some(Action::ConfirmYes),
        KeyCode::Char('n') | KeyCode::Char('N') => Some(Action::ConfirmNo),
        KeyCode::Char('?') => Some(Action::ToggleHelp),
        KeyCode::Char(c) => LifecycleAction::from_hotkey(c).map(Action::Invoke),
        _ => None,
    }
}

fn map_input_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Esc => Some(Action::CancelInput),
        KeyCode::Enter => Some(Action::SubmitInput),
        KeyCode::Backspace => Some(Action::Backspace),
        KeyCode::Char(c) => Some(Action::InputChar(c)),
        _ => None,
    }
}

pub fn map_mouse(mouse: MouseEvent) -> Option<Action> {
    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) => Some(Action::PointerDown {
            column: mouse.column,
            row: mouse.row,
        }),
        MouseEventKind::ScrollDown => Some(Action::Down),
        MouseEventKind::ScrollUp => Some(Action::Up),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, map_key, map_mouse};
    use crate::app::InputMode;
    use crate::model::LifecycleAction;
    use crossterm::event::{
        KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
    };

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn menu_hotkeys_map_to_lifecycle_actions() {
        assert_eq!(
            map_key(InputMode::Menu, key(KeyCode::Char('x'))),
            Some(Action::Invoke(LifecycleAction::Stop))
        );
        assert_eq!(
            map_key(InputMode::Menu, key(KeyCode::Char('r'))),
            Some(Action::Invoke(LifecycleAction::Restart))
        );
        assert_eq!(
            map_key(InputMode::Normal, key(KeyCode::Char('r'))),
            Some(Action::Refresh)
        );
        assert_eq!(map_key(InputMode::Menu, key(KeyCode::Esc)), Some(Action::CloseMenu));
    }

    #[test]
    fn filter_mode_captures_text() {
        assert_eq!(
            map_key(InputMode::Filter, key(KeyCode::Char('q'))),
            Some(Action::InputChar('q'))
        );
        assert_eq!(
            map_key(
                InputMode::Filter,
                KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)
            ),
            Some(Action::Quit)
        );
    }

    #[test]
    fn only_left_press_is_a_pointer_down() {
        let mut mouse = MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column: 4,
            row: 9,
            modifiers: KeyModifiers::NONE,
        };
        assert_eq!(
            map_mouse(mouse),
            Some(Action::PointerDown { column: 4, row: 9 })
        );
        mouse.kind = MouseEventKind::Up(MouseButton::Left);
        assert_eq!(map_mouse(mouse), None);
        mouse.kind = MouseEventKind::Down(MouseButton::Right);
        assert_eq!(map_mouse(mouse), None);
    }
}
