use crate::dispatch::{ActionDispatcher, ActionOutcome, ActionState};
use crate::input::Action;
use crate::menu::MenuState;
use crate::model::{Application, LifecycleAction, Session};
use crate::session::SessionStore;
use chrono::{DateTime, Local};
use ratatui::layout::{Position, Rect};

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InputMode {
    Normal,
    Menu,
    Filter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    None,
    RefreshApplications,
    ProbeSession,
    Logout,
    Perform {
        application: Application,
        action: LifecycleAction,
    },
}

#[derive(Debug, Clone)]
struct PendingConfirmation {
    prompt: String,
    application_id: String,
    action: LifecycleAction,
}

/// One rendered application: its data plus the action lock and menu it
/// owns. Dropping the card drops its outside-click listener.
#[derive(Debug)]
pub struct ApplicationCard {
    application: Application,
    dispatcher: ActionDispatcher,
    menu: MenuState,
    row: Option<Rect>,
    trigger: Option<Rect>,
}

impl ApplicationCard {
    fn new(application: Application) -> Self {
        Self {
            application,
            dispatcher: ActionDispatcher::default(),
            menu: MenuState::default(),
            row: None,
            trigger: None,
        }
    }

    pub fn application(&self) -> &Application {
        &self.application
    }

    pub fn action_state(&self) -> ActionState {
        self.dispatcher.state()
    }

    pub fn menu(&self) -> &MenuState {
        &self.menu
    }

    /// Status as displayed: pending actions overlay the remote status.
    pub fn display_status(&self) -> &'static str {
        if self.dispatcher.is_busy() {
            "processing"
        } else {
            self.application.status.label()
        }
    }

    /// Menu entries with whether each one can be invoked right now.
    pub fn menu_items(&self) -> Vec<(LifecycleAction, bool)> {
        LifecycleAction::ALL
            .into_iter()
            .map(|action| {
                (
                    action,
                    self.dispatcher.can_invoke(action, self.application.status),
                )
            })
            .collect()
    }
}

pub struct App {
    running: bool,
    status: String,
    show_help: bool,
    filtering: bool,
    filter: String,
    input: String,
    api_url: String,
    session: SessionStore,
    session_known: bool,
    signed_in_as: Option<String>,
    poller_active: bool,
    cards: Vec<ApplicationCard>,
    selected: usize,
    menu_margin: u16,
    event_seq: u64,
    spinner_frame: usize,
    pending_confirmation: Option<PendingConfirmation>,
    last_refreshed: Option<DateTime<Local>>,
    list_error: Option<String>,
}

impl App {
    pub fn new(api_url: String, session: SessionStore, menu_margin: u16) -> Self {
        Self {
            running: true,
            status: "Ready".to_string(),
            show_help: false,
            filtering: false,
            filter: String::new(),
            input: String::new(),
            api_url,
            session,
            session_known: false,
            signed_in_as: None,
            poller_active: false,
            cards: Vec::new(),
            selected: 0,
            menu_margin,
            event_seq: 0,
            spinner_frame: 0,
            pending_confirmation: None,
            last_refreshed: None,
            list_error: None,
        }
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn mode(&self) -> InputMode {
        if self.filtering {
            InputMode::Filter
        } else if self.open_menu_index().is_some() {
            InputMode::Menu
        } else {
            InputMode::Normal
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn session(&self) -> Option<Session> {
        self.session.current()
    }

    pub fn session_known(&self) -> bool {
        self.session_known
    }

    pub fn poller_active(&self) -> bool {
        self.poller_active
    }

    pub fn set_poller_active(&mut self, active: bool) {
        self.poller_active = active;
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn show_help(&self) -> bool {
        self.show_help
    }

    pub fn pending_confirmation_prompt(&self) -> Option<&str> {
        self.pending_confirmation
            .as_ref()
            .map(|pending| pending.prompt.as_str())
    }

    pub fn list_error(&self) -> Option<&str> {
        self.list_error.as_deref()
    }

    pub fn last_refreshed(&self) -> Option<String> {
        self.last_refreshed
            .map(|time| time.format("%H:%M:%S").to_string())
    }

    pub fn spinner(&self) -> &'static str {
        SPINNER_FRAMES[self.spinner_frame % SPINNER_FRAMES.len()]
    }

    pub fn advance_spinner(&mut self) -> bool {
        let busy = self.cards.iter().any(|card| card.dispatcher.is_busy());
        if busy {
            self.spinner_frame = self.spinner_frame.wrapping_add(1);
        }
        busy
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = normalize_status_text(status.into());
    }

    /// Starts handling one terminal event and returns its sequence number.
    pub fn begin_event(&mut self) -> u64 {
        self.event_seq += 1;
        self.event_seq
    }

    pub fn cards(&self) -> &[ApplicationCard] {
        &self.cards
    }

    pub fn card(&self, id: &str) -> Option<&ApplicationCard> {
        self.cards.iter().find(|card| card.application.id == id)
    }

    fn card_index(&self, id: &str) -> Option<usize> {
        self.cards.iter().position(|card| card.application.id == id)
    }

    pub fn visible_indices(&self) -> Vec<usize> {
        self.cards
            .iter()
            .enumerate()
            .filter(|(_, card)| card.application.matches_filter(&self.filter))
            .map(|(index, _)| index)
            .collect()
    }

    pub fn visible_cards(&self) -> Vec<&ApplicationCard> {
        self.visible_indices()
            .into_iter()
            .map(|index| &self.cards[index])
            .collect()
    }

    pub fn selected_visible_index(&self) -> Option<usize> {
        let visible = self.visible_indices().len();
        (visible > 0).then(|| self.selected.min(visible - 1))
    }

    fn selected_card_index(&self) -> Option<usize> {
        let visible = self.visible_indices();
        let position = self.selected_visible_index()?;
        visible.get(position).copied()
    }

    pub fn open_menu_index(&self) -> Option<usize> {
        self.cards.iter().position(|card| card.menu.is_open())
    }

    pub fn open_menu_card(&self) -> Option<&ApplicationCard> {
        self.open_menu_index().map(|index| &self.cards[index])
    }

    /// Records where each visible row and its trigger cell were drawn.
    /// Rows not in `layout` lose their trigger; an open menu keeps its
    /// anchor but can no longer be hit through the trigger.
    pub fn set_row_layout(&mut self, layout: &[(String, Rect, Rect)]) {
        for card in &mut self.cards {
            match layout.iter().find(|(id, _, _)| *id == card.application.id) {
                Some((_, row, trigger)) => {
                    card.row = Some(*row);
                    card.trigger = Some(*trigger);
                }
                None => {
                    card.row = None;
                    card.trigger = None;
                    card.menu.forget_trigger();
                }
            }
        }
    }

    pub fn set_menu_panel(&mut self, id: &str, panel: Rect) {
        if let Some(index) = self.card_index(id) {
            self.cards[index].menu.set_panel(panel);
        }
    }

    /// Replaces the application list. Cards are matched by id so in-flight
    /// actions and open menus survive a refresh; cards whose application is
    /// gone are dropped.
    pub fn set_applications(&mut self, applications: Vec<Application>) {
        let mut previous = std::mem::take(&mut self.cards);
        self.cards = applications
            .into_iter()
            .map(|application| {
                match previous
                    .iter()
                    .position(|card| card.application.id == application.id)
                {
                    Some(position) => {
                        let mut card = previous.swap_remove(position);
                        card.application = application;
                        card
                    }
                    None => ApplicationCard::new(application),
                }
            })
            .collect();
        if let Some(pending) = &self.pending_confirmation
            && self.card_index(&pending.application_id).is_none()
        {
            self.pending_confirmation = None;
        }
        self.last_refreshed = Some(Local::now());
        self.list_error = None;
        self.clamp_selection();
    }

    pub fn set_list_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.set_status(format!("Application refresh failed: {}", summarize_error_line(&error)));
        self.list_error = Some(error);
    }

    /// Called whenever the session store changed. Losing the session drops
    /// every card. Plan refreshes for the same user leave the status line
    /// alone.
    pub fn on_session_changed(&mut self) {
        self.session_known = true;
        match self.session.current() {
            Some(session) => {
                if self.signed_in_as.as_deref() != Some(session.username.as_str()) {
                    self.signed_in_as = Some(session.username);
                    self.announce_session();
                }
            }
            None => {
                self.signed_in_as = None;
                self.cards.clear();
                self.pending_confirmation = None;
                self.selected = 0;
                self.list_error = None;
                self.last_refreshed = None;
                self.set_status("Not signed in");
            }
        }
    }

    /// Reports the current user in the status line.
    pub fn announce_session(&mut self) {
        if let Some(session) = self.session.current() {
            self.set_status(format!(
                "Signed in as {} ({})",
                session.username,
                session.plan_label()
            ));
        }
    }

    /// Applies the result of a finished action. Returns a refresh request
    /// when the remote state likely changed.
    pub fn settle_action(
        &mut self,
        id: &str,
        action: LifecycleAction,
        outcome: ActionOutcome,
    ) -> AppCommand {
        let Some(index) = self.card_index(id) else {
            return AppCommand::None;
        };
        let card = &mut self.cards[index];
        let Some(effect) = card.dispatcher.settle(action, &outcome) else {
            return AppCommand::None;
        };
        if effect.close_menu {
            card.menu.close();
        }
        let name = card.application.name.clone();
        match outcome {
            ActionOutcome::Succeeded(receipt) => {
                let message = receipt
                    .message
                    .filter(|message| !message.trim().is_empty())
                    .unwrap_or_else(|| format!("{} requested", action.title()));
                self.set_status(format!("{name}: {message}"));
                AppCommand::RefreshApplications
            }
            ActionOutcome::Failed(error) => {
                self.set_status(format!(
                    "{} failed for {name}: {}",
                    action.title(),
                    summarize_error_line(&error)
                ));
                AppCommand::None
            }
        }
    }

    pub fn apply_action(&mut self, action: Action) -> AppCommand {
        if let Some(pending) = self.pending_confirmation.take() {
            match action {
                Action::ConfirmYes | Action::MenuSelect => {
                    return match self.card_index(&pending.application_id) {
                        Some(index) => self.begin_action(index, pending.action),
                        None => AppCommand::None,
                    };
                }
                Action::ConfirmNo | Action::CancelInput | Action::CloseMenu => {
                    self.status = "Action cancelled".to_string();
                    return AppCommand::None;
                }
                _ => {
                    self.pending_confirmation = Some(pending);
                    self.status =
                        "Pending confirmation: press y to confirm or n to cancel".to_string();
                    return AppCommand::None;
                }
            }
        }

        if self.show_help && !matches!(action, Action::ToggleHelp) {
            self.show_help = false;
        }

        if self.filtering {
            return self.apply_filter_input(action);
        }

        match action {
            Action::Quit => {
                self.running = false;
                self.status = "Exit requested".to_string();
                AppCommand::None
            }
            Action::Down => {
                self.move_cursor(1);
                AppCommand::None
            }
            Action::Up => {
                self.move_cursor(-1);
                AppCommand::None
            }
            Action::Top => {
                self.selected = 0;
                AppCommand::None
            }
            Action::Bottom => {
                self.selected = self.visible_indices().len().saturating_sub(1);
                AppCommand::None
            }
            Action::ToggleHelp => {
                self.show_help = !self.show_help;
                AppCommand::None
            }
            Action::ToggleMenu => match self.open_menu_index() {
                Some(index) => {
                    self.cards[index].menu.close();
                    AppCommand::None
                }
                None => match self.selected_card_index() {
                    Some(index) => self.toggle_menu(index),
                    None => AppCommand::None,
                },
            },
            Action::CloseMenu => {
                self.close_menus();
                AppCommand::None
            }
            Action::MenuSelect => {
                let Some(index) = self.open_menu_index() else {
                    return AppCommand::None;
                };
                let item = self.cards[index].menu.highlighted();
                match LifecycleAction::ALL.get(item) {
                    Some(action) => self.request_action(index, *action),
                    None => AppCommand::None,
                }
            }
            Action::Invoke(action) => {
                match self.open_menu_index().or_else(|| self.selected_card_index()) {
                    Some(index) => self.request_action(index, action),
                    None => AppCommand::None,
                }
            }
            Action::Refresh => {
                if self.session.is_active() {
                    self.status = "Refreshing applications…".to_string();
                    AppCommand::RefreshApplications
                } else {
                    self.status = "Not signed in, checking session…".to_string();
                    AppCommand::ProbeSession
                }
            }
            Action::ProbeSession => {
                self.status = "Checking session…".to_string();
                AppCommand::ProbeSession
            }
            Action::Logout => {
                self.close_menus();
                AppCommand::Logout
            }
            Action::StartFilter => {
                self.filtering = true;
                self.input = self.filter.clone();
                AppCommand::None
            }
            Action::CancelInput => {
                if !self.filter.is_empty() {
                    self.filter.clear();
                    self.clamp_selection();
                    self.status = "Filter cleared".to_string();
                }
                AppCommand::None
            }
            Action::ConfirmYes | Action::ConfirmNo => AppCommand::None,
            Action::SubmitInput | Action::Backspace | Action::InputChar(_) => AppCommand::None,
            Action::PointerDown { column, row } => self.pointer_down(Position::new(column, row)),
        }
    }

    fn apply_filter_input(&mut self, action: Action) -> AppCommand {
        match action {
            Action::Quit => {
                self.running = false;
                self.status = "Exit requested".to_string();
            }
            Action::CancelInput => {
                self.filtering = false;
                self.input.clear();
            }
            Action::SubmitInput => {
                self.filtering = false;
                self.filter = self.input.trim().to_string();
                self.input.clear();
                self.selected = 0;
                self.status = if self.filter.is_empty() {
                    "Filter cleared".to_string()
                } else {
                    format!("Filter: {}", self.filter)
                };
            }
            Action::Backspace => {
                self.input.pop();
            }
            Action::InputChar(c) => self.input.push(c),
            _ => {}
        }
        AppCommand::None
    }

    fn move_cursor(&mut self, delta: isize) {
        if let Some(index) = self.open_menu_index() {
            self.cards[index]
                .menu
                .move_highlight(delta, LifecycleAction::ALL.len());
            return;
        }
        let visible = self.visible_indices().len();
        if visible == 0 {
            self.selected = 0;
            return;
        }
        let current = self.selected.min(visible - 1) as isize;
        self.selected = (current + delta).clamp(0, visible as isize - 1) as usize;
    }

    fn clamp_selection(&mut self) {
        let visible = self.visible_indices().len();
        self.selected = self.selected.min(visible.saturating_sub(1));
    }

    fn close_menus(&mut self) {
        for card in &mut self.cards {
            card.menu.close();
        }
    }

    fn toggle_menu(&mut self, index: usize) -> AppCommand {
        if self.cards[index].menu.is_open() {
            self.cards[index].menu.close();
            return AppCommand::None;
        }
        self.close_menus();
        let seq = self.event_seq;
        let margin = self.menu_margin;
        let card = &mut self.cards[index];
        match card.trigger {
            Some(trigger) => {
                card.menu.open(trigger, margin, seq);
            }
            None => {
                let name = card.application.name.clone();
                self.set_status(format!("Actions for {name} are not on screen"));
            }
        }
        AppCommand::None
    }

    fn pointer_down(&mut self, pointer: Position) -> AppCommand {
        let seq = self.event_seq;
        for card in &mut self.cards {
            if card.menu.should_close(pointer, seq) {
                card.menu.close();
            }
        }

        if let Some(index) = self.open_menu_index() {
            let menu = &self.cards[index].menu;
            if let Some(item) = menu.item_at(pointer, LifecycleAction::ALL.len()) {
                return self.request_action(index, LifecycleAction::ALL[item]);
            }
            if menu.hits_panel(pointer) {
                return AppCommand::None;
            }
        }

        let hit_trigger = self
            .cards
            .iter()
            .position(|card| card.trigger.is_some_and(|trigger| trigger.contains(pointer)));
        if let Some(index) = hit_trigger {
            self.select_card(index);
            return self.toggle_menu(index);
        }

        let hit_row = self
            .cards
            .iter()
            .position(|card| card.row.is_some_and(|row| row.contains(pointer)));
        if let Some(index) = hit_row {
            self.select_card(index);
        }
        AppCommand::None
    }

    fn select_card(&mut self, index: usize) {
        if let Some(position) = self.visible_indices().iter().position(|i| *i == index) {
            self.selected = position;
        }
    }

    /// Eligibility is checked before confirmation so the prompt never shows
    /// for an action that would be rejected anyway.
    fn request_action(&mut self, index: usize, action: LifecycleAction) -> AppCommand {
        let card = &self.cards[index];
        if let Err(rejection) = card.dispatcher.check(action, card.application.status) {
            let name = card.application.name.clone();
            self.set_status(format!("{name}: {}", rejection.describe()));
            return AppCommand::None;
        }
        if action == LifecycleAction::Delete {
            let prompt = format!("Delete {}? This cannot be undone.", card.application.name);
            self.pending_confirmation = Some(PendingConfirmation {
                prompt: prompt.clone(),
                application_id: card.application.id.clone(),
                action,
            });
            self.set_status(format!("{prompt} (y/n)"));
            return AppCommand::None;
        }
        self.begin_action(index, action)
    }

    fn begin_action(&mut self, index: usize, action: LifecycleAction) -> AppCommand {
        let card = &mut self.cards[index];
        match card.dispatcher.invoke(action, card.application.status) {
            Ok(()) => {
                let application = card.application.clone();
                self.set_status(format!("{} {}…", progress_verb(action), application.name));
                AppCommand::Perform {
                    application,
                    action,
                }
            }
            Err(rejection) => {
                let name = card.application.name.clone();
                self.set_status(format!("{name}: {}", rejection.describe()));
                AppCommand::None
            }
        }
    }
}

fn progress_verb(action: LifecycleAction) -> &'static str {
    match action {
        LifecycleAction::Start => "Starting",
        LifecycleAction::Restart => "Restarting",
        LifecycleAction::Stop => "Stopping",
        LifecycleAction::Delete => "Deleting",
    }
}

fn summarize_error_line(error: &str) -> String {
    error
        .lines()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| "unknown error".to_string())
}

fn normalize_status_text(status: String) -> String {
    const MAX_STATUS_LEN: usize = 180;
    if status.chars().count() <= MAX_STATUS_LEN {
        return status;
    }

    let mut shortened = status
        .chars()
        .take(MAX_STATUS_LEN.saturating_sub(1))
        .collect::<String>();
    shortened.push('…');
    shortened
}

#[cfg(test)]
mod tests {
    use super::{App, AppCommand, InputMode, normalize_status_text};
    use crate::dispatch::{ActionOutcome, ActionState};
    use crate::input::Action;
    use crate::model::{ActionReceipt, AppStatus, Application, LifecycleAction, Session};
    use crate::session::SessionStore;
    use ratatui::layout::Rect;

    fn signed_in_app() -> App {
        let store = SessionStore::new();
        store.set(Session {
            username: "alice".to_string(),
            email: None,
            role: None,
            plan: Some("pro".to_string()),
        });
        let mut app = App::new("http://api.test".to_string(), store, 1);
        app.on_session_changed();
        app.set_applications(vec![
            Application::new("web", AppStatus::Running),
            Application::new("worker", AppStatus::Stopped),
        ]);
        app.set_row_layout(&[
            ("web".to_string(), Rect::new(1, 3, 60, 1), Rect::new(55, 3, 3, 1)),
            ("worker".to_string(), Rect::new(1, 4, 60, 1), Rect::new(55, 4, 3, 1)),
        ]);
        app
    }

    fn click(app: &mut App, column: u16, row: u16) -> AppCommand {
        app.begin_event();
        app.apply_action(Action::PointerDown { column, row })
    }

    fn ok() -> ActionOutcome {
        ActionOutcome::Succeeded(ActionReceipt::default())
    }

    #[test]
    fn stop_locks_the_card_until_settled() {
        let mut app = signed_in_app();
        app.begin_event();
        app.apply_action(Action::ToggleMenu);
        assert_eq!(app.mode(), InputMode::Menu);

        let cmd = app.apply_action(Action::Invoke(LifecycleAction::Stop));
        assert!(matches!(
            cmd,
            AppCommand::Perform { ref application, action: LifecycleAction::Stop } if application.id == "web"
        ));
        let card = app.card("web").unwrap();
        assert_eq!(card.action_state(), ActionState::Pending(LifecycleAction::Stop));
        assert_eq!(card.display_status(), "processing");
        assert!(card.menu_items().iter().all(|(_, enabled)| !enabled));

        assert_eq!(app.apply_action(Action::Invoke(LifecycleAction::Start)), AppCommand::None);
        assert_eq!(app.apply_action(Action::Invoke(LifecycleAction::Restart)), AppCommand::None);

        let cmd = app.settle_action("web", LifecycleAction::Stop, ok());
        assert_eq!(cmd, AppCommand::RefreshApplications);
        let card = app.card("web").unwrap();
        assert_eq!(card.action_state(), ActionState::Idle);
        assert!(!card.menu().is_open());
    }

    #[test]
    fn failed_action_unlocks_and_keeps_menu_open() {
        let mut app = signed_in_app();
        app.begin_event();
        app.apply_action(Action::ToggleMenu);
        app.apply_action(Action::Invoke(LifecycleAction::Restart));

        let cmd = app.settle_action(
            "web",
            LifecycleAction::Restart,
            ActionOutcome::Failed("502 Bad Gateway\nmore".to_string()),
        );
        assert_eq!(cmd, AppCommand::None);
        let card = app.card("web").unwrap();
        assert_eq!(card.action_state(), ActionState::Idle);
        assert!(card.menu().is_open());
        assert!(app.status().contains("502 Bad Gateway"));
        assert!(!app.status().contains("more"));
    }

    #[test]
    fn cards_are_independent() {
        let mut app = signed_in_app();
        app.begin_event();
        app.apply_action(Action::ToggleMenu);
        app.apply_action(Action::Invoke(LifecycleAction::Stop));
        app.apply_action(Action::CloseMenu);

        app.apply_action(Action::Down);
        let cmd = app.apply_action(Action::Invoke(LifecycleAction::Start));
        assert!(matches!(cmd, AppCommand::Perform { ref application, .. } if application.id == "worker"));
    }

    #[test]
    fn opening_click_does_not_close_and_outside_click_does() {
        let mut app = signed_in_app();
        click(&mut app, 56, 3);
        assert!(app.card("web").unwrap().menu().is_open());
        let anchor = app.card("web").unwrap().menu().anchor();
        assert_eq!((anchor.top, anchor.left), (5, 55));
        app.set_menu_panel("web", Rect::new(55, 5, 16, 6));

        assert_eq!(click(&mut app, 60, 5), AppCommand::None);
        assert!(app.card("web").unwrap().menu().is_open());

        click(&mut app, 5, 20);
        assert!(!app.card("web").unwrap().menu().is_open());
    }

    #[test]
    fn trigger_click_toggles_and_other_trigger_switches_menu() {
        let mut app = signed_in_app();
        click(&mut app, 56, 3);
        click(&mut app, 56, 3);
        assert!(app.open_menu_card().is_none());

        click(&mut app, 56, 3);
        click(&mut app, 56, 4);
        assert_eq!(app.open_menu_card().unwrap().application().id, "worker");
        assert_eq!(app.selected_visible_index(), Some(1));
    }

    #[test]
    fn clicking_menu_item_invokes_it() {
        let mut app = signed_in_app();
        click(&mut app, 56, 4);
        app.set_menu_panel("worker", Rect::new(55, 6, 16, 6));
        let cmd = click(&mut app, 58, 7);
        assert!(matches!(
            cmd,
            AppCommand::Perform { action: LifecycleAction::Start, ref application } if application.id == "worker"
        ));

        let cmd = click(&mut app, 58, 9);
        assert_eq!(cmd, AppCommand::None);
        assert!(app.status().contains("already in progress"));
    }

    #[test]
    fn delete_requires_confirmation() {
        let mut app = signed_in_app();
        app.begin_event();
        app.apply_action(Action::ToggleMenu);
        assert_eq!(app.apply_action(Action::Invoke(LifecycleAction::Delete)), AppCommand::None);
        assert!(app.pending_confirmation_prompt().is_some());
        assert_eq!(app.card("web").unwrap().action_state(), ActionState::Idle);

        assert_eq!(app.apply_action(Action::ConfirmNo), AppCommand::None);
        assert!(app.pending_confirmation_prompt().is_none());

        app.apply_action(Action::Invoke(LifecycleAction::Delete));
        let cmd = app.apply_action(Action::ConfirmYes);
        assert!(matches!(cmd, AppCommand::Perform { action: LifecycleAction::Delete, .. }));
        assert_eq!(
            app.card("web").unwrap().action_state(),
            ActionState::Pending(LifecycleAction::Delete)
        );
    }

    #[test]
    fn refresh_keeps_pending_state_and_drops_vanished_cards() {
        let mut app = signed_in_app();
        app.begin_event();
        app.apply_action(Action::ToggleMenu);
        app.apply_action(Action::Invoke(LifecycleAction::Stop));

        app.set_applications(vec![Application::new("web", AppStatus::Stopped)]);
        assert_eq!(app.cards().len(), 1);
        let card = app.card("web").unwrap();
        assert_eq!(card.action_state(), ActionState::Pending(LifecycleAction::Stop));
        assert!(card.menu().is_open());

        assert_eq!(
            app.settle_action("worker", LifecycleAction::Start, ActionOutcome::Failed(String::new())),
            AppCommand::None
        );
    }

    #[test]
    fn losing_the_session_clears_cards() {
        let store = SessionStore::new();
        let mut app = App::new("http://api.test".to_string(), store.clone(), 1);
        store.set(Session {
            username: "alice".to_string(),
            ..Session::default()
        });
        app.on_session_changed();
        app.set_applications(vec![Application::new("web", AppStatus::Running)]);

        store.clear();
        app.on_session_changed();
        assert!(app.cards().is_empty());
        assert_eq!(app.status(), "Not signed in");
        assert_eq!(app.apply_action(Action::Refresh), AppCommand::ProbeSession);
    }

    #[test]
    fn menu_without_visible_trigger_does_not_open() {
        let mut app = signed_in_app();
        app.set_row_layout(&[]);
        app.begin_event();
        app.apply_action(Action::ToggleMenu);
        assert!(app.open_menu_card().is_none());
        assert!(app.status().contains("not on screen"));
    }

    #[test]
    fn filter_narrows_visible_cards() {
        let mut app = signed_in_app();
        app.apply_action(Action::StartFilter);
        for c in "work".chars() {
            app.apply_action(Action::InputChar(c));
        }
        app.apply_action(Action::SubmitInput);
        assert_eq!(app.filter(), "work");
        assert_eq!(app.visible_cards().len(), 1);
        assert_eq!(app.visible_cards()[0].application().id, "worker");
    }

    #[test]
    fn long_status_is_truncated() {
        let text = normalize_status_text("x".repeat(400));
        assert_eq!(text.chars().count(), 180);
        assert!(text.ends_with('…'));
    }

    #[test]
    fn plan_refresh_keeps_the_last_action_message() {
        let mut app = signed_in_app();
        assert!(app.status().starts_with("Signed in as alice"));
        app.set_status("Stop failed for web: 500");

        app.session.update_plan("team".to_string());
        app.on_session_changed();
        assert_eq!(app.status(), "Stop failed for web: 500");

        app.session.set(Session {
            username: "bob".to_string(),
            ..Session::default()
        });
        app.on_session_changed();
        assert!(app.status().starts_with("Signed in as bob"));
    }
}
