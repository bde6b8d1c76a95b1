mod app;
mod cli;
mod config;
mod dispatch;
mod gateway;
mod input;
mod logout;
mod menu;
mod model;
mod poller;
mod session;
mod storage;
mod ui;

use anyhow::{Context, Result};
use app::{App, AppCommand};
use chrono::Utc;
use clap::Parser;
use cli::CliArgs;
use config::Settings;
use crossterm::event::{
    DisableMouseCapture, EnableMouseCapture, Event, EventStream, KeyEventKind,
    KeyboardEnhancementFlags, PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
    supports_keyboard_enhancement,
};
use dispatch::{ActionOutcome, perform_with_feedback};
use futures::StreamExt;
use gateway::HostingGateway;
use logout::LogoutCleaner;
use model::{Application, LifecycleAction};
use poller::StatusPoller;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use session::{SessionStore, probe_session};
use std::fs::OpenOptions;
use std::io::{self, Stdout};
use std::path::Path;
use std::sync::{Arc, Mutex};
use storage::{ClientStorage, FileClientStorage, LAST_INTERACTION_KEY, cache_user};
use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;
const LIST_REFRESH_TIMEOUT: Duration = Duration::from_secs(8);
const SPINNER_TICK: Duration = Duration::from_millis(120);

/// Results of spawned work, delivered back to the UI loop.
#[derive(Debug)]
enum BackgroundEvent {
    ActionSettled {
        application_id: String,
        action: LifecycleAction,
        outcome: ActionOutcome,
    },
    ApplicationsLoaded(std::result::Result<Vec<Application>, String>),
    ProbeFinished,
}

struct Services {
    gateway: HostingGateway,
    storage: Arc<dyn ClientStorage>,
    store: SessionStore,
    poller: StatusPoller<HostingGateway>,
    cleaner: LogoutCleaner<HostingGateway>,
    min_feedback: Duration,
    refresh_in_flight: bool,
    last_user: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args.log_filter, args.log_file.as_deref())?;

    let settings = Settings::load(&args)?;
    match &settings.source {
        Some(source) => info!("loaded config from {source}"),
        None => debug!("no config file found, using defaults"),
    }

    let storage: Arc<dyn ClientStorage> = Arc::new(
        FileClientStorage::open(&settings.state_file).with_context(|| {
            format!("failed to open state file {}", settings.state_file.display())
        })?,
    );
    let gateway = HostingGateway::new(&settings.api_url, storage.clone())?;
    let store = SessionStore::new();

    let mut app = App::new(
        gateway.base_url().to_string(),
        store.clone(),
        settings.menu_margin,
    );
    let mut services = Services {
        poller: StatusPoller::new(gateway.clone(), store.clone(), settings.poll_interval),
        cleaner: LogoutCleaner::new(storage.clone(), store.clone(), gateway.clone()),
        gateway,
        storage,
        store,
        min_feedback: settings.min_feedback,
        refresh_in_flight: false,
        last_user: None,
    };

    run(&mut app, &mut services, settings.refresh_interval).await
}

fn init_tracing(level_filter: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let _ = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::sink).try_init();
        }
    }

    Ok(())
}

async fn run(app: &mut App, services: &mut Services, refresh_interval: Duration) -> Result<()> {
    let (mut terminal, keyboard_enhanced) = init_terminal()?;
    let run_result = run_loop(&mut terminal, app, services, refresh_interval).await;
    services.poller.stop();
    let restore_result = restore_terminal(&mut terminal, keyboard_enhanced);

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow::anyhow!(
            "{run_error:#}\nterminal restore error: {restore_error:#}"
        )),
        (Err(error), _) => Err(error),
        (_, Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn init_terminal() -> Result<(TuiTerminal, bool)> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    let keyboard_enhanced = matches!(supports_keyboard_enhancement(), Ok(true));
    if keyboard_enhanced {
        execute!(
            stdout,
            EnterAlternateScreen,
            EnableMouseCapture,
            PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                    | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
            )
        )
        .context("failed to enter alternate screen with keyboard enhancement")?;
    } else {
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
            .context("failed to enter alternate screen")?;
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
    terminal.clear().context("failed to clear terminal")?;
    Ok((terminal, keyboard_enhanced))
}

fn restore_terminal(terminal: &mut TuiTerminal, keyboard_enhanced: bool) -> Result<()> {
    if keyboard_enhanced {
        execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags)
            .context("failed to pop keyboard enhancement flags")?;
    }
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(
        terminal.backend_mut(),
        DisableMouseCapture,
        LeaveAlternateScreen
    )
    .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

async fn run_loop(
    terminal: &mut TuiTerminal,
    app: &mut App,
    services: &mut Services,
    refresh_interval: Duration,
) -> Result<()> {
    app.set_status("Checking session…");

    let (tx, mut rx) = mpsc::unbounded_channel::<BackgroundEvent>();
    let mut session_rx = services.store.subscribe();
    spawn_probe(services, &tx);

    let mut reader = EventStream::new();
    let mut refresh_ticker = interval(refresh_interval);
    refresh_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut spinner_ticker = interval(SPINNER_TICK);
    spinner_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        terminal
            .draw(|frame| ui::render(frame, app))
            .context("failed to render terminal frame")?;

        if !app.running() {
            break;
        }

        tokio::select! {
            maybe_event = reader.next() => {
                let action = match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        app.begin_event();
                        input::map_key(app.mode(), key)
                    }
                    Some(Ok(Event::Mouse(mouse))) => {
                        app.begin_event();
                        input::map_mouse(mouse)
                    }
                    Some(Ok(_)) => None,
                    Some(Err(error)) => {
                        app.set_status(format!("terminal event error: {error}"));
                        None
                    }
                    None => {
                        app.set_status("terminal event stream closed");
                        break;
                    }
                };
                if let Some(action) = action {
                    debug!("action={action:?}");
                    let command = app.apply_action(action);
                    terminal
                        .draw(|frame| ui::render(frame, app))
                        .context("failed to render terminal frame")?;
                    execute_app_command(app, services, command, &tx);
                }
            }
            changed = session_rx.changed() => {
                if changed.is_err() {
                    warn!("session store closed");
                    break;
                }
                handle_session_change(app, services, &tx);
            }
            maybe_event = rx.recv() => {
                if let Some(event) = maybe_event {
                    handle_background_event(app, services, event, &tx);
                }
            }
            _ = refresh_ticker.tick() => {
                app.set_poller_active(services.poller.is_running());
                if services.store.is_active() {
                    spawn_refresh(services, &tx);
                }
            }
            _ = spinner_ticker.tick() => {
                app.advance_spinner();
            }
        }
    }

    Ok(())
}

/// Reacts to the session store changing: the poller follows the session and
/// a new user gets a fresh application list.
fn handle_session_change(
    app: &mut App,
    services: &mut Services,
    tx: &mpsc::UnboundedSender<BackgroundEvent>,
) {
    app.on_session_changed();
    services.poller.sync();
    app.set_poller_active(services.poller.is_running());

    let session = services.store.current();
    let user = session.as_ref().map(|session| session.username.clone());
    if user != services.last_user {
        services.last_user = user;
        if let Some(session) = &session {
            cache_user(services.storage.as_ref(), session);
            spawn_refresh(services, tx);
        }
    }
}

fn handle_background_event(
    app: &mut App,
    services: &mut Services,
    event: BackgroundEvent,
    tx: &mpsc::UnboundedSender<BackgroundEvent>,
) {
    match event {
        BackgroundEvent::ActionSettled {
            application_id,
            action,
            outcome,
        } => {
            if let ActionOutcome::Failed(error) = &outcome {
                warn!("{action} failed for {application_id}: {error}");
            }
            let command = app.settle_action(&application_id, action, outcome);
            execute_app_command(app, services, command, tx);
        }
        BackgroundEvent::ApplicationsLoaded(result) => {
            services.refresh_in_flight = false;
            if !services.store.is_active() {
                return;
            }
            match result {
                Ok(applications) => {
                    debug!("loaded {} applications", applications.len());
                    app.set_applications(applications);
                }
                Err(error) => app.set_list_error(error),
            }
        }
        // A probe that finds nothing leaves an already empty store unchanged,
        // so the session watch never fires for it.
        BackgroundEvent::ProbeFinished => {
            if !app.session_known() || !services.store.is_active() {
                handle_session_change(app, services, tx);
            } else {
                app.announce_session();
            }
        }
    }
}

fn execute_app_command(
    app: &mut App,
    services: &mut Services,
    command: AppCommand,
    tx: &mpsc::UnboundedSender<BackgroundEvent>,
) {
    match command {
        AppCommand::None => {}
        AppCommand::RefreshApplications => {
            if services.store.is_active() {
                spawn_refresh(services, tx);
            }
        }
        AppCommand::ProbeSession => {
            app.set_status("Checking session…");
            spawn_probe(services, tx);
        }
        AppCommand::Logout => {
            services.cleaner.logout();
            services.poller.sync();
            app.set_poller_active(services.poller.is_running());
            app.set_status("Logged out");
        }
        AppCommand::Perform {
            application,
            action,
        } => {
            services
                .storage
                .set_local(LAST_INTERACTION_KEY, Utc::now().to_rfc3339());
            info!("{action} requested for {}", application.id);
            let gateway = services.gateway.clone();
            let min_feedback = services.min_feedback;
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome =
                    perform_with_feedback(&gateway, action, &application, min_feedback).await;
                let _ = tx.send(BackgroundEvent::ActionSettled {
                    application_id: application.id,
                    action,
                    outcome,
                });
            });
        }
    }
}

fn spawn_probe(services: &Services, tx: &mpsc::UnboundedSender<BackgroundEvent>) {
    let gateway = services.gateway.clone();
    let store = services.store.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        probe_session(&gateway, &store).await;
        let _ = tx.send(BackgroundEvent::ProbeFinished);
    });
}

fn spawn_refresh(services: &mut Services, tx: &mpsc::UnboundedSender<BackgroundEvent>) {
    if services.refresh_in_flight {
        return;
    }
    services.refresh_in_flight = true;
    let gateway = services.gateway.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let result = match timeout(LIST_REFRESH_TIMEOUT, gateway.fetch_applications()).await {
            Ok(Ok(applications)) => Ok(applications),
            Ok(Err(error)) => Err(compact_error(&error)),
            Err(_) => Err(format!(
                "application list timed out after {}s",
                LIST_REFRESH_TIMEOUT.as_secs()
            )),
        };
        let _ = tx.send(BackgroundEvent::ApplicationsLoaded(result));
    });
}

fn compact_error(error: &anyhow::Error) -> String {
    let mut out = Vec::new();
    for (index, cause) in error.chain().enumerate() {
        if index == 0 {
            out.push(cause.to_string());
        } else if index <= 2 {
            out.push(format!("caused by: {cause}"));
        } else {
            break;
        }
    }

    out.join("\n")
}
