use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};

use crate::app::{App, ApplicationCard, InputMode};
use crate::dispatch::ActionState;
use crate::model::AppStatus;

const BG: Color = Color::Rgb(9, 15, 25);
const PANEL: Color = Color::Rgb(16, 27, 44);
const ACCENT: Color = Color::Rgb(52, 211, 153);
const MUTED: Color = Color::Rgb(140, 156, 178);
const WARN: Color = Color::Rgb(251, 191, 36);
const ERROR: Color = Color::Rgb(248, 113, 113);
const SELECTED: Color = Color::Rgb(24, 36, 58);
const PL_A: Color = Color::Rgb(17, 94, 89);
const PL_B: Color = Color::Rgb(30, 64, 175);
const PL_C: Color = Color::Rgb(55, 48, 163);

const TRIGGER_WIDTH: u16 = 3;
const MENU_WIDTH: u16 = 20;

pub fn render(frame: &mut Frame, app: &mut App) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(4),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, root[0], app);
    render_body(frame, root[1], app);
    render_footer(frame, root[2], app);
    render_action_menu(frame, app);

    if app.show_help() {
        render_help_modal(frame, app);
    }
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let mut spans = Vec::new();
    push_powerline_segment(&mut spans, " hostdeck ", Color::White, PL_A, PL_B);
    push_powerline_segment(
        &mut spans,
        format!(" {} ", compact_text(&display_endpoint(app.api_url()), 28)),
        Color::White,
        PL_B,
        PL_C,
    );
    let identity = match app.session() {
        Some(session) => {
            let role = session
                .role
                .as_deref()
                .map(|role| format!(" [{role}]"))
                .unwrap_or_default();
            format!(
                " {}{}  plan:{} ",
                compact_text(&session.username, 20),
                role,
                session.plan_label()
            )
        }
        None if app.session_known() => " signed out ".to_string(),
        None => " checking… ".to_string(),
    };
    push_powerline_segment(&mut spans, identity, Color::White, PL_C, BG);
    spans.push(Span::styled(
        if app.poller_active() {
            "  ● live"
        } else {
            "  ○ idle"
        },
        Style::default().fg(if app.poller_active() { ACCENT } else { MUTED }),
    ));

    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG).fg(Color::White)),
        area,
    );
}

fn render_body(frame: &mut Frame, area: Rect, app: &mut App) {
    if !app.session_known() {
        app.set_row_layout(&[]);
        render_notice(frame, area, "Session", "Checking session…", MUTED);
        return;
    }
    if app.session().is_none() {
        app.set_row_layout(&[]);
        render_notice(
            frame,
            area,
            "Not signed in",
            "Sign in through the web panel, then press R to check again.",
            WARN,
        );
        return;
    }
    if let Some(error) = app.list_error()
        && app.cards().is_empty()
    {
        let error = error.to_string();
        app.set_row_layout(&[]);
        render_notice(frame, area, "Applications Error", &error, ERROR);
        return;
    }
    render_applications(frame, area, app);
}

fn render_notice(frame: &mut Frame, area: Rect, title: &str, text: &str, color: Color) {
    let panel = Paragraph::new(Text::from(text.to_string()))
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .title(title.to_string())
                .borders(Borders::ALL)
                .border_style(Style::default().fg(color))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(color));
    frame.render_widget(panel, area);
}

fn render_applications(frame: &mut Frame, area: Rect, app: &mut App) {
    let visible = app.visible_cards();
    let title = match app.last_refreshed() {
        Some(at) => format!("Applications ({})  {at}", visible.len()),
        None => format!("Applications ({})", visible.len()),
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT))
        .style(Style::default().bg(PANEL));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if inner.height < 2 || inner.width < 12 {
        app.set_row_layout(&[]);
        return;
    }

    let header_area = Rect::new(inner.x, inner.y, inner.width, 1);
    let header_style = Style::default().fg(ACCENT).add_modifier(Modifier::BOLD);
    render_row_cells(
        frame,
        header_area,
        ["NAME", "ID", "STATUS", ""].map(str::to_string),
        header_style,
        [header_style; 4],
    );

    if visible.is_empty() {
        let empty = Paragraph::new("No applications yet.").style(Style::default().fg(MUTED));
        frame.render_widget(
            empty,
            Rect::new(inner.x, inner.y + 1, inner.width, inner.height - 1),
        );
        app.set_row_layout(&[]);
        return;
    }

    let capacity = usize::from(inner.height - 1);
    let selected = app.selected_visible_index().unwrap_or(0);
    let offset = selected.saturating_sub(capacity.saturating_sub(1));
    let spinner = app.spinner();

    let mut layout = Vec::new();
    for (position, card) in visible.iter().enumerate().skip(offset).take(capacity) {
        let y = inner.y + 1 + (position - offset) as u16;
        let row_area = Rect::new(inner.x, y, inner.width, 1);
        let is_selected = position == selected;
        let base = if is_selected {
            Style::default()
                .bg(SELECTED)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::White)
        };
        let trigger_style = if card.menu().is_open() {
            base.fg(BG).bg(ACCENT)
        } else {
            base.fg(ACCENT)
        };
        let cells = render_row_cells(
            frame,
            row_area,
            [
                card.application().name.clone(),
                card.application().id.clone(),
                status_cell(card, spinner),
                " ⋯ ".to_string(),
            ],
            base,
            [base, base.fg(MUTED), base.fg(status_color(card)), trigger_style],
        );
        layout.push((card.application().id.clone(), row_area, cells[3]));
    }
    app.set_row_layout(&layout);
}

/// Draws one row split into the table columns and returns the cell areas.
fn render_row_cells(
    frame: &mut Frame,
    area: Rect,
    cells: [String; 4],
    fill: Style,
    styles: [Style; 4],
) -> Vec<Rect> {
    frame.render_widget(Paragraph::new("").style(fill), area);
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Min(10),
            Constraint::Percentage(35),
            Constraint::Length(14),
            Constraint::Length(TRIGGER_WIDTH),
        ])
        .split(area);
    for (index, ((text, style), cell)) in cells
        .into_iter()
        .zip(styles)
        .zip(columns.iter())
        .enumerate()
    {
        // keep one blank column between cells, the trigger is last
        let gap = u16::from(index < 3);
        let width = usize::from(cell.width.saturating_sub(gap)).max(1);
        frame.render_widget(Paragraph::new(compact_text(&text, width)).style(style), *cell);
    }
    columns.to_vec()
}

fn status_cell(card: &ApplicationCard, spinner: &str) -> String {
    let marker = match card.action_state() {
        ActionState::Pending(_) => spinner,
        ActionState::Idle => "●",
    };
    format!("{marker} {}", card.display_status())
}

fn status_color(card: &ApplicationCard) -> Color {
    if card.action_state() != ActionState::Idle {
        return WARN;
    }
    match card.application().status {
        AppStatus::Running => ACCENT,
        AppStatus::Stopped => MUTED,
        AppStatus::Unknown => ERROR,
    }
}

fn render_action_menu(frame: &mut Frame, app: &mut App) {
    let Some(card) = app.open_menu_card() else {
        return;
    };
    let id = card.application().id.clone();
    let items = card.menu_items();
    let anchor = card.menu().anchor();
    let highlighted = card.menu().highlighted();
    let busy = card.action_state() != ActionState::Idle;
    let title = compact_text(&card.application().name, usize::from(MENU_WIDTH - 4));

    let screen = frame.area();
    let width = MENU_WIDTH.min(screen.width);
    let height = (items.len() as u16 + 2).min(screen.height);
    let x = anchor.left.min(screen.right().saturating_sub(width));
    let y = anchor.top.min(screen.bottom().saturating_sub(height));
    let panel = Rect::new(x, y, width, height);

    let lines = items
        .iter()
        .enumerate()
        .map(|(index, (action, enabled))| {
            let mut style = if *enabled {
                Style::default().fg(Color::White)
            } else {
                Style::default().fg(MUTED).add_modifier(Modifier::DIM)
            };
            if index == highlighted {
                style = style.bg(SELECTED).add_modifier(Modifier::BOLD);
            }
            Line::from(Span::styled(
                format!(" {}  {}", action.hotkey(), action.title()),
                style,
            ))
        })
        .collect::<Vec<_>>();

    frame.render_widget(Clear, panel);
    frame.render_widget(
        Paragraph::new(lines).block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(Style::default().fg(if busy { WARN } else { ACCENT }))
                .style(Style::default().bg(PANEL)),
        ),
        panel,
    );
    app.set_menu_panel(&id, panel);
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
    let mut spans = Vec::new();
    let (mode_label, mode_color) = match app.mode() {
        InputMode::Normal => (" NORMAL ", PL_A),
        InputMode::Menu => (" MENU ", PL_B),
        InputMode::Filter => (" FILTER ", PL_C),
    };
    push_powerline_segment(&mut spans, mode_label, Color::White, mode_color, BG);

    if app.mode() == InputMode::Filter {
        spans.push(Span::styled(
            format!(" /{}▏", app.input()),
            Style::default().fg(Color::White),
        ));
    } else if let Some(prompt) = app.pending_confirmation_prompt() {
        spans.push(Span::styled(
            format!(" {prompt}  [y/n]"),
            Style::default().fg(WARN).add_modifier(Modifier::BOLD),
        ));
    } else {
        let status = app.status();
        spans.push(Span::styled(
            format!(" {} {status}", footer_status_icon(status)),
            Style::default().fg(footer_status_color(status)),
        ));
        if !app.filter().is_empty() {
            spans.push(Span::styled(
                format!("  filter:{}", app.filter()),
                Style::default().fg(MUTED),
            ));
        }
    }

    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
        area,
    );
}

fn footer_status_icon(status_text: &str) -> &'static str {
    let lower = status_text.to_ascii_lowercase();
    if lower.contains("failed") || lower.contains("error") {
        "✗"
    } else if lower.contains("not available") || lower.contains("in progress") {
        "!"
    } else {
        "•"
    }
}

fn footer_status_color(status_text: &str) -> Color {
    match footer_status_icon(status_text) {
        "✗" => ERROR,
        "!" => WARN,
        _ => MUTED,
    }
}

fn render_help_modal(frame: &mut Frame, app: &App) {
    let area = centered_rect(70, 70, frame.area());
    frame.render_widget(Clear, area);

    let mut lines = vec![
        Line::from(format!(
            "hostdeck help  mode:{}  api:{}",
            help_mode_label(app.mode()),
            display_endpoint(app.api_url())
        )),
        Line::from(""),
    ];
    for line in contextual_help_lines(app) {
        lines.push(Line::from(line));
    }

    let modal = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .title("Help")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(ACCENT))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(Color::White));

    frame.render_widget(modal, area);
}

fn contextual_help_lines(app: &App) -> Vec<String> {
    let mut lines = vec![
        "Move: j/k or arrows  g/G top/bottom  / filter  Esc clear filter".to_string(),
        "Menu: Enter/m/Space or click ⋯ to open  click outside or Esc to close".to_string(),
        "Actions: s start  r restart  x stop  d delete (asks y/n)".to_string(),
        "Session: R re-check  L logout  r refresh list  q quit".to_string(),
        String::new(),
    ];
    if app.mode() == InputMode::Menu {
        lines.push("Dimmed entries are unavailable for the current status".to_string());
        lines.push("or while another action on this application runs.".to_string());
    }
    if app.session().is_none() {
        lines.push("You are signed out. The plan poller only runs while signed in.".to_string());
    }
    lines
}

fn help_mode_label(mode: InputMode) -> &'static str {
    match mode {
        InputMode::Normal => "normal",
        InputMode::Menu => "menu",
        InputMode::Filter => "filter",
    }
}

fn push_powerline_segment(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
}

fn compact_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    if max_chars <= 1 {
        return "…".to_string();
    }
    let mut out = value.chars().take(max_chars - 1).collect::<String>();
    out.push('…');
    out
}

fn display_endpoint(url: &str) -> String {
    let trimmed = url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    trimmed.trim_end_matches('/').to_string()
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
