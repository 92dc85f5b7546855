//! TUI rendering with ratatui
//!
//! Implements the visual layout: device tree with a details panel on top,
//! change log below, status line at the bottom.

use monitor::{Device, DeviceState, LogEntry};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
};

use super::app::{App, Focus};
use crate::view::{TreeRow, format_speed, log_text, state_marker};

/// Main render function
///
/// Renders the complete UI based on current application state.
pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(frame.area());

    let (tree_height, log_height) = split_heights(chunks[0].height, app.split_ratio());
    let panes = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(tree_height), // Tree + details
            Constraint::Length(log_height),  // Change log
        ])
        .split(chunks[0]);

    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Min(30),    // Device tree
            Constraint::Length(36), // Details
        ])
        .split(panes[0]);

    render_device_tree(frame, app, top[0]);
    render_details(frame, app, top[1]);
    render_log(frame, app, panes[1]);
    render_status_line(frame, app, chunks[1]);
}

/// Split the available height between tree and log by ratio
fn split_heights(total: u16, ratio: f64) -> (u16, u16) {
    let tree = ((f64::from(total) * ratio).round() as u16).clamp(3.min(total), total);
    (tree, total - tree)
}

fn pane_block(title: String, focused: bool) -> Block<'static> {
    let border = if focused { Color::Blue } else { Color::DarkGray };
    Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(Style::default().fg(border))
}

fn state_style(state: DeviceState) -> Style {
    match state {
        DeviceState::Added => Style::default().fg(Color::Green),
        DeviceState::Removed => Style::default().fg(Color::Red),
        DeviceState::Error => Style::default().fg(Color::Yellow),
        DeviceState::Normal => Style::default(),
    }
}

/// Render the device tree (top left panel)
fn render_device_tree(frame: &mut Frame, app: &App, area: Rect) {
    let rows = app.rows();
    // Inside the borders
    let width = area.width.saturating_sub(2) as usize;

    let items: Vec<ListItem> = rows
        .iter()
        .map(|row| ListItem::new(tree_line(row, width)))
        .collect();

    let list = List::new(items)
        .block(pane_block(
            format!(" USB Devices ({}) ", rows.len()),
            app.focus() == Focus::Tree,
        ))
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        );

    let mut state = ListState::default();
    if !rows.is_empty() {
        state.select(Some(app.tree_cursor()));
    }

    frame.render_stateful_widget(list, area, &mut state);
}

/// Tree connector, label and right-aligned speed for one row
fn tree_line(row: &TreeRow, width: usize) -> Line<'static> {
    let style = state_style(row.device.state);
    let prefix = Span::styled(row.prefix.clone(), Style::default().fg(Color::DarkGray));
    let label = Span::styled(row.label(), style);
    let speed = format_speed(&row.device.speed);

    let used = prefix.width() + label.width() + speed.chars().count();
    let gap = width.saturating_sub(used).max(1);

    Line::from(vec![
        prefix,
        label,
        Span::raw(" ".repeat(gap)),
        Span::styled(speed, style),
    ])
}

/// Render details of the selected device (top right panel)
fn render_details(frame: &mut Frame, app: &App, area: Rect) {
    let lines = match app.selected_device() {
        Some(device) => detail_lines(&device),
        None => vec![Line::from(Span::styled(
            "No device selected",
            Style::default().fg(Color::DarkGray),
        ))],
    };

    let details = Paragraph::new(lines).block(pane_block(" Details ".to_string(), false));
    frame.render_widget(details, area);
}

fn detail_lines(device: &Device) -> Vec<Line<'static>> {
    let field = |name: &str, value: String, color: Color| {
        Line::from(vec![
            Span::styled(format!("{:<9}", name), Style::default().fg(Color::DarkGray)),
            Span::styled(value, Style::default().fg(color)),
        ])
    };

    let speed = format_speed(&device.speed);
    vec![
        Line::from(Span::styled(
            device.display_name(),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        field("Port:", device.port_path(), Color::White),
        field("Bus:", format!("{:03}", device.bus), Color::Magenta),
        field("Address:", format!("{:03}", device.address), Color::Yellow),
        field(
            "VID:PID:",
            format!("{:04x}:{:04x}", device.vendor_id, device.product_id),
            Color::Cyan,
        ),
        field(
            "Speed:",
            if speed.is_empty() {
                "unknown".to_string()
            } else {
                speed.trim_start().to_string()
            },
            Color::White,
        ),
        field(
            "State:",
            device.state.to_string(),
            match device.state {
                DeviceState::Added => Color::Green,
                DeviceState::Removed => Color::Red,
                _ => Color::White,
            },
        ),
    ]
}

/// Render the change log (bottom panel)
fn render_log(frame: &mut Frame, app: &App, area: Rect) {
    let width = area.width.saturating_sub(2) as usize;
    let items: Vec<ListItem> = app
        .log()
        .iter()
        .map(|entry| ListItem::new(log_row(entry, width)))
        .collect();

    let list = List::new(items)
        .block(pane_block(
            format!(" Change Log ({}) ", app.log().len()),
            app.focus() == Focus::Log,
        ))
        .highlight_style(if app.focus() == Focus::Log {
            Style::default().bg(Color::DarkGray)
        } else {
            Style::default()
        });

    let mut state = ListState::default();
    if !app.log().is_empty() {
        state.select(Some(app.log_cursor()));
    }

    frame.render_stateful_widget(list, area, &mut state);
}

fn log_row(entry: &LogEntry, width: usize) -> Line<'static> {
    let style = state_style(entry.state);
    let text = Span::styled(log_text(entry), style);
    let speed = format_speed(&entry.speed);
    let gap = width
        .saturating_sub(text.width() + speed.chars().count())
        .max(1);

    Line::from(vec![text, Span::raw(" ".repeat(gap)), Span::styled(speed, style)])
}

/// Render the status line (bottom row)
fn render_status_line(frame: &mut Frame, app: &App, area: Rect) {
    let key = |k: &'static str| {
        Span::styled(
            k,
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    };

    let updated = match app.last_updated() {
        Some(time) => time.format("%H:%M:%S").to_string(),
        None => "never".to_string(),
    };

    let mut spans = vec![
        Span::styled("Last Updated: ", Style::default().fg(Color::DarkGray)),
        Span::styled(updated, Style::default().fg(Color::Green)),
    ];
    if app.unavailable() {
        spans.push(Span::styled(
            format!("  {} USB unavailable", state_marker(DeviceState::Error)),
            Style::default().fg(Color::Red),
        ));
    }
    spans.extend([
        Span::raw("  |  "),
        key("q"),
        Span::raw(" Quit  "),
        key("Tab"),
        Span::raw(" Focus  "),
        key("j/k"),
        Span::raw(" Move  "),
        key("h/l"),
        Span::raw(" Collapse/Expand  "),
        key("r"),
        Span::raw(" Refresh"),
    ]);

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
