//! TUI application state
//!
//! Manages the application state, event loop, and coordinates between
//! the UI rendering and the background poller.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use crossterm::{
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use monitor::{
    Device, DeviceKey, LogEntry, Monitor, PollUpdate, Poller, Snapshot, TreeNode, build_forest,
    update_queue,
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::collections::HashSet;
use std::io::{self, Stdout};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::events::{Action, Event, EventHandler};
use super::ui;
use crate::config::AppConfig;
use crate::view::{TreeRow, flatten};

/// Pane receiving navigation keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Tree,
    Log,
}

/// Application state
pub struct App {
    /// Current device forest
    roots: Vec<TreeNode>,
    /// Hubs whose children are hidden, by identity so it survives rebuilds
    collapsed: HashSet<DeviceKey>,
    /// Selected row in the visible tree
    tree_cursor: usize,
    /// Change log copy, oldest first
    log: Vec<LogEntry>,
    /// Selected log line
    log_cursor: usize,
    /// Whether the log cursor follows new entries
    log_follow: bool,
    focus: Focus,
    /// Time of the last delivered update
    last_updated: Option<DateTime<Local>>,
    /// Time of the last manual refresh; older queued updates are stale
    refreshed_at: Option<DateTime<Local>>,
    /// Whether the last cycle could not reach the USB stack
    unavailable: bool,
    /// Share of the height given to the tree pane
    split_ratio: f64,
    /// Whether the app should quit
    should_quit: bool,
}

impl App {
    /// Create a new application instance
    pub fn new(split_ratio: f64) -> Self {
        Self {
            roots: Vec::new(),
            collapsed: HashSet::new(),
            tree_cursor: 0,
            log: Vec::new(),
            log_cursor: 0,
            log_follow: true,
            focus: Focus::Tree,
            last_updated: None,
            refreshed_at: None,
            unavailable: false,
            split_ratio,
            should_quit: false,
        }
    }

    /// Visible tree rows in display order
    pub fn rows(&self) -> Vec<TreeRow> {
        flatten(&self.roots, &self.collapsed)
    }

    /// Get the currently selected device
    pub fn selected_device(&self) -> Option<Device> {
        self.rows()
            .into_iter()
            .nth(self.tree_cursor)
            .map(|row| row.device)
    }

    pub fn tree_cursor(&self) -> usize {
        self.tree_cursor
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn log_cursor(&self) -> usize {
        self.log_cursor
    }

    pub fn focus(&self) -> Focus {
        self.focus
    }

    pub fn last_updated(&self) -> Option<DateTime<Local>> {
        self.last_updated
    }

    pub fn unavailable(&self) -> bool {
        self.unavailable
    }

    pub fn split_ratio(&self) -> f64 {
        self.split_ratio
    }

    /// Check if app should quit
    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    /// Handle user action
    pub fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => {
                self.should_quit = true;
            }
            Action::SwitchFocus => {
                self.focus = match self.focus {
                    Focus::Tree => Focus::Log,
                    Focus::Log => Focus::Tree,
                };
            }
            Action::Up => match self.focus {
                Focus::Tree => {
                    self.tree_cursor = self.tree_cursor.saturating_sub(1);
                }
                Focus::Log => {
                    self.log_cursor = self.log_cursor.saturating_sub(1);
                    self.log_follow = self.log_cursor + 1 >= self.log.len();
                }
            },
            Action::Down => match self.focus {
                Focus::Tree => {
                    let rows = self.rows().len();
                    if self.tree_cursor + 1 < rows {
                        self.tree_cursor += 1;
                    }
                }
                Focus::Log => {
                    if self.log_cursor + 1 < self.log.len() {
                        self.log_cursor += 1;
                    }
                    self.log_follow = self.log_cursor + 1 >= self.log.len();
                }
            },
            Action::Collapse => {
                if self.focus == Focus::Tree {
                    if let Some(row) = self.rows().into_iter().nth(self.tree_cursor) {
                        if row.has_children {
                            self.collapsed.insert(row.device.key());
                        }
                    }
                }
            }
            Action::Expand => {
                if self.focus == Focus::Tree {
                    if let Some(device) = self.selected_device() {
                        self.collapsed.remove(&device.key());
                    }
                }
            }
            Action::Refresh => {
                // Handled by the main loop, which owns the poller
                debug!("Refresh requested");
            }
            Action::None => {}
        }
    }

    /// Apply an update delivered by the poller
    ///
    /// Updates produced before the last manual refresh are dropped; they
    /// would bring back Added/Removed tags the refresh just cleared.
    pub fn apply_update(&mut self, update: PollUpdate) {
        if let Some(refreshed_at) = self.refreshed_at {
            if update.timestamp() < refreshed_at {
                debug!("Dropping update older than the last refresh");
                return;
            }
        }

        match update {
            PollUpdate::Forest { timestamp, roots } => {
                self.set_forest(roots);
                self.last_updated = Some(timestamp);
                self.unavailable = false;
            }
            PollUpdate::NoData { timestamp } => {
                if !self.unavailable {
                    warn!("USB devices unavailable");
                }
                self.last_updated = Some(timestamp);
                self.unavailable = true;
            }
        }
    }

    /// Apply the result of a manual refresh
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) {
        self.set_forest(build_forest(&snapshot.devices));
        self.last_updated = Some(snapshot.timestamp);
        self.refreshed_at = Some(snapshot.timestamp);
        self.unavailable = false;
    }

    /// Append change-log entries that arrived since the last call
    pub fn extend_log(&mut self, entries: Vec<LogEntry>) {
        if entries.is_empty() {
            return;
        }
        self.log.extend(entries);
        if self.log_follow {
            self.log_cursor = self.log.len() - 1;
        }
    }

    fn set_forest(&mut self, roots: Vec<TreeNode>) {
        let selected = self.selected_device().map(|d| d.key());
        self.roots = roots;

        let rows = self.rows();
        // Keep the selection on the same device when it is still visible
        if let Some(index) =
            selected.and_then(|key| rows.iter().position(|row| row.device.key() == key))
        {
            self.tree_cursor = index;
        } else if self.tree_cursor >= rows.len() {
            self.tree_cursor = rows.len().saturating_sub(1);
        }
    }
}

/// Terminal wrapper for setup/teardown
pub struct Tui {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl Tui {
    /// Create and initialize the terminal
    pub fn new() -> Result<Self> {
        let backend = CrosstermBackend::new(io::stdout());
        let terminal = Terminal::new(backend)?;
        Ok(Self { terminal })
    }

    /// Enter TUI mode (raw mode, alternate screen)
    pub fn enter(&mut self) -> Result<()> {
        enable_raw_mode()?;
        execute!(io::stdout(), EnterAlternateScreen)?;
        self.terminal.hide_cursor()?;
        self.terminal.clear()?;
        Ok(())
    }

    /// Exit TUI mode (restore terminal state)
    pub fn exit(&mut self) -> Result<()> {
        disable_raw_mode()?;
        execute!(io::stdout(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        Ok(())
    }

    /// Draw the UI
    pub fn draw(&mut self, app: &App) -> Result<()> {
        self.terminal.draw(|frame| {
            ui::render(frame, app);
        })?;
        Ok(())
    }
}

impl Drop for Tui {
    fn drop(&mut self) {
        // Best effort cleanup
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// Run the TUI application
///
/// This is the main entry point for the TUI mode.
pub async fn run(monitor: Arc<Monitor>, config: &AppConfig) -> Result<()> {
    let poller = Poller::new(monitor.clone(), config.monitor.poll_interval());
    let (callback, updates) = update_queue(config.monitor.update_queue_capacity);
    poller.start(callback).context("Failed to start poller")?;

    // Initialize TUI
    let mut tui = Tui::new()?;
    tui.enter()?;

    let mut app = App::new(config.tui.split_ratio);
    let mut events = EventHandler::new(config.tui.tick_rate());

    // Main event loop
    loop {
        app.extend_log(monitor.change_log().entries_since(app.log().len()));

        // Draw UI
        if let Err(e) = tui.draw(&app) {
            error!("Failed to draw UI: {:#}", e);
            break;
        }

        tokio::select! {
            // Terminal events (keyboard, resize, tick)
            event = events.next() => {
                match event {
                    Some(Event::Key(key)) => {
                        let action = Action::from(key);
                        app.handle_action(action);

                        if action == Action::Refresh {
                            let monitor = monitor.clone();
                            match tokio::task::spawn_blocking(move || monitor.refresh()).await {
                                Ok(Ok(snapshot)) => {
                                    info!("Refreshed {} devices", snapshot.devices.len());
                                    app.apply_snapshot(snapshot);
                                }
                                Ok(Err(e)) => warn!("Failed to refresh devices: {}", e),
                                Err(e) => error!("Refresh task failed: {}", e),
                            }
                        }
                    }
                    Some(Event::Resize) | Some(Event::Tick) => {
                        // Redrawn at the top of the loop
                    }
                    None => {
                        // Event channel closed
                        break;
                    }
                }
            }

            // Device updates from the poller
            update = updates.recv() => {
                match update {
                    Ok(update) => app.apply_update(update),
                    Err(e) => {
                        warn!("Update queue closed: {}", e);
                        break;
                    }
                }
            }
        }

        // Check if we should quit
        if app.should_quit() {
            break;
        }
    }

    poller.stop();
    poller.join().await;

    // Cleanup
    tui.exit()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor::DeviceState;
    use monitor::test_utils::mock_device;

    fn forest_update(devices: &[Device]) -> PollUpdate {
        PollUpdate::Forest {
            timestamp: Local::now(),
            roots: build_forest(devices),
        }
    }

    fn bus() -> Vec<Device> {
        vec![
            mock_device(1, &[], 0x1d6b, 0x0002),
            mock_device(1, &[1], 0x05e3, 0x0610),
            mock_device(1, &[1, 1], 0x046d, 0xc52b),
            mock_device(1, &[2], 0x0781, 0x5581),
        ]
    }

    fn app_with_bus() -> App {
        let mut app = App::new(0.7);
        app.apply_update(forest_update(&bus()));
        app
    }

    #[test]
    fn test_navigation() {
        let mut app = app_with_bus();
        assert_eq!(app.tree_cursor(), 0);

        app.handle_action(Action::Down);
        app.handle_action(Action::Down);
        app.handle_action(Action::Down);
        assert_eq!(app.tree_cursor(), 3);

        // Should not go past end
        app.handle_action(Action::Down);
        assert_eq!(app.tree_cursor(), 3);

        app.handle_action(Action::Up);
        assert_eq!(app.tree_cursor(), 2);

        for _ in 0..5 {
            app.handle_action(Action::Up);
        }
        // Should not go below 0
        assert_eq!(app.tree_cursor(), 0);
    }

    #[test]
    fn test_navigation_on_empty_tree() {
        let mut app = App::new(0.7);
        app.handle_action(Action::Down);
        app.handle_action(Action::Up);
        assert_eq!(app.tree_cursor(), 0);
        assert!(app.selected_device().is_none());
    }

    #[test]
    fn test_collapse_and_expand() {
        let mut app = app_with_bus();
        app.handle_action(Action::Down);
        assert_eq!(app.rows().len(), 4);

        app.handle_action(Action::Collapse);
        assert_eq!(app.rows().len(), 3);
        assert!(app.rows()[1].collapsed);

        app.handle_action(Action::Expand);
        assert_eq!(app.rows().len(), 4);
    }

    #[test]
    fn test_collapse_leaf_is_noop() {
        let mut app = app_with_bus();
        app.handle_action(Action::Down);
        app.handle_action(Action::Down);
        app.handle_action(Action::Collapse);
        assert_eq!(app.rows().len(), 4);
    }

    #[test]
    fn test_collapse_survives_rebuild() {
        let mut app = app_with_bus();
        app.handle_action(Action::Down);
        app.handle_action(Action::Collapse);

        let mut devices = bus();
        let mut added = mock_device(1, &[3], 0x0bda, 0x8153);
        added.state = DeviceState::Added;
        devices.push(added);
        app.apply_update(forest_update(&devices));

        let rows = app.rows();
        assert_eq!(rows.len(), 4);
        assert!(rows[1].collapsed);
    }

    #[test]
    fn test_selection_follows_device() {
        let mut app = app_with_bus();
        app.handle_action(Action::Down);
        app.handle_action(Action::Down);
        app.handle_action(Action::Down);
        let selected = app.selected_device().unwrap().key();

        // Removing the hub subtree shifts the selected device up
        let devices: Vec<Device> = bus()
            .into_iter()
            .filter(|d| d.path.first() != Some(&1))
            .collect();
        app.apply_update(forest_update(&devices));

        assert_eq!(app.selected_device().unwrap().key(), selected);
        assert_eq!(app.tree_cursor(), 1);
    }

    #[test]
    fn test_cursor_clamped_when_tree_shrinks() {
        let mut app = app_with_bus();
        app.handle_action(Action::Down);
        app.handle_action(Action::Down);
        app.handle_action(Action::Down);

        app.apply_update(forest_update(&bus()[..1]));
        assert_eq!(app.tree_cursor(), 0);
    }

    #[test]
    fn test_focus_switch_moves_log_cursor() {
        let mut app = app_with_bus();
        let device = mock_device(1, &[2], 0x0781, 0x5581);
        app.extend_log(vec![
            LogEntry::for_device(&device, Local::now()),
            LogEntry::for_device(&device, Local::now()),
            LogEntry::for_device(&device, Local::now()),
        ]);
        assert_eq!(app.log_cursor(), 2);

        app.handle_action(Action::SwitchFocus);
        assert_eq!(app.focus(), Focus::Log);

        app.handle_action(Action::Up);
        assert_eq!(app.log_cursor(), 1);
        assert_eq!(app.tree_cursor(), 0);

        // Not following anymore: new entries keep the cursor in place
        app.extend_log(vec![LogEntry::error("gone", Local::now())]);
        assert_eq!(app.log_cursor(), 1);

        app.handle_action(Action::Down);
        app.handle_action(Action::Down);
        assert_eq!(app.log_cursor(), 3);

        app.handle_action(Action::SwitchFocus);
        assert_eq!(app.focus(), Focus::Tree);
    }

    #[test]
    fn test_no_data_keeps_forest() {
        let mut app = app_with_bus();
        app.apply_update(PollUpdate::NoData {
            timestamp: Local::now(),
        });

        assert!(app.unavailable());
        assert_eq!(app.rows().len(), 4);

        app.apply_update(forest_update(&bus()));
        assert!(!app.unavailable());
    }

    #[test]
    fn test_update_queued_before_refresh_is_ignored() {
        let mut app = App::new(0.7);
        let queued_at = Local::now();

        let mut devices = bus();
        devices[3].state = DeviceState::Added;
        let stale = PollUpdate::Forest {
            timestamp: queued_at,
            roots: build_forest(&devices),
        };

        app.apply_snapshot(Snapshot {
            timestamp: queued_at + chrono::TimeDelta::milliseconds(5),
            devices: bus(),
        });
        app.apply_update(stale);

        assert!(
            app.rows()
                .iter()
                .all(|row| row.device.state == DeviceState::Normal)
        );

        // Updates from later cycles still apply
        app.apply_update(PollUpdate::Forest {
            timestamp: queued_at + chrono::TimeDelta::seconds(1),
            roots: build_forest(&devices),
        });
        assert_eq!(app.rows()[3].device.state, DeviceState::Added);
    }

    #[test]
    fn test_quit() {
        let mut app = App::new(0.7);
        assert!(!app.should_quit());
        app.handle_action(Action::Quit);
        assert!(app.should_quit());
    }
}
