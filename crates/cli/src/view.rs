//! Text presentation of devices and change-log entries
//!
//! Shared by the plain `--list`/`--watch` output and the interactive TUI.

use monitor::{Device, DeviceKey, DeviceState, LogEntry, TreeNode};
use std::collections::HashSet;

/// One visible line of a rendered device forest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRow {
    pub device: Device,
    /// Indentation and `├─`/`└─` connector
    pub prefix: String,
    pub has_children: bool,
    pub collapsed: bool,
}

impl TreeRow {
    /// Expand marker, state marker and device name
    pub fn label(&self) -> String {
        let marker = match (self.has_children, self.collapsed) {
            (false, _) => "",
            (true, false) => "▼ ",
            (true, true) => "▶ ",
        };
        let state = match self.device.state {
            DeviceState::Added => "+ ",
            DeviceState::Removed => "- ",
            _ => "",
        };
        format!("{}{}{}", marker, state, self.device.display_name())
    }
}

/// Flatten a forest into display rows, skipping children of collapsed devices
pub fn flatten(roots: &[TreeNode], collapsed: &HashSet<DeviceKey>) -> Vec<TreeRow> {
    let mut rows = Vec::new();
    for root in roots {
        push_rows(root, "", "", collapsed, &mut rows);
    }
    rows
}

fn push_rows(
    node: &TreeNode,
    indent: &str,
    connector: &str,
    collapsed: &HashSet<DeviceKey>,
    rows: &mut Vec<TreeRow>,
) {
    let is_collapsed = !node.children.is_empty() && collapsed.contains(&node.device.key());
    rows.push(TreeRow {
        device: node.device.clone(),
        prefix: format!("{}{}", indent, connector),
        has_children: !node.children.is_empty(),
        collapsed: is_collapsed,
    });
    if is_collapsed {
        return;
    }

    let child_indent = match connector {
        "" => indent.to_string(),
        "├─" => format!("{}│ ", indent),
        _ => format!("{}  ", indent),
    };
    let last = node.children.len().saturating_sub(1);
    for (index, child) in node.children.iter().enumerate() {
        let connector = if index == last { "└─" } else { "├─" };
        push_rows(child, &child_indent, connector, collapsed, rows);
    }
}

/// Format a raw Mbit/s speed as a fixed-width "480 Mbps" / "5 Gbps" string
pub fn format_speed(speed: &str) -> String {
    let speed = speed.trim();
    if speed.is_empty() {
        return String::new();
    }

    match speed.parse::<f64>() {
        Ok(mbps) if mbps >= 1000.0 => format!("{:>8}", format!("{} Gbps", mbps / 1000.0)),
        Ok(mbps) => format!("{:>8}", format!("{} Mbps", mbps)),
        Err(_) => format!("{:>8}", speed),
    }
}

/// Single-character marker for a device or log state
pub fn state_marker(state: DeviceState) -> char {
    match state {
        DeviceState::Normal => ' ',
        DeviceState::Added => '+',
        DeviceState::Removed => '-',
        DeviceState::Error => '!',
    }
}

/// Left-hand part of a log line: time, state marker and text
pub fn log_text(entry: &LogEntry) -> String {
    format!(
        "{} {} {}",
        entry.time.format("%H:%M:%S"),
        state_marker(entry.state),
        entry.text
    )
}

/// Full log line as printed by `--watch`
pub fn log_line(entry: &LogEntry) -> String {
    let speed = format_speed(&entry.speed);
    if speed.is_empty() {
        log_text(entry)
    } else {
        format!("{} {}", log_text(entry), speed.trim_start())
    }
}

/// Plain-text forest for `--list`, one device per line with the speed right-aligned
pub fn tree_text(roots: &[TreeNode]) -> String {
    let rows = flatten(roots, &HashSet::new());
    let lefts: Vec<String> = rows
        .iter()
        .map(|row| {
            format!(
                "{}{} [{} {:04x}:{:04x}]",
                row.prefix,
                row.label(),
                row.device.port_path(),
                row.device.vendor_id,
                row.device.product_id
            )
        })
        .collect();
    let width = lefts.iter().map(|l| l.chars().count()).max().unwrap_or(0);

    let mut out = String::new();
    for (left, row) in lefts.iter().zip(&rows) {
        let pad = width - left.chars().count();
        out.push_str(left);
        out.push_str(&" ".repeat(pad));
        out.push_str("  ");
        out.push_str(&format_speed(&row.device.speed));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use monitor::build_forest;
    use monitor::test_utils::mock_device;

    fn sample_forest() -> Vec<TreeNode> {
        build_forest(&[
            mock_device(1, &[], 0x1d6b, 0x0002),
            mock_device(1, &[1], 0x05e3, 0x0610),
            mock_device(1, &[1, 1], 0x046d, 0xc52b),
            mock_device(1, &[1, 2], 0x0bda, 0x8153),
            mock_device(1, &[2], 0x0781, 0x5581),
        ])
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(""), "");
        assert_eq!(format_speed("1.5"), "1.5 Mbps");
        assert_eq!(format_speed("12"), " 12 Mbps");
        assert_eq!(format_speed("480"), "480 Mbps");
        assert_eq!(format_speed("5000"), "  5 Gbps");
        assert_eq!(format_speed("10000"), " 10 Gbps");
        assert_eq!(format_speed("fast"), "    fast");
    }

    #[test]
    fn test_flatten_connectors() {
        let rows = flatten(&sample_forest(), &HashSet::new());
        let prefixes: Vec<&str> = rows.iter().map(|r| r.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["", "├─", "│ ├─", "│ └─", "└─"]);
        assert!(rows[0].has_children);
        assert!(!rows[2].has_children);
    }

    #[test]
    fn test_flatten_collapsed() {
        let forest = sample_forest();
        let hub = forest[0].children[0].device.key();
        let collapsed: HashSet<DeviceKey> = [hub].into_iter().collect();

        let rows = flatten(&forest, &collapsed);

        assert_eq!(rows.len(), 3);
        assert!(rows[1].collapsed);
        assert!(rows[1].label().starts_with("▶ "));
        assert!(rows[0].label().starts_with("▼ "));
    }

    #[test]
    fn test_label_state_prefix() {
        let mut device = mock_device(1, &[3], 0x0781, 0x5581);
        device.state = DeviceState::Added;
        let row = TreeRow {
            device: device.clone(),
            prefix: String::new(),
            has_children: false,
            collapsed: false,
        };
        assert_eq!(row.label(), "+ Test Device 0781:5581");

        device.state = DeviceState::Removed;
        let row = TreeRow { device, ..row };
        assert_eq!(row.label(), "- Test Device 0781:5581");
    }

    #[test]
    fn test_log_line() {
        let time = Local.with_ymd_and_hms(2024, 5, 1, 9, 8, 7).unwrap();
        let mut device = mock_device(1, &[2], 0x0781, 0x5581);
        device.state = DeviceState::Added;

        let entry = LogEntry::for_device(&device, time);
        assert_eq!(log_line(&entry), "09:08:07 + Test Device 0781:5581 480 Mbps");

        let error = LogEntry::error("USB enumeration unavailable", time);
        assert_eq!(log_line(&error), "09:08:07 ! USB enumeration unavailable");
    }

    #[test]
    fn test_tree_text_aligns_speeds() {
        let text = tree_text(&sample_forest());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("▼ Test Device 1d6b:0002 [usb1 1d6b:0002]"));
        assert!(lines[2].starts_with("│ ├─Test Device 046d:c52b [1-1.1 046d:c52b]"));

        let widths: HashSet<usize> = lines.iter().map(|l| l.chars().count()).collect();
        assert_eq!(widths.len(), 1);
        assert!(lines.iter().all(|l| l.ends_with("480 Mbps")));
    }
}
