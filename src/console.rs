use std::fmt::Write as _;

use crate::dashboard::DashboardView;
use crate::messages::{ControlAction, DeviceSnapshot};
use crate::scheduler::Command;

pub const HELP: &str = "commands: list | show <device> | back | reset <device> | reset-all | \
on <device> | off <device> | refresh | logout";

#[derive(Clone, Debug, PartialEq)]
pub enum Input {
    Command(Command),
    List,
    Logout,
    Unknown(String),
}

/// Parse one console line. Blank lines yield `None`.
pub fn parse(line: &str) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let input = match (word, rest) {
        ("list" | "ls", _) => Input::List,
        ("refresh", _) => Input::Command(Command::Refresh),
        ("back", _) => Input::Command(Command::ClearSelection),
        ("reset-all", _) => Input::Command(Command::ResetAll),
        ("logout" | "quit" | "exit", _) => Input::Logout,
        ("show", name) if !name.is_empty() => Input::Command(Command::Select(name.to_string())),
        ("reset", name) if !name.is_empty() => Input::Command(Command::ResetOne(name.to_string())),
        ("on", name) if !name.is_empty() => {
            Input::Command(Command::Control(name.to_string(), ControlAction::Activate))
        }
        ("off", name) if !name.is_empty() => {
            Input::Command(Command::Control(name.to_string(), ControlAction::Deactivate))
        }
        _ => Input::Unknown(line.to_string()),
    };
    Some(input)
}

/// Detail view of the selected device, or the roster when nothing is selected.
pub fn render(view: &DashboardView) -> String {
    match view.selected_device() {
        Some(device) => render_detail(device, view.count(&device.name)),
        None => render_roster(view),
    }
}

fn render_roster(view: &DashboardView) -> String {
    if view.roster.is_empty() {
        return "no devices".to_string();
    }
    let mut out = String::new();
    for device in &view.roster {
        let _ = writeln!(
            out,
            "{:<16} {:>6}x  {:<8} {}",
            device.name,
            view.count(&device.name),
            if device.power { "on" } else { "off" },
            device.last_report.as_deref().unwrap_or("-"),
        );
    }
    out.truncate(out.trim_end().len());
    out
}

fn render_detail(device: &DeviceSnapshot, count: u64) -> String {
    let signal = device.signal_strength.as_deref().unwrap_or("N/A");
    let distance = device
        .distance
        .map(|d| d.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    [
        format!("[{}]", device.name),
        format!("status:      {}", device.status.as_deref().unwrap_or("-")),
        format!("report:      {}", device.last_report.as_deref().unwrap_or("-")),
        format!("updated:     {}", device.last_updated.as_deref().unwrap_or("N/A")),
        format!("signal:      {} ({})", signal, device.signal_quality().label()),
        format!("distance:    {}", distance),
        format!("power:       {}", if device.power { "on" } else { "off" }),
        format!("activations: {}", count),
    ]
    .join("\n")
}
