// Output formatting and display for CLI

use crate::ipc::protocol::ResponseData;
use crate::process::{LifecyclePhase, StatusSnapshot};
use colored::*;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print a success response to stdout
pub fn print_success(data: &ResponseData) {
    match data {
        ResponseData::Started { name } => {
            println!("{} {}", "✓ Started".green().bold(), name.cyan());
        }

        ResponseData::Stopped { name, instances } => {
            println!("{} {}", "✓ Stopped".green().bold(), name.cyan());
            if instances.len() > 1 {
                print_status_table(instances);
            }
        }

        ResponseData::Restarted { name } => {
            println!("{} {}", "✓ Restarting".green().bold(), name.cyan());
        }

        ResponseData::Status(snapshots) => {
            if snapshots.is_empty() {
                println!("{}", "No applications are registered".yellow());
            } else {
                print_status_table(snapshots);
            }
        }

        ResponseData::Logs(lines) => {
            if lines.is_empty() {
                println!("{}", "No logs available".yellow());
            }
            for line in lines {
                println!("{}", line);
            }
        }

        ResponseData::Success(message) => {
            println!("{} {}", "✓".green().bold(), message);
        }
    }
}

fn print_status_table(snapshots: &[StatusSnapshot]) {
    #[derive(Tabled)]
    struct StatusRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "#")]
        instance: usize,
        #[tabled(rename = "Phase")]
        phase: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Uptime")]
        uptime: String,
        #[tabled(rename = "Restarts")]
        restarts: String,
        #[tabled(rename = "Last exit")]
        last_exit: String,
    }

    let rows: Vec<StatusRow> = snapshots
        .iter()
        .map(|s| StatusRow {
            name: truncate(&s.name, 20),
            instance: s.instance,
            phase: format_phase_colored(s),
            pid: s
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            memory: s.memory.map(format_memory).unwrap_or_else(|| "-".to_string()),
            uptime: format_duration(&s.uptime()),
            restarts: format!("{} (+{})", s.restarts, s.manual_restarts),
            last_exit: s
                .last_exit
                .map(|e| e.to_string())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);

    for s in snapshots.iter().filter(|s| s.last_error.is_some()) {
        if let Some(ref error) = s.last_error {
            println!("  {} {}: {}", "!".red().bold(), s.name, error);
        }
    }
}

/// Phase with color; terminal phases carry their stop reason
fn format_phase_colored(snapshot: &StatusSnapshot) -> String {
    let phase = snapshot.phase;
    match phase {
        LifecyclePhase::Running => phase.to_string().green().to_string(),
        LifecyclePhase::Starting
        | LifecyclePhase::Stopping
        | LifecyclePhase::RestartPending => phase.to_string().yellow().to_string(),
        LifecyclePhase::Crashed => phase.to_string().red().to_string(),
        LifecyclePhase::Idle => phase.to_string().bright_black().to_string(),
        LifecyclePhase::Stopped => match snapshot.stop_reason {
            Some(reason) if reason.is_failure() => {
                format!("stopped ({})", reason).red().bold().to_string()
            }
            Some(reason) => format!("stopped ({})", reason).bright_black().to_string(),
            None => phase.to_string().bright_black().to_string(),
        },
    }
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}

fn format_memory(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}
