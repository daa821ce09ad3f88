// Output formatting and display for CLI

use crate::config::ConfigSet;
use crate::process::{PidFile, StartReport};
use chrono::{DateTime, Local};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print the outcome of the initial launch
pub fn print_start_report(report: &StartReport) {
    for (name, pid) in &report.launched {
        println!(
            "{} {} {}",
            "✓".green().bold(),
            name.cyan(),
            format!("(PID: {})", pid).dimmed()
        );
    }

    for (name, error) in &report.failed {
        println!("{} {} {}", "✗".red().bold(), name.cyan(), error);
    }

    if !report.all_launched() {
        println!(
            "{}",
            "Failed processes are retried in the background".yellow()
        );
    }
}

/// Print the configured processes
pub fn print_spec_table(config: &ConfigSet) {
    #[derive(Tabled)]
    struct SpecRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Command")]
        command: String,
        #[tabled(rename = "Restart")]
        autorestart: String,
        #[tabled(rename = "Watch")]
        watch: String,
        #[tabled(rename = "PID file")]
        pid_file: String,
    }

    let rows: Vec<SpecRow> = config
        .specs()
        .iter()
        .map(|spec| {
            let command = std::iter::once(spec.command.as_str())
                .chain(spec.args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ");

            SpecRow {
                name: truncate(&spec.name, 20),
                command: truncate(&command, 40),
                autorestart: yes_no(spec.autorestart),
                watch: yes_no(spec.watch),
                pid_file: spec.pid_file.display().to_string(),
            }
        })
        .collect();

    print_table(Table::new(rows));
}

/// Print what the PID files say about each configured process
pub fn print_status_table(config: &ConfigSet) {
    #[derive(Tabled)]
    struct StatusRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "CPU")]
        cpu: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Started")]
        started: String,
        #[tabled(rename = "Uptime")]
        uptime: String,
    }

    let mut system = System::new();

    let rows: Vec<StatusRow> = config
        .specs()
        .iter()
        .map(|spec| {
            let mut row = StatusRow {
                name: truncate(&spec.name, 20),
                pid: "-".to_string(),
                state: "not running".bright_black().to_string(),
                cpu: "-".to_string(),
                memory: "-".to_string(),
                started: "-".to_string(),
                uptime: "-".to_string(),
            };

            let pid_file = PidFile::new(&spec.pid_file);
            let Ok(pid) = pid_file.read() else {
                return row;
            };
            row.pid = pid.to_string();

            if !pid_file.is_running() {
                row.state = "stale".yellow().to_string();
                return row;
            }
            row.state = "running".green().to_string();

            let sys_pid = Pid::from_u32(pid);
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[sys_pid]),
                true,
                ProcessRefreshKind::everything(),
            );

            if let Some(process) = system.process(sys_pid) {
                row.cpu = format!("{:.1}%", process.cpu_usage());
                row.memory = format_memory(process.memory());

                if let Some(started) = DateTime::from_timestamp(process.start_time() as i64, 0) {
                    let started: DateTime<Local> = started.into();
                    row.started = started.format("%Y-%m-%d %H:%M:%S").to_string();
                }
                row.uptime = format_duration(&Duration::from_secs(process.run_time()));
            }

            row
        })
        .collect();

    print_table(Table::new(rows));
}

fn print_table(mut table: Table) {
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
}

fn yes_no(value: bool) -> String {
    if value {
        "yes".green().to_string()
    } else {
        "no".bright_black().to_string()
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

/// Format memory usage in human-readable format
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

/// Truncate a string to at most `max_len` characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

/// Spinner shown while processes are being stopped
pub fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn finish_progress_success(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✓".green(), message));
}

pub fn finish_progress_error(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✗".red(), message));
}
