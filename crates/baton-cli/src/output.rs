// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! CLI output formatting with colors and styling.
//!
//! Respects NO_COLOR and FORCE_COLOR environment variables.
//! Colors are automatically disabled when output is piped.

use colored::{ColoredString, Colorize};

/// Initialize color support based on environment.
/// Call once at startup.
pub fn init() {
    // colored handles NO_COLOR itself; FORCE_COLOR is ours
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    } else if std::env::var("FORCE_COLOR").is_ok() {
        colored::control::set_override(true);
    }
}

// === Error Output ===

pub fn error_label() -> ColoredString {
    "error".red().bold()
}

pub fn hint_label() -> ColoredString {
    "hint".cyan()
}

pub fn hint_text(msg: &str) -> ColoredString {
    msg.dimmed()
}

// === Banners ===

pub fn banner_ok(phase: &str) -> String {
    format!(
        "{} {} {}",
        "===".dimmed(),
        format!("{} OK", phase).green().bold(),
        "===".dimmed()
    )
}

pub fn banner_fail(phase: &str, reason: &str) -> String {
    format!(
        "{} {} {}",
        "===".dimmed(),
        format!("{} FAILED: {}", phase, reason).red().bold(),
        "===".dimmed()
    )
}

pub fn banner_title(title: &str) -> String {
    format!("{} {} {}", "===".dimmed(), title.bold(), "===".dimmed())
}

// === Status Output ===

pub fn status_pass() -> ColoredString {
    "✓".green()
}

pub fn status_warn() -> ColoredString {
    "!".yellow()
}

/// Elapsed time column, e.g. `[  320ms]`.
pub fn timestamp(millis: f64) -> ColoredString {
    format!("[{:>5.0}ms]", millis).dimmed()
}

pub fn group_label(name: &str) -> ColoredString {
    format!("{:<6}", name).blue()
}

pub fn motor_power(power: i32) -> ColoredString {
    let text = format!("{:+}", power);
    match power {
        0 => text.normal(),
        p if p > 0 => text.green(),
        _ => text.magenta(),
    }
}

// === Help Output ===

pub fn title(name: &str) -> ColoredString {
    name.bold()
}

pub fn version(v: &str) -> ColoredString {
    v.dimmed()
}

pub fn section_header(header: &str) -> ColoredString {
    header.yellow().bold()
}

pub fn command(name: &str) -> ColoredString {
    name.green()
}

pub fn arg(name: &str) -> ColoredString {
    name.cyan()
}

// === Summary ===

pub fn count(label: &str, n: u64) -> String {
    format!("{:<14} {}", label, n.to_string().bold())
}

pub fn warn_count(label: &str, n: u64) -> String {
    if n > 0 {
        format!("{:<14} {}", label, n.to_string().yellow().bold())
    } else {
        count(label, n)
    }
}
