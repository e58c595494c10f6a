// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Help text for CLI commands.

use crate::output;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn print_usage() {
    println!(
        "{} {} - Straight-line robot control on a tick",
        output::title("Baton"),
        output::version(VERSION)
    );
    println!();
    println!(
        "{}: {} {} {}",
        output::section_header("Usage"),
        output::command("baton"),
        output::arg("<command>"),
        output::arg("[options]")
    );
    println!();
    println!("{}", output::section_header("Commands:"));
    println!("  {}             Run the simulated robot", output::command("demo"));
    println!("  {}             Show this help", output::command("help"));
    println!("  {}          Show version", output::command("version"));

    println!();
    println!("{}", output::section_header("Demo options:"));
    println!("  {} {}       Stop after at most N ticks (default 100)", output::arg("--ticks"), output::arg("<n>"));
    println!("  {} {}    Tick period in milliseconds (default 20)", output::arg("--tick-ms"), output::arg("<ms>"));

    println!();
    println!("{}", output::section_header("Environment:"));
    println!("  {}     Tick period when --tick-ms is not given", output::arg("BATON_TICK_MS"));
    println!("  {}          Log filter, e.g. baton_rt=debug", output::arg("RUST_LOG"));
    println!("  {}          Disable colored output", output::arg("NO_COLOR"));
}

pub fn print_demo_usage() {
    println!(
        "{}: {} {} {} {}",
        output::section_header("Usage"),
        output::command("baton demo"),
        output::arg("[--ticks <n>]"),
        output::arg("[--tick-ms <ms>]"),
        output::arg("[--help]")
    );
}
