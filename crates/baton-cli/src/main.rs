// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Baton CLI: runs the simulated robot demo.

mod commands;
mod help;
mod output;
mod sim;

use std::env;
use std::process;

use baton_rt::clock;
use baton_rt::scheduler::parse_tick_ms;

use commands::demo::{self, DemoOptions};

fn main() {
    clock::init();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    output::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        help::print_usage();
        return;
    }

    match args[1].as_str() {
        "demo" => {
            let opts = parse_demo_args(&args[2..]).unwrap_or_else(|msg| {
                eprintln!("{}: {}", output::error_label(), msg);
                eprintln!(
                    "{}: {}",
                    output::hint_label(),
                    output::hint_text("see `baton demo --help`")
                );
                process::exit(1);
            });
            demo::cmd_demo(opts);
        }
        "help" | "--help" | "-h" => help::print_usage(),
        "version" | "--version" | "-V" => {
            println!("{} {}", output::title("baton"), output::version(help::VERSION));
        }
        other => {
            eprintln!("{}: unknown command `{}`", output::error_label(), other);
            help::print_usage();
            process::exit(1);
        }
    }
}

fn parse_demo_args(args: &[String]) -> Result<DemoOptions, String> {
    let mut opts = DemoOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--ticks" => {
                let raw = iter.next().ok_or("--ticks needs a value")?;
                opts.max_ticks = raw
                    .parse()
                    .map_err(|_| format!("invalid tick count `{}`", raw))?;
            }
            "--tick-ms" => {
                let raw = iter.next().ok_or("--tick-ms needs a value")?;
                opts.tick_interval = Some(
                    parse_tick_ms(raw)
                        .ok_or_else(|| format!("invalid tick period `{}`", raw))?,
                );
            }
            "--help" | "-h" => {
                help::print_demo_usage();
                process::exit(0);
            }
            other => return Err(format!("unexpected argument `{}`", other)),
        }
    }
    Ok(opts)
}
