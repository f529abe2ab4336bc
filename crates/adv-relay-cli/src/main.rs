//! # adv-relay CLI
//!
//! Command-line utilities for inspecting device telemetry payloads.

use adv_relay_proto::{decode_base64, TopicPattern};
use anyhow::{Context, Result};
use std::env;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "decode" => {
            if args.len() < 3 {
                eprintln!("Usage: adv-relay decode <base64>");
                std::process::exit(1);
            }
            let records = decode_base64(&args[2]).context("Failed to decode")?;
            for record in &records {
                let json = record
                    .to_output()
                    .to_json()
                    .context("Failed to serialize record")?;
                println!("{json}");
            }
            eprintln!("{} record(s)", records.len());
        }
        "topic" => {
            if args.len() < 3 {
                eprintln!("Usage: adv-relay topic <topic>");
                std::process::exit(1);
            }
            match TopicPattern::default().device_id(&args[2]) {
                Some(device_id) => println!("{device_id}"),
                None => {
                    eprintln!("Topic does not match {}", TopicPattern::default().filter());
                    std::process::exit(1);
                }
            }
        }
        "--version" | "-v" => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"adv-relay CLI

USAGE:
    adv-relay <COMMAND> [OPTIONS]

COMMANDS:
    decode <base64>   Decode a telemetry envelope and print one JSON record per line
    topic <topic>     Print the device identifier carried by an inbound topic
    help              Show this help message

EXAMPLES:
    adv-relay decode "pRMAAA=="
    adv-relay topic "adv/352656100000001/data"
"#
    );
}
