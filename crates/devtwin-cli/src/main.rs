//! # Device Twin CLI
//!
//! Command-line utilities for inspecting topics and payloads offline.

use anyhow::{Context, Result};
use devtwin_core::{build_state_update, build_twin_update};
use devtwin_proto::{encode, MessageClass, TopicScheme};
use std::env;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let scheme =
        env::var("DEVTWIN_TOPIC_PREFIX").map_or_else(|_| TopicScheme::default(), TopicScheme::new);

    match args[1].as_str() {
        "topics" => {
            if args.len() < 3 {
                eprintln!("Usage: devtwin topics <device-id>");
                std::process::exit(1);
            }
            for class in MessageClass::ALL {
                println!("{class:<10} {}", scheme.resolve(&args[2], class));
            }
        }
        "payload" => {
            if args.len() < 4 {
                eprintln!("Usage: devtwin payload <field> <value>");
                std::process::exit(1);
            }
            let payload = encode(&build_twin_update(&args[2], &args[3]))
                .context("Failed to encode twin update")?;
            println!("{}", String::from_utf8(payload)?);
        }
        "state" => {
            if args.len() < 3 {
                eprintln!("Usage: devtwin state <state>");
                std::process::exit(1);
            }
            let payload =
                encode(&build_state_update(&args[2])).context("Failed to encode state update")?;
            println!("{}", String::from_utf8(payload)?);
        }
        "classify" => {
            if args.len() < 3 {
                eprintln!("Usage: devtwin classify <topic>");
                std::process::exit(1);
            }
            let (device_id, class) = scheme
                .parse(&args[2])
                .with_context(|| format!("Not a device twin topic: {}", args[2]))?;
            println!("device={device_id} class={class}");
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
        r#"Device Twin CLI

USAGE:
    devtwin <COMMAND> [OPTIONS]

COMMANDS:
    topics <device-id>      Print the state, twin and cloud topics of a device
    payload <field> <value> Print the twin update payload for a reading
    state <state>           Print the state update payload
    classify <topic>        Print the device and message class of a topic
    help                    Show this help message

ENVIRONMENT:
    DEVTWIN_TOPIC_PREFIX    Topic prefix (default: $hw/events/device)

EXAMPLES:
    devtwin topics dev-1
    devtwin payload CPU_Temperatur 42.5
    devtwin classify '$hw/events/devicedev-1/twin/cloud_update'
"#
    );
}
