//! # SimState CLI
//!
//! Command-line utilities for inspecting frames and replaying deltas.

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use simstate_core::{StateStore, TopicMap};
use simstate_proto::{Codec, Envelope, WireCodec};
use std::env;

const LOCAL_NODE: &str = "local";

fn main() -> Result<()> {
    let mut args: Vec<String> = env::args().collect();

    let codec = match args.iter().position(|arg| arg == "--cbor") {
        Some(index) => {
            args.remove(index);
            WireCodec::Cbor
        }
        None => WireCodec::Msgpack,
    };

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "encode" => {
            if args.len() < 3 {
                eprintln!("Usage: simstate encode [--cbor] <json>");
                std::process::exit(1);
            }
            println!("{}", encode(codec, &args[2])?);
        }
        "decode" => {
            if args.len() < 3 {
                eprintln!("Usage: simstate decode [--cbor] <base64>");
                std::process::exit(1);
            }
            println!("{}", decode(codec, &args[2])?);
        }
        "envelope" => {
            if args.len() < 3 {
                eprintln!("Usage: simstate envelope [--cbor] <base64>");
                std::process::exit(1);
            }
            let envelope = decode_envelope(codec, &args[2])?;
            println!("target:  {}", envelope.target_group);
            println!("topic:   {}", envelope.topic);
            println!("sender:  {}", envelope.sender_id);
            println!("payload: {}", envelope.payload);
        }
        "apply" => {
            if args.len() < 4 {
                eprintln!("Usage: simstate apply <topic> <state-json> [delta-json]...");
                std::process::exit(1);
            }
            let state = apply(&args[2], &args[3], &args[4..])?;
            println!("{}", serde_json::to_string_pretty(&state)?);
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

fn encode(codec: WireCodec, json: &str) -> Result<String> {
    let value: Value = serde_json::from_str(json).context("Invalid JSON")?;
    let frame = codec.encode(&value).context("Failed to encode")?;
    Ok(STANDARD.encode(frame))
}

fn decode(codec: WireCodec, encoded: &str) -> Result<Value> {
    let frame = STANDARD
        .decode(encoded.trim())
        .context("Invalid base64")?;
    codec.decode(&frame).context("Failed to decode")
}

fn decode_envelope(codec: WireCodec, encoded: &str) -> Result<Envelope> {
    let frame = STANDARD
        .decode(encoded.trim())
        .context("Invalid base64")?;
    codec
        .decode_envelope(&frame)
        .context("Frame is not an inbound envelope")
}

/// Replay deltas against a topic state, as the active node would see them.
fn apply(topic: &str, state: &str, deltas: &[String]) -> Result<Value> {
    let initial: Value = serde_json::from_str(state).context("Invalid state JSON")?;
    if !initial.is_object() {
        bail!("State must be a JSON object");
    }

    let mut defaults = TopicMap::new();
    defaults.insert(topic.to_string(), initial);
    let mut store = StateStore::with_defaults(defaults);
    store.set_active_node(LOCAL_NODE);

    for (index, delta) in deltas.iter().enumerate() {
        let payload: Value = serde_json::from_str(delta)
            .with_context(|| format!("Invalid JSON in delta {}", index + 1))?;
        store
            .apply_delta(LOCAL_NODE, topic, "", &payload)
            .with_context(|| format!("Failed to apply delta {}", index + 1))?;
    }

    store
        .node_state(LOCAL_NODE, topic)
        .cloned()
        .context("Topic state missing after replay")
}

fn print_help() {
    println!(
        r#"SimState CLI

USAGE:
    simstate <COMMAND> [--cbor] [OPTIONS]

COMMANDS:
    encode <json>                        Encode a JSON value as a base64 frame
    decode <base64>                      Decode a base64 frame to JSON
    envelope <base64>                    Decode a base64 inbound frame and show its fields
    apply <topic> <state> [delta]...     Replay deltas against a topic state
    help                                 Show this help message

OPTIONS:
    --cbor    Use CBOR instead of MessagePack

EXAMPLES:
    simstate encode '["*", "ACDATA", "S1", ["U", {{"lat": 52.0}}]]'
    simstate apply acdata '{{"route": []}}' '["A", {{"route": "WP1"}}]' '["D", {{"route": "WP1"}}]'
"#
    );
}
