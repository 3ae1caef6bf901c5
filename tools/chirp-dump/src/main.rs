// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! chirp-dump - Observe and inject CHIRP discovery traffic
//!
//! Listens on the CHIRP port and prints every datagram of the selected
//! group as it arrives. Can emit a REQUEST to make peers re-offer their
//! services, which turns this into a one-shot network inventory.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use colored::*;

use constellation::chirp::socket::default_broadcast_addresses;
use constellation::chirp::{BroadcastRecv, BroadcastSend};
use constellation::message::{ChirpMessage, ChirpMessageType, Md5Hash};
use constellation::protocol::ServiceIdentifier;

/// Observe and inject CHIRP discovery traffic
#[derive(Parser, Debug)]
#[command(name = "chirp-dump")]
#[command(version)]
#[command(about = "Dump CHIRP discovery traffic (OFFER, DEPART, REQUEST)")]
struct Args {
    /// Constellation group to watch
    #[arg(short, long, default_value = "edda")]
    group: String,

    /// Host name used when sending requests
    #[arg(long, default_value = "chirp_dump")]
    name: String,

    /// Broadcast address for outgoing requests (default: per interface)
    #[arg(short, long)]
    brd: Option<Ipv4Addr>,

    /// Bind address for incoming datagrams
    #[arg(long, default_value = "0.0.0.0")]
    any: Ipv4Addr,

    /// Send a REQUEST for this service on startup (control, heartbeat,
    /// monitoring, data or all)
    #[arg(short, long)]
    request: Option<String>,

    /// Exit after this many seconds (0 = run until Ctrl-C)
    #[arg(short, long, default_value = "0")]
    timeout: u64,

    /// Show datagrams of every group, not just ours
    #[arg(long)]
    all_groups: bool,
}

fn parse_services(name: &str) -> Vec<ServiceIdentifier> {
    match name.to_lowercase().as_str() {
        "control" => vec![ServiceIdentifier::Control],
        "heartbeat" => vec![ServiceIdentifier::Heartbeat],
        "monitoring" => vec![ServiceIdentifier::Monitoring],
        "data" => vec![ServiceIdentifier::Data],
        "all" => vec![
            ServiceIdentifier::Control,
            ServiceIdentifier::Heartbeat,
            ServiceIdentifier::Monitoring,
            ServiceIdentifier::Data,
        ],
        other => {
            eprintln!("{} unknown service {other:?}", "error:".red().bold());
            std::process::exit(2);
        }
    }
}

fn main() {
    let args = Args::parse();

    let receiver = match BroadcastRecv::new(args.any) {
        Ok(receiver) => receiver,
        Err(e) => {
            eprintln!("{} cannot bind CHIRP port: {e}", "error:".red().bold());
            std::process::exit(1);
        }
    };

    let group_id = Md5Hash::new(&args.group);
    let host_id = Md5Hash::new(&args.name);
    println!(
        "{} group {} ({})",
        "watching".green().bold(),
        args.group.bold(),
        group_id
    );

    if let Some(service) = &args.request {
        let targets = match args.brd {
            Some(addr) => vec![addr],
            None => default_broadcast_addresses(),
        };
        for service in parse_services(service) {
            for target in &targets {
                let sender = match BroadcastSend::new(*target) {
                    Ok(sender) => sender,
                    Err(e) => {
                        eprintln!("{} cannot open send socket: {e}", "error:".red().bold());
                        continue;
                    }
                };
                let msg = ChirpMessage::new(
                    ChirpMessageType::Request,
                    group_id,
                    host_id,
                    service,
                    0,
                );
                if let Err(e) = sender.send(&msg.assemble()) {
                    eprintln!("{} request via {target} failed: {e}", "warning:".yellow());
                } else {
                    println!("{} REQUEST {service} via {target}", "sent".cyan());
                }
            }
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = Arc::clone(&running);
    let _ = ctrlc::set_handler(move || running_handler.store(false, Ordering::Relaxed));

    let deadline = (args.timeout > 0).then(|| Instant::now() + Duration::from_secs(args.timeout));
    while running.load(Ordering::Relaxed) {
        if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
            break;
        }
        let raw = match receiver.recv(Duration::from_millis(100)) {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{} receive failed: {e}", "error:".red().bold());
                break;
            }
        };
        let msg = match ChirpMessage::disassemble(&raw.content) {
            Ok(msg) => msg,
            Err(e) => {
                println!("{} {} from {}: {e}", "drop".red(), raw.content.len(), raw.address);
                continue;
            }
        };
        if !args.all_groups && msg.group_id() != group_id {
            continue;
        }
        if msg.host_id() == host_id {
            continue;
        }

        let kind = match msg.message_type() {
            ChirpMessageType::Offer => "OFFER".green(),
            ChirpMessageType::Depart => "DEPART".yellow(),
            ChirpMessageType::Request => "REQUEST".cyan(),
        };
        println!(
            "{kind:>8} {service:<10} host {host} at {addr}:{port}",
            service = msg.service_id().to_string(),
            host = msg.host_id(),
            addr = raw.address,
            port = msg.port(),
        );
    }
}
