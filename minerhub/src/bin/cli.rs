//! Command-line interface for minerhubd.
//!
//! This binary provides a CLI for monitoring the fleet and issuing
//! commands via the daemon's HTTP API.

use std::env;

use anyhow::{Context, Result, bail};

use minerhub::api_client::{self, types::FleetReport};
use minerhub::controls::{ControlDetail, SensorValue};
use minerhub::coordinator::PollPhase;
use minerhub::device::MiningMode;
use minerhub::fleet::DeviceId;

fn usage() -> ! {
    eprintln!("Usage: minerhub-cli <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  status                          Show every device");
    eprintln!("  device <id>                     Show one device and its controls");
    eprintln!("  reboot <id>...                  Reboot devices");
    eprintln!("  restart <id>...                 Restart the mining backend");
    eprintln!("  mode <low|normal|high> <id>...  Select a power preset");
    eprintln!("  power-limit <id> <watts>        Set a device's power limit");
    eprintln!("  remove <id>                     Stop polling a device");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  MINERHUB_API_URL    API base URL (default: http://127.0.0.1:7785)");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        usage();
    }

    let command = &args[1];
    let rest = &args[2..];

    match command.as_str() {
        "status" => cmd_status().await?,
        "device" => match rest {
            [id] => cmd_device(id.as_str().into()).await?,
            _ => usage(),
        },
        "reboot" => cmd_reboot(ids(rest)?).await?,
        "restart" => cmd_restart(ids(rest)?).await?,
        "mode" => match rest {
            [mode, targets @ ..] => cmd_mode(mode, ids(targets)?).await?,
            _ => usage(),
        },
        "power-limit" => match rest {
            [id, watts] => cmd_power_limit(id.as_str().into(), watts).await?,
            _ => usage(),
        },
        "remove" => match rest {
            [id] => cmd_remove(id.as_str().into()).await?,
            _ => usage(),
        },
        _ => {
            eprintln!("Unknown command: {}", command);
            eprintln!("Run without arguments to see usage.");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Build an API client, honoring MINERHUB_API_URL if set.
fn make_client() -> api_client::Client {
    match env::var("MINERHUB_API_URL") {
        Ok(url) => api_client::Client::with_base_url(url),
        Err(_) => api_client::Client::new(),
    }
}

fn ids(args: &[String]) -> Result<Vec<DeviceId>> {
    if args.is_empty() {
        bail!("at least one device id is required");
    }
    Ok(args.iter().map(|id| id.as_str().into()).collect())
}

fn show(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(value) => format!("{value} {unit}"),
        None => "-".to_string(),
    }
}

/// Print one line per device.
async fn cmd_status() -> Result<()> {
    let devices = make_client().get_devices().await?;

    if devices.is_empty() {
        println!("Devices: (none)");
        return Ok(());
    }

    for device in &devices {
        println!(
            "{:<16} {:<24} {:<10} {:>12} {:>10} {:>6}",
            device.id.as_str(),
            device.title,
            device.phase.name(),
            show(device.hashrate, "TH/s"),
            show(device.wattage, "W"),
            show(device.temperature_avg.map(f64::from), "°C"),
        );
    }

    Ok(())
}

/// Print a device snapshot and its controls.
async fn cmd_device(id: DeviceId) -> Result<()> {
    let detail = make_client().get_device(&id).await?;
    let snapshot = &detail.snapshot;

    println!("Device:   {} ({})", detail.title, detail.id);
    println!("Address:  {}", snapshot.identity.host_address);
    if let Some(model) = &snapshot.identity.model {
        println!("Model:    {model}");
    }
    if let Some(firmware) = &snapshot.identity.firmware_version {
        println!("Firmware: {firmware}");
    }
    println!("Status:   {}", snapshot.phase.name());
    if let PollPhase::SoftFail { error } | PollPhase::Failed { error } = &snapshot.phase {
        println!("Error:    {error} ({} consecutive failures)", snapshot.failure_count);
    }

    if detail.controls.is_empty() {
        println!("Controls: (not registered yet)");
    } else {
        println!("Controls:");
        for control in &detail.controls {
            let value = match &control.detail {
                ControlDetail::Sensor { value, unit } => match value {
                    Some(SensorValue::Number(n)) => {
                        format!("{n} {}", unit.as_deref().unwrap_or_default())
                    }
                    Some(SensorValue::Text(text)) => text.clone(),
                    None => "-".to_string(),
                },
                ControlDetail::Number { value, unit, .. } => show(*value, unit),
                ControlDetail::Select { current, .. } => {
                    current.clone().unwrap_or_else(|| "-".to_string())
                }
                ControlDetail::Switch { is_on } => match is_on {
                    Some(true) => "on".to_string(),
                    Some(false) => "off".to_string(),
                    None => "-".to_string(),
                },
            };
            println!("  {:<40} {}", control.info.name, value.trim_end());
        }
    }

    let actions: Vec<_> = detail.actions.iter().map(|a| a.kind.as_str()).collect();
    println!("Actions:  {}", actions.join(", "));

    Ok(())
}

async fn cmd_reboot(ids: Vec<DeviceId>) -> Result<()> {
    print_report(&make_client().reboot(ids).await?)
}

async fn cmd_restart(ids: Vec<DeviceId>) -> Result<()> {
    print_report(&make_client().restart_backend(ids).await?)
}

async fn cmd_mode(mode: &str, ids: Vec<DeviceId>) -> Result<()> {
    let mode: MiningMode = mode
        .parse()
        .with_context(|| format!("unknown mode {mode:?}, expected low, normal or high"))?;
    print_report(&make_client().set_mining_mode(ids, mode).await?)
}

async fn cmd_power_limit(id: DeviceId, watts: &str) -> Result<()> {
    let watts: u32 = watts
        .parse()
        .with_context(|| format!("invalid wattage {watts:?}"))?;
    make_client().set_power_limit(&id, watts).await?;
    println!("{id}: power limit set to {watts} W");
    Ok(())
}

async fn cmd_remove(id: DeviceId) -> Result<()> {
    make_client().remove_device(&id).await?;
    println!("{id}: removed");
    Ok(())
}

/// Print per-device results; fails if any device failed or was unknown.
fn print_report(report: &FleetReport) -> Result<()> {
    for id in report.succeeded() {
        println!("{id}: ok");
    }
    for outcome in report.failed() {
        println!(
            "{}: {}",
            outcome.device,
            outcome.error.as_deref().unwrap_or("failed")
        );
    }
    for id in &report.unresolved {
        println!("{id}: unknown or unreachable");
    }

    if report.failed().next().is_some() || !report.unresolved.is_empty() {
        bail!("command did not succeed on every device");
    }
    Ok(())
}
