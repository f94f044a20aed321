mod config;
mod network;
mod system;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::fs;
use std::path::Path;
use std::process::Command;

use crate::config::loader::load_config;
use crate::config::structs::Config;
use crate::network::interfaces;
use crate::network::pci::{self, ControllerRecord, HardwareEnumerator, LspciEnumerator};
use crate::network::rebind::{RebindAction, Rebinder};
use crate::system::service::{ServiceController, SystemdController};

const SERVICE_UNIT: &str = "nic-rebind.service";
const UNIT_PATH: &str = "/etc/systemd/system/nic-rebind.service";
const BIN_PATH: &str = "/usr/local/sbin/nic-rebind";

#[derive(Parser)]
#[command(name = "nic-rebind")]
#[command(version = "1.2")]
#[command(about = "Rebinds a Realtek PCIe NIC to its current bus-ordered interface name", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Run without making changes (show what would be done)
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the controller and rewrite the interfaces file (default)
    Fix {
        /// Restart networking without asking
        #[arg(long, short = 'y')]
        yes: bool,
        /// Never restart networking after a rewrite
        #[arg(long, conflicts_with = "yes")]
        no_restart: bool,
    },
    /// Show detected hardware and the configured interface name
    Status {
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },
    /// Install the boot-time systemd unit
    Install,
    /// Uninstall the systemd unit
    Uninstall,
    /// Show the service journal
    Logs {
        /// Keep following new entries
        #[arg(long, short = 'f')]
        follow: bool,
    },
}

/// ANSI color codes
mod colors {
    pub const RED: &str = "\x1b[0;31m";
    pub const GREEN: &str = "\x1b[0;32m";
    pub const YELLOW: &str = "\x1b[0;33m";
    pub const BLUE: &str = "\x1b[0;34m";
    pub const CYAN: &str = "\x1b[0;36m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const NC: &str = "\x1b[0m";
}

fn main() -> Result<()> {
    utils::logger::init();

    let cli = Cli::parse();

    // Root check (status, logs and dry runs never write)
    let read_only = cli.dry_run
        || matches!(
            cli.command,
            Some(Commands::Status { .. }) | Some(Commands::Logs { .. })
        );
    if !read_only && !utils::privilege::is_root() {
        error!("This command must be run as root.");
        error!("Try: sudo nic-rebind");
        std::process::exit(1);
    }

    let config = load_config();

    match cli.command.unwrap_or(Commands::Fix {
        yes: false,
        no_restart: false,
    }) {
        Commands::Fix { yes, no_restart } => {
            if cli.dry_run {
                run_dry_run(&config)?;
            } else {
                run_fix(&config, yes, no_restart)?;
            }
        }
        Commands::Status { json } => {
            run_status(&config, json)?;
        }
        Commands::Install => {
            run_install()?;
        }
        Commands::Uninstall => {
            run_uninstall()?;
        }
        Commands::Logs { follow } => {
            run_logs(follow)?;
        }
    }

    Ok(())
}

fn run_fix(config: &Config, yes: bool, no_restart: bool) -> Result<()> {
    info!("=== nic-rebind v1.2 ===");

    let enumerator = LspciEnumerator;
    let rebinder = Rebinder::new(config.device.clone(), config.paths.clone(), &enumerator);
    let report = rebinder.run()?;

    match &report.action {
        RebindAction::Rewritten { previous } => {
            match previous {
                Some(old) => info!("Interface renamed: {} -> {}", old, report.interface),
                None => info!("Interface set to {}", report.interface),
            }

            if no_restart {
                info!("Restart suppressed; the change applies on the next networking restart");
                return Ok(());
            }

            let unit = &config.service.networking_unit;
            let controller = SystemdController;
            if yes || confirm(&format!("Restart {} now to apply the change?", unit))? {
                controller.restart(unit)?;
                info!("{} restarted", unit);
            } else {
                info!("Skipped restart. Apply later with: systemctl restart {}", unit);
            }
        }
        RebindAction::AlreadyCurrent => {
            info!("Configuration already up to date ({})", report.interface);
        }
        RebindAction::NoConfig => {
            warn!(
                "Detection succeeded ({}) but there was no interfaces file to rewrite",
                report.interface
            );
        }
    }

    Ok(())
}

fn run_dry_run(config: &Config) -> Result<()> {
    let enumerator = LspciEnumerator;
    let rebinder = Rebinder::new(config.device.clone(), config.paths.clone(), &enumerator);
    let preview = rebinder.preview()?;

    info!("[DRY-RUN] Would apply the following fix:");
    info!(
        "  - Controller: {} ({})",
        preview.controller.slot, preview.controller.description
    );
    info!("  - Target name: {}", preview.target);

    if !preview.config_exists {
        info!(
            "  - {} does not exist; nothing would be rewritten",
            config.paths.interfaces_file.display()
        );
    } else if !preview.would_change {
        info!("  - Configuration already up to date; no write");
    } else {
        match &preview.current {
            Some(current) => info!("  - Would rename {} -> {}", current, preview.target),
            None => info!(
                "  - No bridge-ports name found; would rewrite the generic pattern"
            ),
        }
        info!(
            "  - Would back up {} into {}",
            config.paths.interfaces_file.display(),
            config.paths.backup_dir.display()
        );
    }

    Ok(())
}

fn run_status(config: &Config, json: bool) -> Result<()> {
    use colors::*;

    let enumerator = LspciEnumerator;
    let controllers = enumerator.ethernet_controllers().unwrap_or_default();
    let matched: Vec<&ControllerRecord> = controllers
        .iter()
        .filter(|c| c.description.contains(&config.device.signature))
        .collect();

    let target = match matched.first() {
        Some(c) => Some(pci::interface_name(&c.slot)?),
        None => None,
    };
    let document = fs::read_to_string(&config.paths.interfaces_file).ok();
    let current = document.as_deref().and_then(interfaces::current_bridge_port);
    let in_sync = match (&target, &current) {
        (Some(t), Some(c)) => Some(t == c),
        _ => None,
    };
    let backups = count_backups(&config.paths.backup_dir);

    let svc = SystemdController;
    let unit_active = svc.is_active(SERVICE_UNIT);
    let networking_active = svc.is_active(&config.service.networking_unit);

    if json {
        let output = serde_json::json!({
            "controllers": controllers.iter().map(|c| serde_json::json!({
                "slot": c.slot,
                "description": c.description,
                "matches_signature": c.description.contains(&config.device.signature),
            })).collect::<Vec<_>>(),
            "signature": config.device.signature,
            "target": target,
            "configured": current,
            "in_sync": in_sync,
            "interfaces_file": config.paths.interfaces_file.display().to_string(),
            "backups": backups,
            "service": {
                "unit_active": unit_active,
                "networking_active": networking_active,
            },
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!();
    println!("{}{}{}", BOLD, CYAN, "══════════════════════════════════════");
    println!("       nic-rebind v1.2 Status");
    println!("{}{}{}", BOLD, CYAN, "══════════════════════════════════════");
    println!("{}", NC);

    // 1. Service state
    if unit_active {
        println!("{}Boot unit:{}   {}[ACTIVE]{}", BOLD, NC, GREEN, NC);
    } else {
        println!("{}Boot unit:{}   {}[INACTIVE]{}", BOLD, NC, DIM, NC);
    }
    if networking_active {
        println!("{}Networking:{}  {}[ACTIVE]{}", BOLD, NC, GREEN, NC);
    } else {
        println!("{}Networking:{}  {}[INACTIVE]{}", BOLD, NC, RED, NC);
    }
    println!();

    // 2. Detected controllers
    println!("{}{}{}┌─ Ethernet Controllers{}", BOLD, BLUE, NC, NC);
    if controllers.is_empty() {
        println!("{}│{}  {}None detected{}", BLUE, NC, DIM, NC);
    }
    for c in &controllers {
        if c.description.contains(&config.device.signature) {
            println!(
                "{}│{}  {}{}{}  {}  {}[MATCH]{}",
                BLUE, NC, BOLD, c.slot, NC, c.description, GREEN, NC
            );
        } else {
            println!("{}│{}  {}{}  {}{}", BLUE, NC, DIM, c.slot, c.description, NC);
        }
    }
    println!("{}└{}", BLUE, NC);
    println!();

    // 3. Configuration
    println!("{}{}{}┌─ Interfaces File{}", BOLD, BLUE, NC, NC);
    println!(
        "{}│{}  File:       {}",
        BLUE,
        NC,
        config.paths.interfaces_file.display()
    );
    println!(
        "{}│{}  Configured: {}",
        BLUE,
        NC,
        current.as_deref().unwrap_or("none")
    );
    println!(
        "{}│{}  Target:     {}",
        BLUE,
        NC,
        target.as_deref().unwrap_or("unknown")
    );

    let state = match in_sync {
        Some(true) => format!("{}[IN SYNC]{}", GREEN, NC),
        Some(false) => format!("{}[STALE]{} run 'sudo nic-rebind' to fix", YELLOW, NC),
        None => format!("{}[UNKNOWN]{}", DIM, NC),
    };
    println!("{}│{}  State:      {}", BLUE, NC, state);
    println!(
        "{}│{}  Backups:    {} in {}",
        BLUE,
        NC,
        backups,
        config.paths.backup_dir.display()
    );
    println!("{}└{}", BLUE, NC);
    println!();

    Ok(())
}

fn count_backups(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| {
                    e.path()
                        .extension()
                        .map(|ext| ext == "bak")
                        .unwrap_or(false)
                })
                .count()
        })
        .unwrap_or(0)
}

/// Install the boot-time systemd unit
fn run_install() -> Result<()> {
    use std::fs::File;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    info!("=== Installing nic-rebind Service ===\n");

    // Copy binary to a stable path the unit can reference
    let current_exe = std::env::current_exe()?;
    info!("Copying binary to {}", BIN_PATH);
    if let Some(parent) = Path::new(BIN_PATH).parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(&current_exe, BIN_PATH)
        .with_context(|| format!("Failed to copy binary to {}", BIN_PATH))?;

    let mut perms = fs::metadata(BIN_PATH)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(BIN_PATH, perms)?;

    // Oneshot unit that fixes the file before networking comes up
    let service_content = format!(
        r#"[Unit]
Description=Rebind Realtek NIC to its current bus-ordered interface name
DefaultDependencies=no
After=local-fs.target
Before=network-pre.target networking.service
Wants=network-pre.target

[Service]
Type=oneshot
RemainAfterExit=yes
ExecStart={} fix --no-restart

[Install]
WantedBy=multi-user.target
"#,
        BIN_PATH
    );

    info!("Creating systemd service: {}", UNIT_PATH);
    let mut file = File::create(UNIT_PATH)?;
    file.write_all(service_content.as_bytes())?;

    info!("Enabling service...");
    Command::new("systemctl").args(["daemon-reload"]).output()?;
    Command::new("systemctl")
        .args(["enable", SERVICE_UNIT])
        .output()?;

    info!("\n=== Installation Complete ===");
    info!("The fix now runs automatically before networking at boot.");
    info!("  Apply now: sudo nic-rebind");
    info!("  Status:    nic-rebind status");
    info!("  Logs:      journalctl -u nic-rebind");

    Ok(())
}

/// Uninstall the systemd unit
fn run_uninstall() -> Result<()> {
    info!("=== Uninstalling nic-rebind Service ===\n");

    info!("Disabling service...");
    let _ = Command::new("systemctl")
        .args(["stop", SERVICE_UNIT])
        .output();
    let _ = Command::new("systemctl")
        .args(["disable", SERVICE_UNIT])
        .output();

    if Path::new(UNIT_PATH).exists() {
        info!("Removing service file...");
        fs::remove_file(UNIT_PATH)?;
    }

    Command::new("systemctl").args(["daemon-reload"]).output()?;

    if Path::new(BIN_PATH).exists() {
        info!("Removing binary...");
        fs::remove_file(BIN_PATH)?;
    }

    info!("\n=== Uninstallation Complete ===");
    info!("Backups under /etc/network/backup were left in place.");
    Ok(())
}

/// Shortcut to the unit's journal
fn run_logs(follow: bool) -> Result<()> {
    let mut args = vec!["-u", SERVICE_UNIT, "--no-pager"];
    if follow {
        args.push("-f");
    }

    Command::new("journalctl")
        .args(&args)
        .status()
        .context("Failed to execute journalctl")?;
    Ok(())
}

/// Prompt for yes/no confirmation
fn confirm(prompt: &str) -> Result<bool> {
    use std::io::{self, Write};

    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case("y") || input.trim().eq_ignore_ascii_case("yes"))
}
