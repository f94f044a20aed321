//! systemd unit control
//!
//! Thin wrapper around the `systemctl` binary. Kept behind a trait so
//! the CLI can be exercised without a live service manager.

use anyhow::{bail, Context, Result};
use log::info;
use std::process::Command;

pub trait ServiceController {
    fn is_active(&self, unit: &str) -> bool;
    fn restart(&self, unit: &str) -> Result<()>;
}

pub struct SystemdController;

impl ServiceController for SystemdController {
    fn is_active(&self, unit: &str) -> bool {
        Command::new("systemctl")
            .args(["is-active", "--quiet", unit])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn restart(&self, unit: &str) -> Result<()> {
        info!("Restarting {}", unit);

        let output = Command::new("systemctl")
            .args(["restart", unit])
            .output()
            .context("Failed to execute systemctl")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("systemctl restart {} failed: {}", unit, stderr);
        }

        Ok(())
    }
}
