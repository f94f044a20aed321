//! PCI Ethernet controller enumeration
//!
//! Wraps the `lspci` binary and derives the kernel's predictable
//! interface name (`enp<bus>s0`) from a controller's bus address.

use anyhow::{bail, Context, Result};
use std::process::Command;

/// One Ethernet controller as reported by `lspci`.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerRecord {
    /// Bus address, e.g. "06:00.0".
    pub slot: String,
    /// Human-readable device description.
    pub description: String,
}

/// Narrow capability interface over PCI device enumeration so the
/// rebinder can be exercised against fakes in tests.
pub trait HardwareEnumerator {
    fn ethernet_controllers(&self) -> Result<Vec<ControllerRecord>>;
}

/// Production enumerator invoking `lspci`.
pub struct LspciEnumerator;

impl HardwareEnumerator for LspciEnumerator {
    fn ethernet_controllers(&self) -> Result<Vec<ControllerRecord>> {
        let output = Command::new("lspci")
            .output()
            .context("Failed to execute lspci")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("lspci failed: {}", stderr);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_lspci(&stdout))
    }
}

/// Parse `lspci` output, keeping Ethernet controllers only.
///
/// Lines look like:
/// `06:00.0 Ethernet controller: Realtek ... RTL8111/8168/8411 ... (rev 15)`
fn parse_lspci(output: &str) -> Vec<ControllerRecord> {
    let mut controllers = Vec::new();

    for line in output.lines() {
        let Some((slot, rest)) = line.split_once(' ') else {
            continue;
        };
        let Some((class, description)) = rest.split_once(": ") else {
            continue;
        };
        if class != "Ethernet controller" {
            continue;
        }

        controllers.push(ControllerRecord {
            slot: slot.to_string(),
            description: description.trim().to_string(),
        });
    }

    controllers
}

/// Bus sequence number: the leading hex byte of the slot, leading
/// zeros stripped ("06:00.0" -> 6, "0a:00.0" -> 10).
pub fn bus_sequence_number(slot: &str) -> Result<u32> {
    let bus = slot
        .split(':')
        .next()
        .filter(|s| !s.is_empty())
        .with_context(|| format!("Malformed PCI slot: {:?}", slot))?;

    u32::from_str_radix(bus, 16)
        .with_context(|| format!("Invalid bus component in PCI slot {:?}", slot))
}

/// Predictable interface name for a controller slot.
pub fn interface_name(slot: &str) -> Result<String> {
    Ok(format!("enp{}s0", bus_sequence_number(slot)?))
}
