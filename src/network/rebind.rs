//! Interface rebinder
//!
//! Detects the target controller, derives its bus-ordered interface
//! name, and brings the interfaces file in line with it: back up,
//! rewrite, verify, then atomically replace. Fatal errors never leave
//! the file partially written.

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use log::{info, warn};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::config::structs::{DeviceConfig, PathsConfig};
use crate::network::interfaces::{self, Rewrite};
use crate::network::pci::{self, ControllerRecord, HardwareEnumerator};

/// Fatal rebind failures. Non-fatal conditions (missing document,
/// failed backup) are logged and the run continues.
#[derive(Debug, Error)]
pub enum RebindError {
    #[error("no Ethernet controller matching \"{signature}\" found")]
    ControllerNotFound { signature: String },

    #[error("rewritten configuration does not name {target}; original file left untouched")]
    VerificationFailed { target: String },
}

/// What a completed run did to the interfaces file.
#[derive(Debug, Clone, PartialEq)]
pub enum RebindAction {
    /// The file was rewritten and replaced. `previous` is the stale
    /// bridge-ports name, when one was found.
    Rewritten { previous: Option<String> },
    /// The bridge port already carried the target name.
    AlreadyCurrent,
    /// The interfaces file does not exist; nothing to rewrite.
    NoConfig,
}

#[derive(Debug)]
pub struct RebindReport {
    /// Interface name in effect after the run.
    pub interface: String,
    pub action: RebindAction,
    /// Backup written this run, if any.
    pub backup: Option<PathBuf>,
}

/// Read-only view used by `--dry-run` and `status`.
#[derive(Debug)]
pub struct RebindPreview {
    pub controller: ControllerRecord,
    pub target: String,
    /// Name currently on the bridge-ports line, if the file exists
    /// and carries one.
    pub current: Option<String>,
    pub config_exists: bool,
    pub would_change: bool,
}

pub struct Rebinder<'a> {
    device: DeviceConfig,
    paths: PathsConfig,
    enumerator: &'a dyn HardwareEnumerator,
}

impl<'a> Rebinder<'a> {
    pub fn new(
        device: DeviceConfig,
        paths: PathsConfig,
        enumerator: &'a dyn HardwareEnumerator,
    ) -> Self {
        Self {
            device,
            paths,
            enumerator,
        }
    }

    /// Find the authoritative controller and its target name.
    ///
    /// Multiple matches are allowed; the first in enumeration order
    /// wins, matching the kernel's own ordering.
    fn resolve_target(&self) -> Result<(ControllerRecord, String)> {
        let controllers = self.enumerator.ethernet_controllers()?;
        let mut matched: Vec<ControllerRecord> = controllers
            .into_iter()
            .filter(|c| c.description.contains(&self.device.signature))
            .collect();

        if matched.is_empty() {
            return Err(RebindError::ControllerNotFound {
                signature: self.device.signature.clone(),
            }
            .into());
        }
        if matched.len() > 1 {
            warn!(
                "{} controllers match \"{}\"; using the first ({})",
                matched.len(),
                self.device.signature,
                matched[0].slot
            );
        }

        let controller = matched.remove(0);
        let target = pci::interface_name(&controller.slot)?;
        Ok((controller, target))
    }

    /// Detection and planning only; no filesystem writes.
    pub fn preview(&self) -> Result<RebindPreview> {
        let (controller, target) = self.resolve_target()?;

        match fs::read_to_string(&self.paths.interfaces_file) {
            Ok(document) => {
                let current = interfaces::current_bridge_port(&document);
                let would_change = match interfaces::plan_rewrite(&document, &target) {
                    Rewrite::AlreadyCurrent => false,
                    Rewrite::Renamed { .. } => true,
                    Rewrite::Fallback { occurrences, .. } => occurrences > 0,
                };
                Ok(RebindPreview {
                    controller,
                    target,
                    current,
                    config_exists: true,
                    would_change,
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(RebindPreview {
                controller,
                target,
                current: None,
                config_exists: false,
                would_change: false,
            }),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to read {}", self.paths.interfaces_file.display())
            }),
        }
    }

    /// Execute the fix. Deterministic for a given hardware state and
    /// file content; re-running after a successful fix is a no-op.
    pub fn run(&self) -> Result<RebindReport> {
        let (controller, target) = self.resolve_target()?;
        info!(
            "Controller {} ({}) maps to {}",
            controller.slot, controller.description, target
        );

        let document = match fs::read_to_string(&self.paths.interfaces_file) {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(
                    "{} does not exist; nothing to rewrite",
                    self.paths.interfaces_file.display()
                );
                return Ok(RebindReport {
                    interface: target,
                    action: RebindAction::NoConfig,
                    backup: None,
                });
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read {}", self.paths.interfaces_file.display())
                })
            }
        };

        // Backup before any mutation. Losing the backup never blocks
        // the fix.
        let backup = match self.create_backup(&document) {
            Ok(path) => {
                info!("Backup written to {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Failed to write backup: {:#}", e);
                None
            }
        };

        let (previous, rewritten) = match interfaces::plan_rewrite(&document, &target) {
            Rewrite::AlreadyCurrent => {
                info!(
                    "{} already names {}; nothing to do",
                    self.paths.interfaces_file.display(),
                    target
                );
                return Ok(RebindReport {
                    interface: target,
                    action: RebindAction::AlreadyCurrent,
                    backup,
                });
            }
            Rewrite::Renamed { previous, document } => {
                info!("Renaming {} -> {}", previous, target);
                (Some(previous), document)
            }
            Rewrite::Fallback {
                occurrences,
                document,
            } => {
                warn!(
                    "No bridge-ports name found; generic pattern rewrite touched {} occurrence(s)",
                    occurrences
                );
                (None, document)
            }
        };

        if !interfaces::contains_target(&rewritten, &target) {
            return Err(RebindError::VerificationFailed { target }.into());
        }

        self.commit(&rewritten)?;
        info!(
            "{} updated to {}",
            self.paths.interfaces_file.display(),
            target
        );

        Ok(RebindReport {
            interface: target,
            action: RebindAction::Rewritten { previous },
            backup,
        })
    }

    /// Verbatim timestamped copy plus a JSON sidecar recording the
    /// checksum, so a later restore can check the copy. Backups are
    /// never deleted automatically.
    fn create_backup(&self, contents: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.paths.backup_dir).with_context(|| {
            format!(
                "Failed to create backup directory {}",
                self.paths.backup_dir.display()
            )
        })?;

        let file_name = format!("interfaces.{}.bak", Local::now().format("%Y%m%d-%H%M%S"));
        let path = self.paths.backup_dir.join(&file_name);
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write backup {}", path.display()))?;

        let digest = Sha256::digest(contents.as_bytes());
        let meta = serde_json::json!({
            "created": Utc::now().to_rfc3339(),
            "source": self.paths.interfaces_file.display().to_string(),
            "sha256": format!("{:x}", digest),
            "size": contents.len(),
        });
        let meta_path = self.paths.backup_dir.join(format!("{}.json", file_name));
        if let Err(e) = fs::write(&meta_path, serde_json::to_string_pretty(&meta)?) {
            warn!("Failed to write backup metadata: {}", e);
        }

        Ok(path)
    }

    /// Write to a temp file in the same directory, carry the original
    /// mode across, then rename into place. A crash mid-write cannot
    /// corrupt the configuration.
    fn commit(&self, contents: &str) -> Result<()> {
        let path = &self.paths.interfaces_file;
        let dir = path
            .parent()
            .context("Interfaces file has no parent directory")?;

        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(contents.as_bytes())
            .context("Failed to write rewritten configuration")?;
        tmp.flush()?;

        if let Ok(meta) = fs::metadata(path) {
            let _ = fs::set_permissions(tmp.path(), meta.permissions());
        }

        tmp.persist(path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    struct FakeEnumerator {
        controllers: Vec<ControllerRecord>,
    }

    impl HardwareEnumerator for FakeEnumerator {
        fn ethernet_controllers(&self) -> Result<Vec<ControllerRecord>> {
            Ok(self.controllers.clone())
        }
    }

    const REALTEK: &str =
        "Realtek Semiconductor Co., Ltd. RTL8111/8168/8211/8411 PCI Express Gigabit Ethernet Controller (rev 15)";

    const DOC: &str = "\
auto lo
iface lo inet loopback

auto vmbr0
iface vmbr0 inet static
        address 192.168.1.10/24
        bridge-ports enp3s0
        bridge-stp off
";

    fn realtek_at(slot: &str) -> FakeEnumerator {
        FakeEnumerator {
            controllers: vec![ControllerRecord {
                slot: slot.to_string(),
                description: REALTEK.to_string(),
            }],
        }
    }

    fn paths_in(dir: &Path) -> PathsConfig {
        PathsConfig {
            interfaces_file: dir.join("interfaces"),
            backup_dir: dir.join("backup"),
        }
    }

    fn backups_in(dir: &Path) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().map(|x| x == "bak").unwrap_or(false))
            .collect();
        found.sort();
        found
    }

    #[test]
    fn test_rewrites_stale_bridge_port() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = paths_in(tmp.path());
        fs::write(&paths.interfaces_file, DOC).unwrap();

        let enumerator = realtek_at("06:00.0");
        let rebinder = Rebinder::new(DeviceConfig::default(), paths.clone(), &enumerator);
        let report = rebinder.run().unwrap();

        assert_eq!(report.interface, "enp6s0");
        assert_eq!(
            report.action,
            RebindAction::Rewritten {
                previous: Some("enp3s0".to_string())
            }
        );

        let updated = fs::read_to_string(&paths.interfaces_file).unwrap();
        assert!(updated.contains("        bridge-ports enp6s0"));
        assert!(!updated.contains("enp3s0"));

        // Exactly one backup holding the pre-run content
        let backups = backups_in(&paths.backup_dir);
        assert_eq!(backups.len(), 1);
        assert_eq!(fs::read_to_string(&backups[0]).unwrap(), DOC);
        assert_eq!(report.backup.as_deref(), Some(backups[0].as_path()));
    }

    #[test]
    fn test_backup_metadata_records_checksum() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = paths_in(tmp.path());
        fs::write(&paths.interfaces_file, DOC).unwrap();

        let enumerator = realtek_at("06:00.0");
        let rebinder = Rebinder::new(DeviceConfig::default(), paths.clone(), &enumerator);
        let report = rebinder.run().unwrap();

        let backup = report.backup.unwrap();
        let meta_path = backup
            .parent()
            .unwrap()
            .join(format!("{}.json", backup.file_name().unwrap().to_string_lossy()));
        let meta: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(meta_path).unwrap()).unwrap();

        let expected = format!("{:x}", Sha256::digest(DOC.as_bytes()));
        assert_eq!(meta["sha256"], expected.as_str());
        assert_eq!(meta["size"], DOC.len());
    }

    #[test]
    fn test_second_run_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = paths_in(tmp.path());
        fs::write(&paths.interfaces_file, DOC).unwrap();

        let enumerator = realtek_at("06:00.0");
        let rebinder = Rebinder::new(DeviceConfig::default(), paths.clone(), &enumerator);

        rebinder.run().unwrap();
        let after_first = fs::read_to_string(&paths.interfaces_file).unwrap();

        let report = rebinder.run().unwrap();
        assert_eq!(report.interface, "enp6s0");
        assert_eq!(report.action, RebindAction::AlreadyCurrent);
        assert_eq!(
            fs::read_to_string(&paths.interfaces_file).unwrap(),
            after_first
        );
    }

    #[test]
    fn test_no_matching_controller_touches_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = paths_in(tmp.path());
        fs::write(&paths.interfaces_file, DOC).unwrap();

        let enumerator = FakeEnumerator {
            controllers: vec![ControllerRecord {
                slot: "00:1f.6".to_string(),
                description: "Intel Corporation Ethernet Connection (17) I219-V".to_string(),
            }],
        };
        let rebinder = Rebinder::new(DeviceConfig::default(), paths.clone(), &enumerator);

        let err = rebinder.run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RebindError>(),
            Some(RebindError::ControllerNotFound { .. })
        ));

        assert_eq!(fs::read_to_string(&paths.interfaces_file).unwrap(), DOC);
        assert!(!paths.backup_dir.exists());
    }

    #[test]
    fn test_missing_config_is_nonfatal() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = paths_in(tmp.path());

        let enumerator = realtek_at("06:00.0");
        let rebinder = Rebinder::new(DeviceConfig::default(), paths.clone(), &enumerator);
        let report = rebinder.run().unwrap();

        assert_eq!(report.interface, "enp6s0");
        assert_eq!(report.action, RebindAction::NoConfig);
        assert!(report.backup.is_none());
        assert!(!paths.backup_dir.exists());
    }

    #[test]
    fn test_verification_gate_preserves_original() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = paths_in(tmp.path());
        // Nothing matches the name pattern, so the rewrite cannot
        // produce the target and must be discarded.
        let doc = "auto lo\niface lo inet loopback\n";
        fs::write(&paths.interfaces_file, doc).unwrap();

        let enumerator = realtek_at("06:00.0");
        let rebinder = Rebinder::new(DeviceConfig::default(), paths.clone(), &enumerator);

        let err = rebinder.run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RebindError>(),
            Some(RebindError::VerificationFailed { .. })
        ));
        assert_eq!(fs::read_to_string(&paths.interfaces_file).unwrap(), doc);
    }

    #[test]
    fn test_first_matching_controller_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = paths_in(tmp.path());
        fs::write(&paths.interfaces_file, DOC).unwrap();

        let enumerator = FakeEnumerator {
            controllers: vec![
                ControllerRecord {
                    slot: "05:00.0".to_string(),
                    description: REALTEK.to_string(),
                },
                ControllerRecord {
                    slot: "06:00.0".to_string(),
                    description: REALTEK.to_string(),
                },
            ],
        };
        let rebinder = Rebinder::new(DeviceConfig::default(), paths, &enumerator);
        let report = rebinder.run().unwrap();
        assert_eq!(report.interface, "enp5s0");
    }

    #[test]
    fn test_preview_makes_no_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = paths_in(tmp.path());
        fs::write(&paths.interfaces_file, DOC).unwrap();

        let enumerator = realtek_at("06:00.0");
        let rebinder = Rebinder::new(DeviceConfig::default(), paths.clone(), &enumerator);
        let preview = rebinder.preview().unwrap();

        assert_eq!(preview.target, "enp6s0");
        assert_eq!(preview.current.as_deref(), Some("enp3s0"));
        assert!(preview.config_exists);
        assert!(preview.would_change);

        assert_eq!(fs::read_to_string(&paths.interfaces_file).unwrap(), DOC);
        assert!(!paths.backup_dir.exists());
    }

    #[test]
    fn test_preview_when_already_current() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = paths_in(tmp.path());
        fs::write(&paths.interfaces_file, DOC.replace("enp3s0", "enp6s0")).unwrap();

        let enumerator = realtek_at("06:00.0");
        let rebinder = Rebinder::new(DeviceConfig::default(), paths, &enumerator);
        let preview = rebinder.preview().unwrap();

        assert_eq!(preview.current.as_deref(), Some("enp6s0"));
        assert!(!preview.would_change);
    }
}
