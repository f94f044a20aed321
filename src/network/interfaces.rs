//! Line-oriented rewriting of the ifupdown interfaces document
//!
//! Pure text transformations only; all file I/O lives in the rebinder.

use regex::Regex;
use std::sync::OnceLock;

/// Shape of a predictable PCIe Ethernet interface name.
const NAME_PATTERN: &str = r"enp[0-9]+s0";

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(NAME_PATTERN).unwrap())
}

/// The planned change for one document, decided before anything is
/// written back.
#[derive(Debug, PartialEq)]
pub enum Rewrite {
    /// The bridge port already carries the target name.
    AlreadyCurrent,
    /// A stale name was found on a bridge-ports line; every occurrence
    /// of that exact name was substituted document-wide.
    Renamed { previous: String, document: String },
    /// No bridge-ports name found; every occurrence of the generic
    /// pattern was substituted instead. With zero occurrences the
    /// document comes back unchanged and verification fails upstream.
    Fallback { occurrences: usize, document: String },
}

/// Find the interface name currently enslaved via a `bridge-ports`
/// declaration. First match wins.
pub fn current_bridge_port(document: &str) -> Option<String> {
    document
        .lines()
        .filter(|line| line.trim_start().starts_with("bridge-ports"))
        .find_map(|line| name_regex().find(line))
        .map(|m| m.as_str().to_string())
}

/// Decide how to bring `document` in line with `target`.
pub fn plan_rewrite(document: &str, target: &str) -> Rewrite {
    match current_bridge_port(document) {
        Some(existing) if existing == target => Rewrite::AlreadyCurrent,
        Some(existing) => {
            let rewritten = document.replace(&existing, target);
            Rewrite::Renamed {
                previous: existing,
                document: rewritten,
            }
        }
        None => {
            let occurrences = name_regex().find_iter(document).count();
            let rewritten = name_regex().replace_all(document, target).into_owned();
            Rewrite::Fallback {
                occurrences,
                document: rewritten,
            }
        }
    }
}

/// The rewrite is only committed if the result still names the target.
pub fn contains_target(document: &str, target: &str) -> bool {
    document.contains(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "\
auto lo
iface lo inet loopback

auto vmbr0
iface vmbr0 inet static
        address 192.168.1.10/24
        gateway 192.168.1.1
        bridge-ports enp3s0
        bridge-stp off
        bridge-fd 0
";

    #[test]
    fn test_current_bridge_port() {
        assert_eq!(current_bridge_port(DOC), Some("enp3s0".to_string()));
        assert_eq!(current_bridge_port("auto lo\n"), None);
    }

    #[test]
    fn test_bridge_port_ignores_names_outside_bridge_ports() {
        let doc = "iface enp3s0 inet manual\n";
        assert_eq!(current_bridge_port(doc), None);
    }

    #[test]
    fn test_rename_replaces_every_occurrence() {
        let doc = format!("{}\niface enp3s0 inet manual\n", DOC);
        let plan = plan_rewrite(&doc, "enp6s0");
        match plan {
            Rewrite::Renamed { previous, document } => {
                assert_eq!(previous, "enp3s0");
                assert!(document.contains("bridge-ports enp6s0"));
                assert!(document.contains("iface enp6s0 inet manual"));
                assert!(!document.contains("enp3s0"));
            }
            other => panic!("expected rename, got {:?}", other),
        }
    }

    #[test]
    fn test_already_current_is_a_noop() {
        let doc = DOC.replace("enp3s0", "enp6s0");
        assert_eq!(plan_rewrite(&doc, "enp6s0"), Rewrite::AlreadyCurrent);
    }

    #[test]
    fn test_fallback_rewrites_generic_pattern() {
        // Name present but not on a bridge-ports line
        let doc = "auto enp2s0\niface enp2s0 inet dhcp\n";
        let plan = plan_rewrite(doc, "enp6s0");
        match plan {
            Rewrite::Fallback { occurrences, document } => {
                assert_eq!(occurrences, 2);
                assert_eq!(document, "auto enp6s0\niface enp6s0 inet dhcp\n");
            }
            other => panic!("expected fallback, got {:?}", other),
        }
    }

    #[test]
    fn test_fallback_with_no_matches_leaves_document_unchanged() {
        let doc = "auto lo\niface lo inet loopback\n";
        let plan = plan_rewrite(doc, "enp6s0");
        match plan {
            Rewrite::Fallback { occurrences, document } => {
                assert_eq!(occurrences, 0);
                assert_eq!(document, doc);
                assert!(!contains_target(&document, "enp6s0"));
            }
            other => panic!("expected fallback, got {:?}", other),
        }
    }

    #[test]
    fn test_contains_target() {
        assert!(contains_target(DOC, "enp3s0"));
        assert!(!contains_target(DOC, "enp6s0"));
    }
}
