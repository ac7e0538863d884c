use crate::config::Config;
use crate::error::{RepomanError, RepomanResult};
use log::{debug, warn};
use std::path::Path;

const CODENAMES: [(u32, &str); 6] = [
    (8, "jessie"),
    (9, "stretch"),
    (10, "buster"),
    (11, "bullseye"),
    (12, "bookworm"),
    (13, "trixie"),
];

/// Major Debian release from `/etc/debian_version`, 0 when unknown.
///
/// Stable releases carry a number (`12.5`); testing/sid carry
/// `codename/sid`, which is mapped back for the codenames we know.
pub fn debian_version_number(path: &Path) -> u32 {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Could not read {:?}: {}", path, e);
            return 0;
        }
    };
    parse_debian_version(content.trim())
}

pub fn parse_debian_version(text: &str) -> u32 {
    let major = text.split('.').next().unwrap_or_default();
    if let Ok(n) = major.parse::<u32>() {
        return n;
    }
    let name = major.split('/').next().unwrap_or_default();
    match name {
        "bullseye" | "bookworm" | "trixie" => CODENAMES
            .iter()
            .find(|(_, c)| *c == name)
            .map(|(n, _)| *n)
            .unwrap_or(0),
        _ => 0,
    }
}

pub fn debian_codename(version: u32) -> RepomanResult<&'static str> {
    CODENAMES
        .iter()
        .find(|(n, _)| *n == version)
        .map(|(_, c)| *c)
        .ok_or_else(|| RepomanError::UnknownRelease(format!("Debian version {}", version)))
}

/// Two leading digits of `DISTRIB_RELEASE` in `/etc/lsb-release`.
pub fn mx_version(lsb_release: &Path) -> RepomanResult<u32> {
    let content = std::fs::read_to_string(lsb_release)?;
    parse_mx_version(&content)
}

pub fn parse_mx_version(lsb_release: &str) -> RepomanResult<u32> {
    let value = lsb_release
        .lines()
        .find_map(|l| l.split_once("DISTRIB_RELEASE=").map(|(_, v)| v))
        .ok_or_else(|| RepomanError::SystemIncompatible("DISTRIB_RELEASE not set".to_string()))?;
    let head: String = value.trim().chars().take(2).collect();
    debug!("DISTRIB_RELEASE={} -> {}", value.trim(), head);
    Ok(head.parse::<u32>()?)
}

pub fn is_antix(config: &Config) -> bool {
    config.antix_version_file.exists()
}

pub fn is_antix_or_mx(config: &Config) -> bool {
    config.antix_version_file.exists() || config.mx_version_file.exists()
}

pub fn is_64bit() -> bool {
    std::env::consts::ARCH == "x86_64"
}
