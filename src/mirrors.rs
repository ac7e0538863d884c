use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One line of the curated mirror list, e.g.
/// `Germany, Frankfurt - https://mirror.example.de/mx`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CuratedMirror {
    pub description: String,
    pub country: String,
    /// Base URL written into the distro list when this mirror is chosen.
    pub url: String,
    /// Everything after the first dash; handed to the latency probe.
    pub probe_url: String,
}

impl CuratedMirror {
    pub fn parse(line: &str) -> Self {
        let country = line
            .split('-')
            .next()
            .unwrap_or_default()
            .trim()
            .split(',')
            .next()
            .unwrap_or_default()
            .to_string();

        let url = line.split(" - ").nth(1).unwrap_or_default().trim().to_string();

        // URLs may themselves contain dashes, so rejoin the tail
        let probe_url = match line.split_once('-') {
            Some((_, rest)) => rest.trim().to_string(),
            None => String::new(),
        };

        Self {
            description: line.to_string(),
            country,
            url,
            probe_url,
        }
    }

    pub fn matches(&self, filter: &str) -> bool {
        filter.is_empty()
            || self
                .description
                .to_lowercase()
                .contains(&filter.to_lowercase())
    }

    pub fn is_current(&self, host: &str) -> bool {
        !host.is_empty() && self.description.contains(host)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorList {
    mirrors: Vec<CuratedMirror>,
}

impl MirrorList {
    /// A missing list is not fatal; the distro just has nothing to offer.
    pub fn read(path: &Path) -> Self {
        match std::fs::read(path) {
            Ok(bytes) => Self::parse(&String::from_utf8_lossy(&bytes)),
            Err(e) => {
                warn!("Could not open file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Self {
        let mut lines: Vec<&str> = content.trim().split('\n').collect();
        lines.sort();

        let mirrors: Vec<CuratedMirror> = lines
            .into_iter()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.starts_with('#') && !l.trim().is_empty())
            .map(CuratedMirror::parse)
            .collect();

        debug!("Loaded {} curated mirrors", mirrors.len());
        Self { mirrors }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CuratedMirror> {
        self.mirrors.iter()
    }

    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    pub fn filter(&self, text: &str) -> Vec<&CuratedMirror> {
        self.mirrors.iter().filter(|m| m.matches(text)).collect()
    }

    pub fn probe_targets(&self) -> Vec<String> {
        self.mirrors
            .iter()
            .filter(|m| !m.probe_url.is_empty())
            .map(|m| m.probe_url.clone())
            .collect()
    }

    /// The last entry containing `text`, mirroring how a radio list ends
    /// up with the final match checked.
    pub fn find_containing(&self, text: &str) -> Option<&CuratedMirror> {
        if text.is_empty() {
            return None;
        }
        self.mirrors.iter().rev().find(|m| m.description.contains(text))
    }

    pub fn current(&self, host: &str) -> Option<&CuratedMirror> {
        self.mirrors.iter().rev().find(|m| m.is_current(host))
    }
}

/// Host of the distro repository currently configured in `distro_list`.
pub fn current_host(distro_list: &Path, repo_path: &str) -> String {
    let content = match std::fs::read(distro_list) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            debug!("Could not read {:?}: {}", distro_list, e);
            return String::new();
        }
    };
    let marker = format!("{} ", repo_path);
    content
        .lines()
        .find(|l| l.starts_with("deb") && l.contains(&marker))
        .map(|l| cut_field(&cut_field(l, ' ', 2), '/', 3))
        .unwrap_or_default()
}

/// `cut -d<delim> -f<n>`: a line without the delimiter passes through whole.
pub(crate) fn cut_field(line: &str, delim: char, n: usize) -> String {
    if !line.contains(delim) {
        return line.to_string();
    }
    line.split(delim)
        .nth(n.saturating_sub(1))
        .unwrap_or_default()
        .to_string()
}
