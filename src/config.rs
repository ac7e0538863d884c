use crate::{
    error::{RepomanError, RepomanResult},
    REPOMAN_CONFIG,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_apt_dir")]
    pub apt_dir: PathBuf,

    #[serde(default = "default_sources_list")]
    pub sources_list: PathBuf,

    #[serde(default = "default_curated_list")]
    pub curated_list: PathBuf,

    #[serde(default = "default_debian_version_file")]
    pub debian_version_file: PathBuf,

    #[serde(default = "default_lsb_release_file")]
    pub lsb_release_file: PathBuf,

    #[serde(default = "default_antix_version_file")]
    pub antix_version_file: PathBuf,

    #[serde(default = "default_mx_version_file")]
    pub mx_version_file: PathBuf,

    #[serde(default)]
    pub distro: DistroRepoConfig,

    #[serde(default)]
    pub debian: DebianRepoConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default = "default_restore_url_base")]
    pub restore_url_base: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_https_proxy")]
    pub https_proxy: Option<String>,
}

/// The distribution's own repository, rewritten when a curated mirror is picked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistroRepoConfig {
    #[serde(default = "default_distro_list")]
    pub list_file: String,

    /// Older releases carried a second list; rewritten only when present.
    #[serde(default = "default_distro_legacy_lists")]
    pub legacy_list_files: Vec<String>,

    #[serde(default = "default_repo_path")]
    pub repo_path: String,

    #[serde(default = "default_test_repo_path")]
    pub test_repo_path: String,

    #[serde(default = "default_antix_list")]
    pub antix_list_file: String,

    #[serde(default = "default_primary_mirror")]
    pub primary_mirror: String,

    #[serde(default = "default_primary_antix_mirror")]
    pub primary_antix_mirror: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebianRepoConfig {
    #[serde(default = "default_debian_lists")]
    pub list_files: Vec<String>,

    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,

    #[serde(default = "default_redirector")]
    pub redirector: String,

    #[serde(default = "default_security_legacy")]
    pub security_legacy: String,

    #[serde(default = "default_security_redirector")]
    pub security_redirector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_netselect")]
    pub netselect: String,

    #[serde(default = "default_netselect_apt")]
    pub netselect_apt: String,

    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,

    #[serde(default = "default_halt_grace_seconds")]
    pub halt_grace_seconds: u64,
}

impl Config {
    pub fn load(config_path: Option<&str>) -> RepomanResult<Self> {
        let config_path = if let Some(path) = config_path {
            PathBuf::from(path)
        } else {
            REPOMAN_CONFIG.join("repoman.toml")
        };

        if config_path.exists() && config_path.is_file() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content).map_err(|e| {
                RepomanError::ConfigError(format!("{}: {}", config_path.display(), e))
            })?;
            Ok(config)
        } else {
            let config = Config::default();
            // first run as an unprivileged user may not be able to write here
            if let Err(e) = config.save(&config_path) {
                log::debug!("Could not write default config to {:?}: {}", config_path, e);
            }
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> RepomanResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Config rooted at `root`: every system path is rebased under it.
    pub fn rooted_at(root: &Path) -> Self {
        let rebase = |p: PathBuf| root.join(p.strip_prefix("/").unwrap_or(&p));
        Self {
            apt_dir: rebase(default_apt_dir()),
            sources_list: rebase(default_sources_list()),
            curated_list: rebase(default_curated_list()),
            debian_version_file: rebase(default_debian_version_file()),
            lsb_release_file: rebase(default_lsb_release_file()),
            antix_version_file: rebase(default_antix_version_file()),
            mx_version_file: rebase(default_mx_version_file()),
            ..Self::default()
        }
    }

    pub fn distro_list_path(&self) -> PathBuf {
        self.apt_dir.join(&self.distro.list_file)
    }

    pub fn antix_list_path(&self) -> PathBuf {
        self.apt_dir.join(&self.distro.antix_list_file)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.apt_dir.join(&self.debian.backup_dir)
    }

    /// `sources.list` lives one level up; everything else in `sources.list.d`.
    pub fn resolve_source_file(&self, name: &str) -> PathBuf {
        let main_name = self
            .sources_list
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sources.list".to_string());
        if name == main_name {
            self.sources_list.clone()
        } else {
            self.apt_dir.join(name)
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe.timeout_seconds)
    }
}

impl DistroRepoConfig {
    /// Only the last path segment (`/repo/ `) identifies a distro line.
    pub fn repo_marker(&self) -> String {
        tail_segment(&self.repo_path)
    }

    pub fn test_repo_marker(&self) -> String {
        tail_segment(&self.test_repo_path)
    }
}

fn tail_segment(path: &str) -> String {
    let segment = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    format!("/{}/", segment)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            apt_dir: default_apt_dir(),
            sources_list: default_sources_list(),
            curated_list: default_curated_list(),
            debian_version_file: default_debian_version_file(),
            lsb_release_file: default_lsb_release_file(),
            antix_version_file: default_antix_version_file(),
            mx_version_file: default_mx_version_file(),
            distro: DistroRepoConfig::default(),
            debian: DebianRepoConfig::default(),
            probe: ProbeConfig::default(),
            restore_url_base: default_restore_url_base(),
            user_agent: default_user_agent(),
            https_proxy: default_https_proxy(),
        }
    }
}

impl Default for DistroRepoConfig {
    fn default() -> Self {
        Self {
            list_file: default_distro_list(),
            legacy_list_files: default_distro_legacy_lists(),
            repo_path: default_repo_path(),
            test_repo_path: default_test_repo_path(),
            antix_list_file: default_antix_list(),
            primary_mirror: default_primary_mirror(),
            primary_antix_mirror: default_primary_antix_mirror(),
        }
    }
}

impl Default for DebianRepoConfig {
    fn default() -> Self {
        Self {
            list_files: default_debian_lists(),
            backup_dir: default_backup_dir(),
            redirector: default_redirector(),
            security_legacy: default_security_legacy(),
            security_redirector: default_security_redirector(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_probe_timeout_seconds(),
            netselect: default_netselect(),
            netselect_apt: default_netselect_apt(),
            max_concurrent_probes: default_max_concurrent_probes(),
            halt_grace_seconds: default_halt_grace_seconds(),
        }
    }
}

fn default_apt_dir() -> PathBuf {
    PathBuf::from("/etc/apt/sources.list.d")
}

fn default_sources_list() -> PathBuf {
    PathBuf::from("/etc/apt/sources.list")
}

fn default_curated_list() -> PathBuf {
    PathBuf::from("/usr/share/mx-repo-list/repos.txt")
}

fn default_debian_version_file() -> PathBuf {
    PathBuf::from("/etc/debian_version")
}

fn default_lsb_release_file() -> PathBuf {
    PathBuf::from("/etc/lsb-release")
}

fn default_antix_version_file() -> PathBuf {
    PathBuf::from("/etc/antix-version")
}

fn default_mx_version_file() -> PathBuf {
    PathBuf::from("/etc/mx-version")
}

fn default_distro_list() -> String {
    "mx.list".to_string()
}

fn default_distro_legacy_lists() -> Vec<String> {
    vec!["mx16.list".to_string()]
}

fn default_repo_path() -> String {
    "/mx/repo/".to_string()
}

fn default_test_repo_path() -> String {
    "/mx/testrepo/".to_string()
}

fn default_antix_list() -> String {
    "antix.list".to_string()
}

fn default_primary_mirror() -> String {
    "http://mxrepo.com".to_string()
}

fn default_primary_antix_mirror() -> String {
    "http://la.mxrepo.com".to_string()
}

fn default_debian_lists() -> Vec<String> {
    vec![
        "debian.list".to_string(),
        "debian-stable-updates.list".to_string(),
    ]
}

fn default_backup_dir() -> String {
    "backups".to_string()
}

fn default_redirector() -> String {
    "https://deb.debian.org/debian/".to_string()
}

fn default_security_legacy() -> String {
    "http://security.debian.org/".to_string()
}

fn default_security_redirector() -> String {
    "https://deb.debian.org/debian-security/".to_string()
}

fn default_probe_timeout_seconds() -> u64 {
    5
}

fn default_netselect() -> String {
    "netselect".to_string()
}

fn default_netselect_apt() -> String {
    "netselect-apt".to_string()
}

fn default_max_concurrent_probes() -> usize {
    10
}

fn default_halt_grace_seconds() -> u64 {
    5
}

fn default_restore_url_base() -> String {
    "https://codeload.github.com/MX-Linux".to_string()
}

fn default_user_agent() -> String {
    format!("repoman/{} (linux-gnu)", crate::REPOMAN_VERSION)
}

fn default_https_proxy() -> Option<String> {
    std::env::var("HTTPS_PROXY").ok()
}
