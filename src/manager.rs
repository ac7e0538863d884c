use crate::config::Config;
use crate::error::{RepomanError, RepomanResult};
use crate::mirrors::{self, CuratedMirror, MirrorList};
use crate::probe::{self, MirrorProbe, MirrorTestResult};
use crate::release;
use crate::restore::{RestoreReport, SourceRestorer};
use crate::rewrite::{self, SourceRewriter};
use crate::shell::Cmd;
use crate::sources::{self, AptFile, ChangeQueue, PendingChange};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ToggleOutcome {
    pub change: Option<PendingChange>,
    /// The user just enabled the distro's test repository.
    pub test_repo_warning: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitSummary {
    pub applied: usize,
    pub mirror: Option<String>,
}

/// One editing session over the system's APT sources.
///
/// Toggles and the mirror selection are kept in memory until [`commit`];
/// the fastest-mirror and restore operations write through immediately.
///
/// [`commit`]: RepoManager::commit
pub struct RepoManager {
    config: Config,
    cmd: Cmd,
    mirrors: MirrorList,
    current_host: String,
    files: Vec<AptFile>,
    queue: ChangeQueue,
    selected: Option<CuratedMirror>,
}

impl RepoManager {
    pub fn new(config: Config) -> RepomanResult<Self> {
        let cmd = Cmd::new().with_halt_grace(Duration::from_secs(config.probe.halt_grace_seconds));
        let mut manager = Self {
            config,
            cmd,
            mirrors: MirrorList::default(),
            current_host: String::new(),
            files: Vec::new(),
            queue: ChangeQueue::new(),
            selected: None,
        };
        manager.refresh()?;
        Ok(manager)
    }

    /// Swap in a runner carrying a listener; clones share the running child.
    pub fn with_cmd(mut self, cmd: Cmd) -> Self {
        self.cmd = cmd;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn shell(&self) -> &Cmd {
        &self.cmd
    }

    pub fn mirrors(&self) -> &MirrorList {
        &self.mirrors
    }

    pub fn current_host(&self) -> &str {
        &self.current_host
    }

    pub fn current_mirror(&self) -> Option<&CuratedMirror> {
        self.mirrors.current(&self.current_host)
    }

    pub fn files(&self) -> &[AptFile] {
        &self.files
    }

    pub fn file(&self, name: &str) -> Option<&AptFile> {
        self.files.iter().find(|f| f.name == name)
    }

    pub fn pending(&self) -> &ChangeQueue {
        &self.queue
    }

    pub fn selected(&self) -> Option<&CuratedMirror> {
        self.selected.as_ref()
    }

    pub fn refresh(&mut self) -> RepomanResult<()> {
        self.current_host = mirrors::current_host(
            &self.config.distro_list_path(),
            &self.config.distro.repo_marker(),
        );
        self.mirrors = MirrorList::read(&self.config.curated_list);
        self.files = sources::scan(&self.config)?;
        debug!(
            "Refreshed: host {:?}, {} mirrors, {} source files",
            self.current_host,
            self.mirrors.len(),
            self.files.len()
        );
        Ok(())
    }

    pub fn toggle(&mut self, file_name: &str, index: usize, enable: bool) -> RepomanResult<ToggleOutcome> {
        let test_repo_path = self.config.distro.test_repo_path.clone();
        let file = self
            .files
            .iter_mut()
            .find(|f| f.name == file_name)
            .ok_or_else(|| RepomanError::SourceFileNotFound(file_name.to_string()))?;

        let change = sources::toggle(file, index, enable)?;
        let test_repo_warning = enable
            && file
                .entries
                .get(index)
                .is_some_and(|e| e.text.contains(&test_repo_path));
        if let Some(change) = &change {
            self.queue.push(change.clone());
        }
        Ok(ToggleOutcome {
            change,
            test_repo_warning,
        })
    }

    pub fn select_mirror(&mut self, text: &str) -> RepomanResult<&CuratedMirror> {
        let mirror = self
            .mirrors
            .find_containing(text)
            .cloned()
            .ok_or_else(|| RepomanError::MirrorNotFound(text.to_string()))?;
        debug!("Selected mirror {}", mirror.description);
        Ok(&*self.selected.insert(mirror))
    }

    /// Write queued toggles, then the selected mirror, then re-read.
    pub fn commit(&mut self) -> RepomanResult<CommitSummary> {
        let interrupt = self.cmd.interrupt_handle();
        interrupt.check("writing source changes")?;
        let applied = self.queue.apply()?;
        if interrupt.is_set() {
            self.refresh()?;
            return Err(RepomanError::Cancelled(format!(
                "stopped after applying {} change(s)",
                applied
            )));
        }

        let mut mirror = None;
        if let Some(selected) = self.selected.take() {
            if selected.url.is_empty() {
                warn!("Selected entry has no URL: {}", selected.description);
            } else {
                let debian_version = release::debian_version_number(&self.config.debian_version_file);
                SourceRewriter::new(&self.config).replace_distro_repos(&selected.url, debian_version)?;
                mirror = Some(selected.url);
            }
        }

        self.refresh()?;
        Ok(CommitSummary { applied, mirror })
    }

    /// Detect the closest curated mirror and switch to it.
    ///
    /// Uses `netselect` when installed, otherwise (or when `builtin`) ranks
    /// the mirrors with HEAD requests.
    pub async fn fastest_distro(&mut self, builtin: bool) -> RepomanResult<String> {
        let targets = self.mirrors.probe_targets();
        if targets.is_empty() {
            return Err(RepomanError::MirrorNotFound(format!(
                "no mirrors listed in {}",
                self.config.curated_list.display()
            )));
        }

        let program = self.config.probe.netselect.clone();
        let use_builtin = builtin || which::which(&program).is_err();
        let fastest = if use_builtin {
            info!("Ranking {} mirrors without {}", targets.len(), program);
            let results = MirrorProbe::new(&self.config)?.rank_mirrors(&targets).await?;
            results
                .into_iter()
                .find(|r| r.success)
                .map(|r| r.mirror_url)
                .ok_or_else(|| RepomanError::ProbeFailed("no mirror answered".to_string()))?
        } else {
            probe::netselect_fastest(&self.cmd, &program, &targets).await?
        };
        info!("Fastest distro mirror: {}", fastest);

        self.select_mirror(&fastest)?;
        let summary = self.commit()?;
        summary
            .mirror
            .ok_or_else(|| RepomanError::MirrorNotFound(fastest))
    }

    /// Ask netselect-apt for the closest Debian mirror and switch to it.
    pub async fn fastest_debian(&mut self) -> RepomanResult<String> {
        let version = release::debian_version_number(&self.config.debian_version_file);
        let codename = match release::debian_codename(version) {
            // netselect-apt rejects these two names
            Ok("buster") | Ok("bullseye") => None,
            Ok(name) => Some(name),
            Err(e) => {
                warn!("{}; letting netselect-apt pick the suite", e);
                None
            }
        };

        let url =
            probe::netselect_apt_fastest(&self.cmd, &self.config.probe.netselect_apt, codename).await?;
        info!("Fastest Debian mirror: {}", url);
        self.set_debian_mirror(&url).await?;
        Ok(url)
    }

    /// Point the stock Debian lists at `url` once it answers.
    pub async fn set_debian_mirror(&mut self, url: &str) -> RepomanResult<Vec<PathBuf>> {
        if !MirrorProbe::new(&self.config)?.check_repo(url).await {
            return Err(RepomanError::MirrorUnavailable(url.to_string()));
        }
        self.cmd.interrupt_handle().check("rewriting the Debian lists")?;
        let backups = SourceRewriter::new(&self.config).replace_debian_repos(url)?;
        self.refresh()?;
        Ok(backups)
    }

    pub async fn check(&self, url: &str) -> RepomanResult<MirrorTestResult> {
        Ok(MirrorProbe::new(&self.config)?.test_mirror(url).await)
    }

    pub async fn restore_sources(&mut self) -> RepomanResult<RestoreReport> {
        let report = SourceRestorer::new(&self.config)?
            .with_interrupt(self.cmd.interrupt_handle())
            .restore()
            .await?;
        self.queue.clear();
        self.selected = None;
        self.refresh()?;
        Ok(report)
    }

    pub fn enable_ahs(&mut self) -> RepomanResult<usize> {
        self.cmd.interrupt_handle().check("enabling AHS")?;
        let changed = rewrite::enable_ahs(&self.config.distro_list_path())?;
        self.refresh()?;
        Ok(changed)
    }
}
