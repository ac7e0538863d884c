use crate::config::Config;
use crate::error::{RepomanError, RepomanResult};
use crate::release;
use crate::shell::Interrupt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use zip::ZipArchive;

const MIN_RELEASE: u32 = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreReport {
    pub release: u32,
    pub branch: String,
    pub url: String,
    pub installed: Vec<PathBuf>,
    /// Backups of files that were overwritten (`name~`).
    pub replaced: Vec<PathBuf>,
    /// The release ships an optional AHS repository the user may enable.
    pub ahs_available: bool,
}

/// Reinstalls the pristine APT list files of the running release.
pub struct SourceRestorer<'a> {
    config: &'a Config,
    client: reqwest::Client,
    interrupt: Interrupt,
}

impl<'a> SourceRestorer<'a> {
    pub fn new(config: &'a Config) -> RepomanResult<Self> {
        // archive downloads outlive the probe timeout: bound only the connect
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.probe_timeout());
        if let Some(proxy) = &config.https_proxy {
            builder = builder.proxy(reqwest::Proxy::https(proxy)?);
        }
        Ok(Self {
            config,
            client: builder.build()?,
            interrupt: Interrupt::new(),
        })
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn archive_url(&self, release: u32) -> (String, String) {
        let branch = if release > 19 { "main" } else { "master" };
        let url = format!(
            "{}/MX-{}_sources/zip/{}",
            self.config.restore_url_base.trim_end_matches('/'),
            release,
            branch
        );
        (url, branch.to_string())
    }

    pub async fn restore(&self) -> RepomanResult<RestoreReport> {
        if !release::is_antix_or_mx(self.config) {
            return Err(RepomanError::SystemIncompatible(
                "Can't figure out if this app is running on antiX or MX".to_string(),
            ));
        }

        let version = release::mx_version(&self.config.lsb_release_file).unwrap_or(0);
        if version < MIN_RELEASE {
            return Err(RepomanError::SystemIncompatible(format!(
                "MX version not detected or out of range: {}",
                version
            )));
        }

        self.interrupt.check("downloading the original sources")?;
        let tmpdir = tempfile::tempdir()?;
        let (url, branch) = self.archive_url(version);
        let archive = tmpdir.path().join(format!("{}.zip", branch));

        info!("Downloading original sources from {}", url);
        download_file(&self.client, &url, &archive).await?;
        self.interrupt.check("extracting the archive")?;

        extract_zip(&archive, tmpdir.path())
            .map_err(|e| RepomanError::ArchiveError(format!("Could not unzip downloaded file: {}", e)))?;

        let source_dir = find_sources_dir(tmpdir.path(), &branch)?;
        let (installed, replaced) =
            install_files(&source_dir, &self.config.apt_dir, &self.interrupt)?;

        info!(
            "Restored {} source file(s) for release {}",
            installed.len(),
            version
        );
        Ok(RestoreReport {
            release: version,
            branch,
            url,
            installed,
            replaced,
            ahs_available: version >= 19 && release::is_64bit(),
        })
    }
}

pub async fn download_file(client: &reqwest::Client, url: &str, dest: &Path) -> RepomanResult<u64> {
    let mut response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| {
            RepomanError::DownloadFailed(format!("Could not download original APT files: {}", e))
        })?;

    let mut file = tokio::fs::File::create(dest).await?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await.map_err(|e| {
            RepomanError::DownloadFailed(format!(
                "There was an error writing file: {}. Please check if you have enough free space on your drive ({})",
                dest.display(),
                e
            ))
        })?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    debug!("Downloaded {} bytes to {}", written, dest.display());
    Ok(written)
}

pub fn extract_zip(archive_path: &Path, extract_to: &Path) -> RepomanResult<usize> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;
    let mut files_extracted = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => path.to_owned(),
            None => {
                warn!("Skipping file with unsafe name: {}", entry.name());
                continue;
            }
        };
        let outpath = extract_to.join(&entry_path);
        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&outpath)?;
            std::io::copy(&mut entry, &mut outfile)?;
            files_extracted += 1;
        }
    }
    debug!("Extracted {} file(s) from {}", files_extracted, archive_path.display());
    Ok(files_extracted)
}

/// GitHub names the top directory `MX-<release>_sources-<branch>`.
fn find_sources_dir(root: &Path, branch: &str) -> RepomanResult<PathBuf> {
    let suffix = format!("_sources-{}", branch);
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("MX-") && name.ends_with(&suffix) && entry.file_type()?.is_dir() {
            return Ok(entry.path());
        }
    }
    Err(RepomanError::ArchiveError(format!(
        "archive has no MX-*{} directory",
        suffix
    )))
}

/// Move every visible file of `from` into `to`; an existing destination is
/// kept as `name~`. An interrupt stops before the next file, never between
/// a backup and its replacement.
pub fn install_files(
    from: &Path,
    to: &Path,
    interrupt: &Interrupt,
) -> RepomanResult<(Vec<PathBuf>, Vec<PathBuf>)> {
    std::fs::create_dir_all(to)?;
    let mut installed = Vec::new();
    let mut replaced = Vec::new();

    let mut entries: Vec<PathBuf> = std::fs::read_dir(from)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && !p
                    .file_name()
                    .map(|n| n.to_string_lossy().starts_with('.'))
                    .unwrap_or(true)
        })
        .collect();
    entries.sort();

    for src in entries {
        let Some(name) = src.file_name() else {
            continue;
        };
        let dest = to.join(name);
        if interrupt.is_set() {
            warn!(
                "Interrupted after installing {} of the original source files",
                installed.len()
            );
            return Err(RepomanError::Cancelled(format!(
                "restore stopped before {}",
                dest.display()
            )));
        }
        if dest.exists() {
            let mut backup = dest.clone().into_os_string();
            backup.push("~");
            let backup = PathBuf::from(backup);
            std::fs::rename(&dest, &backup)?;
            replaced.push(backup);
        }
        move_file(&src, &dest)?;
        installed.push(dest);
    }
    Ok((installed, replaced))
}

// rename does not cross filesystems; /tmp and /etc often differ
fn move_file(src: &Path, dest: &Path) -> RepomanResult<()> {
    if std::fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    std::fs::copy(src, dest)?;
    std::fs::remove_file(src)?;
    Ok(())
}
