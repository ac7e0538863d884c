//! Line substitutions applied to APT list files when a mirror is chosen.
//!
//! Every rule replaces the first match on each line and inserts its
//! replacement literally, the way `sed -i 's;pattern;text;'` edits a file.

use crate::config::Config;
use crate::error::{RepomanError, RepomanResult};
use crate::release;
use crate::sources::{read_utf8, write_atomic};
use chrono::Utc;
use log::{debug, info, warn};
use regex::{NoExpand, Regex};
use std::borrow::Cow;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LineRule {
    pattern: Regex,
    replacement: String,
}

impl LineRule {
    pub fn new(pattern: &str, replacement: impl Into<String>) -> RepomanResult<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            replacement: replacement.into(),
        })
    }

    /// Returns the new text and how many lines changed.
    pub fn apply(&self, content: &str) -> (String, usize) {
        let mut out = String::with_capacity(content.len());
        let mut changed = 0;
        for line in content.split_inclusive('\n') {
            let (body, eol) = match line.strip_suffix('\n') {
                Some(body) => (body, "\n"),
                None => (line, ""),
            };
            let replaced = self
                .pattern
                .replacen(body, 1, NoExpand(&self.replacement));
            if let Cow::Owned(_) = replaced {
                changed += 1;
            }
            out.push_str(&replaced);
            out.push_str(eol);
        }
        (out, changed)
    }
}

/// Run `rules` over `path` in order; returns the number of lines changed.
pub fn edit_file(path: &Path, rules: &[LineRule]) -> RepomanResult<usize> {
    let Some(original) = read_utf8(path)? else {
        return Ok(0);
    };
    let mut content = original.clone();
    let mut changed = 0;
    for rule in rules {
        let (next, n) = rule.apply(&content);
        content = next;
        changed += n;
    }
    if content != original {
        write_atomic(path, &content)?;
    }
    debug!("{:?}: {} line(s) rewritten", path, changed);
    Ok(changed)
}

pub struct SourceRewriter<'a> {
    config: &'a Config,
}

impl<'a> SourceRewriter<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn distro_list_files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.config.distro_list_path()];
        for legacy in &self.config.distro.legacy_list_files {
            let path = self.config.apt_dir.join(legacy);
            if path.exists() {
                files.push(path);
            }
        }
        files
    }

    /// Point the distro's stable and test repository lines at `url`.
    ///
    /// On pre-stretch antiX systems the antiX list follows along.
    pub fn replace_distro_repos(&self, url: &str, debian_version: u32) -> RepomanResult<()> {
        let url = url.trim_end_matches('/');
        let distro = &self.config.distro;
        let rules = [
            LineRule::new(
                &format!("deb.*{} ", regex::escape(&distro.repo_marker())),
                format!("deb {}{} ", url, distro.repo_path),
            )?,
            LineRule::new(
                &format!("deb.*{} ", regex::escape(&distro.test_repo_marker())),
                format!("deb {}{} ", url, distro.test_repo_path),
            )?,
        ];

        for file in self.distro_list_files() {
            edit_file(&file, &rules).map_err(|e| {
                RepomanError::RewriteFailed(format!("{}: {}", file.display(), e))
            })?;
        }

        if debian_version < 9 && release::is_antix(self.config) {
            self.replace_antix_repo(url, debian_version)?;
        }

        info!("Distro repository set to {}", url);
        Ok(())
    }

    fn replace_antix_repo(&self, url: &str, debian_version: u32) -> RepomanResult<()> {
        let codename = release::debian_codename(debian_version)?;
        let base = if url == self.config.distro.primary_mirror.trim_end_matches('/') {
            self.config.distro.primary_antix_mirror.trim_end_matches('/')
        } else {
            url
        };
        let rule = LineRule::new(
            &format!("https?://.*/{}/?", regex::escape(codename)),
            format!("{}/antix/{}/", base, codename),
        )?;
        let file = self.config.antix_list_path();
        edit_file(&file, &[rule])
            .map_err(|e| RepomanError::RewriteFailed(format!("{}: {}", file.display(), e)))?;
        Ok(())
    }

    /// Point the stock Debian lists at `url`, backing each file up first.
    pub fn replace_debian_repos(&self, url: &str) -> RepomanResult<Vec<PathBuf>> {
        let debian = &self.config.debian;
        let backup_dir = self.config.backup_dir();
        if !backup_dir.exists() {
            std::fs::create_dir_all(&backup_dir)?;
        }

        let mut rules = vec![
            LineRule::new(r"deb\s.*/debian/*[^-]", format!("deb {} ", url))?,
            LineRule::new(r"deb-src\s.*/debian/*[^-]", format!("deb-src {} ", url))?,
        ];
        if url == debian.redirector {
            rules.push(LineRule::new(
                &format!(r"deb\s*{}", regex::escape(&debian.security_legacy)),
                format!("deb {}", debian.security_redirector),
            )?);
        }

        let mut backups = Vec::new();
        for name in &debian.list_files {
            let file = self.config.apt_dir.join(name);
            if !file.exists() {
                warn!("{} does not exist, skipping", file.display());
                continue;
            }
            let backup = backup_dir.join(format!("{}.{}", name, Utc::now().timestamp()));
            std::fs::copy(&file, &backup)?;
            debug!("Backed up {} to {}", file.display(), backup.display());
            backups.push(backup);

            edit_file(&file, &rules)?;
        }
        info!("Debian repository set to {}", url);
        Ok(backups)
    }
}

/// Uncomment the Advanced Hardware Stack lines of `path`.
pub fn enable_ahs(path: &Path) -> RepomanResult<usize> {
    let selector = Regex::new(r"^\s*#*\s*deb.*ahs\s*")?;
    let strip = Regex::new(r"^#*\s*")?;
    let Some(original) = read_utf8(path)? else {
        return Ok(0);
    };
    let mut changed = 0;
    let content: String = original
        .split_inclusive('\n')
        .map(|line| {
            if selector.is_match(line) {
                let stripped = strip.replacen(line, 1, "");
                if stripped != line {
                    changed += 1;
                }
                stripped.into_owned()
            } else {
                line.to_string()
            }
        })
        .collect();
    if changed > 0 {
        write_atomic(path, &content)?;
    }
    info!("Enabled {} AHS line(s) in {}", changed, path.display());
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Config) {
        let root = tempfile::tempdir().unwrap();
        let config = Config::rooted_at(root.path());
        std::fs::create_dir_all(&config.apt_dir).unwrap();
        (root, config)
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_rule_first_match_per_line() {
        let rule = LineRule::new("a", "b").unwrap();
        let (out, n) = rule.apply("aaa\nxyz\na");
        assert_eq!(out, "baa\nxyz\nb");
        assert_eq!(n, 2);
    }

    #[test]
    fn test_rule_replacement_is_literal() {
        let rule = LineRule::new("x", "$1&").unwrap();
        assert_eq!(rule.apply("x\n").0, "$1&\n");
    }

    #[test]
    fn test_replace_distro_repos() {
        let (_root, config) = setup();
        let mx = config.distro_list_path();
        std::fs::write(
            &mx,
            "# MX Community Main and Test Repos\n\
             deb http://old.example.org/mx/repo/ bookworm main non-free\n\
             #deb http://old.example.org/mx/testrepo/ bookworm test\n\
             deb http://old.example.org/mx/repo/ bookworm ahs\n",
        )
        .unwrap();

        let rewriter = SourceRewriter::new(&config);
        rewriter
            .replace_distro_repos("https://new.example.net/", 12)
            .unwrap();

        assert_eq!(
            read(&mx),
            "# MX Community Main and Test Repos\n\
             deb https://new.example.net/mx/repo/ bookworm main non-free\n\
             #deb https://new.example.net/mx/testrepo/ bookworm test\n\
             deb https://new.example.net/mx/repo/ bookworm ahs\n"
        );
    }

    #[test]
    fn test_replace_distro_repos_includes_legacy_list() {
        let (_root, config) = setup();
        std::fs::write(config.distro_list_path(), "deb http://a/mx/repo/ x main\n").unwrap();
        let legacy = config.apt_dir.join("mx16.list");
        std::fs::write(&legacy, "deb http://a/mx/repo/ x main\n").unwrap();

        let rewriter = SourceRewriter::new(&config);
        assert_eq!(rewriter.distro_list_files().len(), 2);
        rewriter.replace_distro_repos("http://b", 12).unwrap();
        assert_eq!(read(&legacy), "deb http://b/mx/repo/ x main\n");
    }

    #[test]
    fn test_replace_distro_repos_missing_list_fails() {
        let (_root, config) = setup();
        let err = SourceRewriter::new(&config)
            .replace_distro_repos("http://b", 12)
            .unwrap_err();
        assert!(matches!(err, RepomanError::RewriteFailed(_)));
    }

    #[test]
    fn test_antix_list_follows_on_old_releases() {
        let (root, config) = setup();
        std::fs::write(config.distro_list_path(), "deb http://a/mx/repo/ jessie main\n").unwrap();
        std::fs::write(
            config.antix_list_path(),
            "deb http://old.example.org/antix/jessie jessie main\n",
        )
        .unwrap();
        std::fs::create_dir_all(root.path().join("etc")).unwrap();
        std::fs::write(&config.antix_version_file, "antiX-15\n").unwrap();

        let rewriter = SourceRewriter::new(&config);
        rewriter.replace_distro_repos("http://mxrepo.com", 8).unwrap();
        assert_eq!(
            read(&config.antix_list_path()),
            "deb http://la.mxrepo.com/antix/jessie/ jessie main\n"
        );

        rewriter.replace_distro_repos("http://other.example.net", 8).unwrap();
        assert_eq!(
            read(&config.antix_list_path()),
            "deb http://other.example.net/antix/jessie/ jessie main\n"
        );
    }

    #[test]
    fn test_antix_list_untouched_on_newer_releases() {
        let (root, config) = setup();
        std::fs::write(config.distro_list_path(), "deb http://a/mx/repo/ x main\n").unwrap();
        let antix = "deb http://old.example.org/antix/buster buster main\n";
        std::fs::write(config.antix_list_path(), antix).unwrap();
        std::fs::create_dir_all(root.path().join("etc")).unwrap();
        std::fs::write(&config.antix_version_file, "antiX-19\n").unwrap();

        SourceRewriter::new(&config)
            .replace_distro_repos("http://b", 10)
            .unwrap();
        assert_eq!(read(&config.antix_list_path()), antix);
    }

    #[test]
    fn test_replace_debian_repos() {
        let (_root, config) = setup();
        let debian = config.apt_dir.join("debian.list");
        std::fs::write(
            &debian,
            "deb http://ftp.example.org/debian/ bookworm main contrib\n\
             deb http://security.debian.org/ bookworm-security main\n\
             deb http://ftp.example.org/debian-security/ bookworm-security main\n\
             #deb-src http://ftp.example.org/debian bookworm main\n",
        )
        .unwrap();

        let backups = SourceRewriter::new(&config)
            .replace_debian_repos("https://deb.debian.org/debian/")
            .unwrap();

        assert_eq!(backups.len(), 1);
        assert!(backups[0].starts_with(config.backup_dir()));
        assert!(read(&backups[0]).contains("ftp.example.org/debian/ bookworm"));
        assert_eq!(
            read(&debian),
            "deb https://deb.debian.org/debian/ bookworm main contrib\n\
             deb https://deb.debian.org/debian-security/ bookworm-security main\n\
             deb http://ftp.example.org/debian-security/ bookworm-security main\n\
             #deb-src https://deb.debian.org/debian/ bookworm main\n"
        );
    }

    #[test]
    fn test_replace_debian_repos_keeps_security_for_other_mirrors() {
        let (_root, config) = setup();
        let updates = config.apt_dir.join("debian-stable-updates.list");
        std::fs::write(
            &updates,
            "deb http://deb.debian.org/debian bookworm-updates main\n\
             deb http://security.debian.org/ bookworm-security main\n",
        )
        .unwrap();

        SourceRewriter::new(&config)
            .replace_debian_repos("http://ftp.example.org/debian/")
            .unwrap();
        assert_eq!(
            read(&updates),
            "deb http://ftp.example.org/debian/ bookworm-updates main\n\
             deb http://security.debian.org/ bookworm-security main\n"
        );
    }

    #[test]
    fn test_non_utf8_debian_list_is_left_alone() {
        let (_root, config) = setup();
        let debian = config.apt_dir.join("debian.list");
        let bytes = b"# Espa\xf1a\ndeb http://ftp.es.example.org/debian/ bookworm main\n".to_vec();
        std::fs::write(&debian, &bytes).unwrap();

        let backups = SourceRewriter::new(&config)
            .replace_debian_repos("http://ftp.example.org/debian/")
            .unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(std::fs::read(&debian).unwrap(), bytes);
        assert_eq!(enable_ahs(&debian).unwrap(), 0);
    }

    #[test]
    fn test_enable_ahs() {
        let (_root, config) = setup();
        let mx = config.distro_list_path();
        std::fs::write(
            &mx,
            "deb http://a/mx/repo/ bookworm main\n\
             #deb http://a/mx/repo/ bookworm ahs\n\
             # MX ahs notes\n",
        )
        .unwrap();
        assert_eq!(enable_ahs(&mx).unwrap(), 1);
        assert_eq!(
            read(&mx),
            "deb http://a/mx/repo/ bookworm main\n\
             deb http://a/mx/repo/ bookworm ahs\n\
             # MX ahs notes\n"
        );
    }
}
