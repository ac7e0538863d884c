use crate::config::Config;
use crate::error::{RepomanError, RepomanResult};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub text: String,
    pub enabled: bool,
}

impl SourceEntry {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            enabled: !text.starts_with('#'),
        }
    }

    /// Every `#` and the whitespace after it goes.
    pub fn enabled_text(&self) -> String {
        let mut out = String::with_capacity(self.text.len());
        let mut chars = self.text.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '#' {
                while chars.peek().is_some_and(|n| n.is_whitespace()) {
                    chars.next();
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    pub fn disabled_text(&self) -> String {
        format!("# {}", self.text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AptFile {
    pub path: PathBuf,
    pub name: String,
    pub entries: Vec<SourceEntry>,
}

impl AptFile {
    pub fn load(path: &Path) -> RepomanResult<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            name,
            entries: load_apt_file(path)?,
        })
    }

    pub fn is_debian(&self) -> bool {
        self.name.contains("debian")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    pub old: String,
    pub new: String,
    pub file: PathBuf,
}

/// Edits collected from the user, written out together on commit.
#[derive(Debug, Clone, Default)]
pub struct ChangeQueue {
    changes: Vec<PendingChange>,
}

impl ChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: PendingChange) {
        debug!("Queued change in {:?}: {:?} -> {:?}", change.file, change.old, change.new);
        self.changes.push(change);
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingChange> {
        self.changes.iter()
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }

    /// Apply in queue order. The queue is emptied even if a write fails.
    pub fn apply(&mut self) -> RepomanResult<usize> {
        let changes = std::mem::take(&mut self.changes);
        let mut applied = 0;
        for change in &changes {
            if replace_literal(&change.file, &change.old, &change.new)? {
                applied += 1;
            } else {
                warn!("{:?} no longer contains {:?}", change.file, change.old);
            }
        }
        info!("Applied {} of {} queued source changes", applied, changes.len());
        Ok(applied)
    }
}

/// Optional `#`s, optional spaces, then `deb`.
pub fn is_source_line(line: &str) -> bool {
    line.trim_start_matches('#')
        .trim_start_matches(' ')
        .starts_with("deb")
}

/// Bytes that are not UTF-8 (a Latin-1 comment, say) are shown lossily.
pub fn load_apt_file(path: &Path) -> RepomanResult<Vec<SourceEntry>> {
    let bytes = std::fs::read(path)?;
    let content = String::from_utf8_lossy(&bytes);
    Ok(content
        .lines()
        .filter(|l| is_source_line(l))
        .map(SourceEntry::new)
        .collect())
}

/// `*.list` files of `dir` by name, then `sources_list` if it carries any
/// source line.
pub fn list_apt_files(dir: &Path, sources_list: &Path) -> RepomanResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            for entry in entries {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') || !name.ends_with(".list") {
                    continue;
                }
                // follows symlinks
                let path = entry.path();
                if path.is_file() {
                    files.push(path);
                }
            }
        }
        Err(e) => warn!("Could not read {:?}: {}", dir, e),
    }
    files.sort_by_key(|p| {
        p.file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    });

    if let Ok(meta) = std::fs::metadata(sources_list) {
        if meta.len() != 0 && !load_apt_file(sources_list)?.is_empty() {
            files.push(sources_list.to_path_buf());
        }
    }
    Ok(files)
}

pub fn scan(config: &Config) -> RepomanResult<Vec<AptFile>> {
    list_apt_files(&config.apt_dir, &config.sources_list)?
        .iter()
        .map(|p| AptFile::load(p))
        .collect()
}

pub fn debian_files(files: &[AptFile]) -> Vec<&AptFile> {
    files.iter().filter(|f| f.is_debian()).collect()
}

/// Flip entry `index` of `file` and return the edit to queue; `None` when
/// the entry is already in the requested state.
pub fn toggle(file: &mut AptFile, index: usize, enable: bool) -> RepomanResult<Option<PendingChange>> {
    let entry = file.entries.get_mut(index).ok_or_else(|| {
        RepomanError::EntryNotFound(format!("{} has no entry {}", file.name, index))
    })?;
    if entry.enabled == enable {
        return Ok(None);
    }

    let new_text = if enable {
        entry.enabled_text()
    } else {
        entry.disabled_text()
    };
    let change = PendingChange {
        old: entry.text.clone(),
        new: new_text.clone(),
        file: file.path.clone(),
    };
    *entry = SourceEntry::new(&new_text);
    Ok(Some(change))
}

/// Replace every occurrence of `old` in `path`; false when nothing matched.
pub fn replace_literal(path: &Path, old: &str, new: &str) -> RepomanResult<bool> {
    if old.is_empty() {
        return Ok(false);
    }
    let Some(content) = read_utf8(path)? else {
        return Ok(false);
    };
    if !content.contains(old) {
        return Ok(false);
    }
    write_atomic(path, &content.replace(old, new))?;
    Ok(true)
}

/// Contents of `path`, or `None` (with a warning) when it is not UTF-8.
/// Such files are never rewritten from lossy text.
pub(crate) fn read_utf8(path: &Path) -> RepomanResult<Option<String>> {
    let bytes = std::fs::read(path)?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(Some(text)),
        Err(_) => {
            warn!("{} is not valid UTF-8, leaving it unchanged", path.display());
            Ok(None)
        }
    }
}

/// Write via a sibling temp file, keeping the original's permissions.
/// A symlinked file is written through to its target.
pub(crate) fn write_atomic(path: &Path, content: &str) -> RepomanResult<()> {
    let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let path = resolved.as_path();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    if let Ok(meta) = std::fs::metadata(path) {
        std::fs::set_permissions(tmp.path(), meta.permissions())?;
    }
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apt_tree() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("sources.list.d");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("mx.list"),
            "# MX repos\ndeb http://mxrepo.com/mx/repo/ bookworm main\n#deb http://mxrepo.com/mx/testrepo/ bookworm test\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("debian.list"),
            "deb http://deb.debian.org/debian/ bookworm main contrib\n# deb-src http://deb.debian.org/debian/ bookworm main\n",
        )
        .unwrap();
        std::fs::write(dir.join("notes.txt"), "deb http://ignored/\n").unwrap();
        std::fs::write(dir.join(".hidden.list"), "deb http://ignored/\n").unwrap();
        let sources_list = root.path().join("sources.list");
        std::fs::write(&sources_list, "").unwrap();
        (root, dir, sources_list)
    }

    #[test]
    fn test_is_source_line() {
        assert!(is_source_line("deb http://x/ a main"));
        assert!(is_source_line("##  deb-src http://x/ a main"));
        assert!(is_source_line("  deb http://x/"));
        assert!(!is_source_line("# MX repos"));
        assert!(!is_source_line("#\tdeb http://x/"));
    }

    #[test]
    fn test_entry_texts() {
        let disabled = SourceEntry::new("#  deb http://x/ a main");
        assert!(!disabled.enabled);
        assert_eq!(disabled.enabled_text(), "deb http://x/ a main");

        let enabled = SourceEntry::new("deb http://x/ a main");
        assert!(enabled.enabled);
        assert_eq!(enabled.disabled_text(), "# deb http://x/ a main");

        let commented = SourceEntry::new("# deb http://x/ a main # note");
        assert_eq!(commented.enabled_text(), "deb http://x/ a main note");
    }

    #[test]
    fn test_list_apt_files() {
        let (_root, dir, sources_list) = apt_tree();
        let files = list_apt_files(&dir, &sources_list).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["debian.list", "mx.list"]);

        std::fs::write(&sources_list, "# nothing here\n").unwrap();
        assert_eq!(list_apt_files(&dir, &sources_list).unwrap().len(), 2);

        std::fs::write(&sources_list, "deb http://extra/ a main\n").unwrap();
        let files = list_apt_files(&dir, &sources_list).unwrap();
        assert_eq!(files.last().unwrap(), &sources_list);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let files =
            list_apt_files(&root.path().join("nope"), &root.path().join("sources.list")).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_load_and_debian_filter() {
        let (_root, dir, sources_list) = apt_tree();
        let files: Vec<AptFile> = list_apt_files(&dir, &sources_list)
            .unwrap()
            .iter()
            .map(|p| AptFile::load(p).unwrap())
            .collect();
        let mx = files.iter().find(|f| f.name == "mx.list").unwrap();
        assert_eq!(mx.entries.len(), 2);
        assert!(mx.entries[0].enabled);
        assert!(!mx.entries[1].enabled);
        let debian = debian_files(&files);
        assert_eq!(debian.len(), 1);
        assert_eq!(debian[0].name, "debian.list");
    }

    #[test]
    fn test_toggle_and_apply() {
        let (_root, dir, _sources_list) = apt_tree();
        let mut mx = AptFile::load(&dir.join("mx.list")).unwrap();
        let mut queue = ChangeQueue::new();

        let change = toggle(&mut mx, 1, true).unwrap().unwrap();
        assert_eq!(change.new, "deb http://mxrepo.com/mx/testrepo/ bookworm test");
        queue.push(change);
        let change = toggle(&mut mx, 0, false).unwrap().unwrap();
        queue.push(change);
        assert!(toggle(&mut mx, 0, false).unwrap().is_none());
        assert!(toggle(&mut mx, 9, true).is_err());

        assert_eq!(queue.apply().unwrap(), 2);
        assert!(queue.is_empty());

        let content = std::fs::read_to_string(dir.join("mx.list")).unwrap();
        assert_eq!(
            content,
            "# MX repos\n# deb http://mxrepo.com/mx/repo/ bookworm main\ndeb http://mxrepo.com/mx/testrepo/ bookworm test\n"
        );
    }

    #[test]
    fn test_replace_literal_is_not_a_pattern() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("x.list");
        std::fs::write(&path, "deb http://a.b/ x main\ndeb http://aXb/ x main\n").unwrap();
        assert!(replace_literal(&path, "a.b", "c&d").unwrap());
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "deb http://c&d/ x main\ndeb http://aXb/ x main\n");
        assert!(!replace_literal(&path, "missing", "x").unwrap());
    }

    #[test]
    fn test_latin1_file_is_listed_but_not_rewritten() {
        let (_root, dir, sources_list) = apt_tree();
        let local = dir.join("local.list");
        let bytes = b"# caf\xe9 mirror\ndeb http://local.example/ bookworm main\n".to_vec();
        std::fs::write(&local, &bytes).unwrap();

        let files = list_apt_files(&dir, &sources_list).unwrap();
        assert!(files.contains(&local));
        let mut file = AptFile::load(&local).unwrap();
        assert_eq!(file.entries.len(), 1);
        assert_eq!(file.entries[0].text, "deb http://local.example/ bookworm main");

        let change = toggle(&mut file, 0, false).unwrap().unwrap();
        assert!(!replace_literal(&change.file, &change.old, &change.new).unwrap());
        assert_eq!(std::fs::read(&local).unwrap(), bytes);
    }

    #[test]
    fn test_symlinked_list_is_included() {
        let (root, dir, sources_list) = apt_tree();
        let target = root.path().join("shared.list");
        std::fs::write(&target, "deb http://shared.example/ bookworm main\n").unwrap();
        std::os::unix::fs::symlink(&target, dir.join("linked.list")).unwrap();
        std::os::unix::fs::symlink(root.path().join("gone.list"), dir.join("dangling.list")).unwrap();

        let files = list_apt_files(&dir, &sources_list).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["debian.list", "linked.list", "mx.list"]);

        let mut linked = AptFile::load(&dir.join("linked.list")).unwrap();
        let change = toggle(&mut linked, 0, false).unwrap().unwrap();
        assert!(replace_literal(&change.file, &change.old, &change.new).unwrap());
        assert!(std::fs::read_to_string(&target).unwrap().starts_with("# deb http://shared.example/"));
        assert!(std::fs::symlink_metadata(dir.join("linked.list")).unwrap().file_type().is_symlink());
    }
}
