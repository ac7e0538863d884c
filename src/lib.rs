pub mod config;
pub mod error;
pub mod manager;
pub mod mirrors;
pub mod probe;
pub mod release;
pub mod restore;
pub mod rewrite;
pub mod shell;
pub mod sources;

pub use config::Config;
pub use error::{RepomanError, RepomanResult};
pub use manager::{CommitSummary, RepoManager, ToggleOutcome};
pub use mirrors::{CuratedMirror, MirrorList};
pub use probe::{MirrorProbe, MirrorTestResult};
pub use restore::{RestoreReport, SourceRestorer};
pub use rewrite::SourceRewriter;
pub use shell::{Cmd, CmdOutput, Interrupt, ProcessListener};
pub use sources::{AptFile, ChangeQueue, PendingChange, SourceEntry};

pub const REPOMAN_VERSION: &str = env!("CARGO_PKG_VERSION");

use lazy_static::lazy_static;
use std::path::PathBuf;

lazy_static! {
    pub static ref REPOMAN_HOME: PathBuf = {
        if let Ok(home) = std::env::var("REPOMAN_HOME") {
            PathBuf::from(home)
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home).join(".repoman")
        } else {
            PathBuf::from("/tmp/.repoman")
        }
    };
    pub static ref REPOMAN_CONFIG: PathBuf = {
        if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(config_home).join("repoman")
        } else {
            REPOMAN_HOME.join("config")
        }
    };
}
