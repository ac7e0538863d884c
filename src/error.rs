use thiserror::Error;

pub type RepomanResult<T> = Result<T, RepomanError>;

#[derive(Error, Debug)]
pub enum RepomanError {
    #[error("IO error: {0}")]
    Io(std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Source file not found: {0}")]
    SourceFileNotFound(String),

    #[error("Source entry not found: {0}")]
    EntryNotFound(String),

    #[error("Mirror not found: {0}")]
    MirrorNotFound(String),

    /// The distro repository lines could not be rewritten
    #[error("Could not change the repo: {0}")]
    RewriteFailed(String),

    #[error("Could not detect fastest repo: {0}")]
    ProbeFailed(String),

    #[error("Mirror unavailable: {0}")]
    MirrorUnavailable(String),

    #[error("Could not detect Debian version: {0}")]
    UnknownRelease(String),

    #[error("System incompatible: {0}")]
    SystemIncompatible(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Archive error: {0}")]
    ArchiveError(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<std::io::Error> for RepomanError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => RepomanError::PermissionDenied(format!(
                "{} (repository files can only be changed as root)",
                err
            )),
            _ => RepomanError::Io(err),
        }
    }
}
impl From<zip::result::ZipError> for RepomanError {
    fn from(err: zip::result::ZipError) -> Self {
        RepomanError::ArchiveError(format!("ZIP error: {}", err))
    }
}
impl From<tokio::task::JoinError> for RepomanError {
    fn from(err: tokio::task::JoinError) -> Self {
        RepomanError::Unknown(format!("Task join error: {}", err))
    }
}
impl From<tokio::sync::AcquireError> for RepomanError {
    fn from(err: tokio::sync::AcquireError) -> Self {
        RepomanError::Unknown(format!("Semaphore error: {}", err))
    }
}
impl From<tempfile::PersistError> for RepomanError {
    fn from(err: tempfile::PersistError) -> Self {
        RepomanError::from(err.error)
    }
}
impl From<std::num::ParseIntError> for RepomanError {
    fn from(err: std::num::ParseIntError) -> Self {
        RepomanError::InvalidArguments(format!("Parse int error: {}", err))
    }
}

impl From<dialoguer::Error> for RepomanError {
    fn from(err: dialoguer::Error) -> Self {
        RepomanError::Cancelled(format!("Prompt failed: {}", err))
    }
}

impl RepomanError {
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            RepomanError::Http(_)
                | RepomanError::MirrorUnavailable(_)
                | RepomanError::DownloadFailed(_)
        )
    }
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            RepomanError::InvalidArguments(_)
                | RepomanError::SourceFileNotFound(_)
                | RepomanError::EntryNotFound(_)
                | RepomanError::MirrorNotFound(_)
        )
    }
    pub fn is_system_error(&self) -> bool {
        matches!(
            self,
            RepomanError::Io(_)
                | RepomanError::PermissionDenied(_)
                | RepomanError::SystemIncompatible(_)
                | RepomanError::UnknownRelease(_)
        )
    }
    pub fn exit_code(&self) -> i32 {
        match self {
            RepomanError::InvalidArguments(_) => 2,
            RepomanError::PermissionDenied(_) => 5,
            e if e.is_network_error() => 7,
            RepomanError::ConfigError(_) | RepomanError::TomlSer(_) => 8,
            RepomanError::Cancelled(_) => 130,
            e if e.is_user_error() => 3,
            _ => 1,
        }
    }
}
