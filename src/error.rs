//! Error taxonomy shared by the lifecycle, router and account modules.

use std::path::PathBuf;

/// Broad class of a [`RealmError`], used by the console to decide how loudly to report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad operator input. Nothing was mutated.
    UserInput,
    /// A realm's on-disk configuration is missing or corrupt.
    ConfigIntegrity,
    /// Database, dataset, filesystem or process failure.
    ExternalResource,
}

#[derive(Debug, thiserror::Error)]
pub enum RealmError {
    #[error("No realm or module matches '{0}'")]
    UnknownRealm(String),

    #[error("No module named '{0}'")]
    UnknownModule(String),

    #[error("Realm name '{name}' is ambiguous, use one of: {candidates}")]
    AmbiguousRealm { name: String, candidates: String },

    #[error("Realm '{0}' already exists")]
    DuplicateRealm(String),

    #[error("Account '{0}' already exists")]
    DuplicateAccount(String),

    #[error("Invalid argument '{value}': {reason}")]
    InvalidArgument { value: String, reason: String },

    #[error("No realms matched the request")]
    NoTargets,

    #[error("None of the requested realms are running")]
    NoneRunning,

    #[error("Realm '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Unknown command '{0}', try 'help'")]
    UnknownCommand(String),

    #[error("Corrupt realm id marker {path}: '{content}'")]
    CorruptId { path: PathBuf, content: String },

    #[error("Missing required config file: {0}")]
    MissingConfig(PathBuf),

    #[error("Config error: {0:#}")]
    Config(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Dataset '{dataset}' failed: {reason}")]
    Provision { dataset: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RealmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RealmError::UnknownRealm(_)
            | RealmError::UnknownModule(_)
            | RealmError::AmbiguousRealm { .. }
            | RealmError::DuplicateRealm(_)
            | RealmError::DuplicateAccount(_)
            | RealmError::InvalidArgument { .. }
            | RealmError::NoTargets
            | RealmError::NoneRunning
            | RealmError::AlreadyRunning(_)
            | RealmError::UnknownCommand(_) => ErrorKind::UserInput,
            RealmError::CorruptId { .. } | RealmError::MissingConfig(_) | RealmError::Config(_) => {
                ErrorKind::ConfigIntegrity
            }
            RealmError::Database(_)
            | RealmError::Spawn { .. }
            | RealmError::Provision { .. }
            | RealmError::Io(_) => ErrorKind::ExternalResource,
        }
    }

    pub(crate) fn invalid(value: impl Into<String>, reason: impl Into<String>) -> Self {
        RealmError::InvalidArgument {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

pub type RealmResult<T> = Result<T, RealmError>;
