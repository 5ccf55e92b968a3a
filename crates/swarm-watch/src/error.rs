use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to watch {path}: {source}")]
    Watch { path: std::path::PathBuf, #[source] source: notify::Error },

    #[error("watch root does not exist: {0}")]
    RootMissing(std::path::PathBuf),
}

pub type WatchResult<T> = Result<T, WatchError>;
