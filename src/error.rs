use std::path::PathBuf;

/// Errors surfaced synchronously by [`crate::watcher::Watcher::watch`] or
/// swallowed internally per spec (scanner/parser failures never propagate).
#[derive(thiserror::Error, Debug)]
pub enum WatchError {
    #[error("no go.mod found in {0} or any ancestor")]
    NoModule(PathBuf),

    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Per-file parse failure. Never returned from a public API — constructed
    /// only so the parser has a typed value to log before skipping the file.
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, WatchError>;
