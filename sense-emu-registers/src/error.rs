//! Register store error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while opening or accessing a register block
#[derive(Error, Debug)]
pub enum RegisterError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Register file {path} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("Register block {0} is mapped read-only")]
    ReadOnly(PathBuf),
}

impl RegisterError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
