//! Error types for the file substrate
//!
//! Only synchronous rejections travel through [`VfsError`]. Failures of an
//! accepted request are reported as zero-effect replies through the request's
//! own continuation, and invariant breaks abort the process.

use crate::file::FileId;
use std::path::PathBuf;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, VfsError>;

/// Errors reported synchronously by isolate operations
#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    /// A driver with the same name is already registered
    #[error("driver '{0}' is already registered")]
    DuplicateDriver(String),

    /// No driver is registered under this name
    #[error("no driver named '{0}'")]
    UnknownDriver(String),

    /// No extension rule matched the native path
    #[error("no suitable driver found for '{}'", .0.display())]
    NoDriverRule(PathBuf),

    /// The file does not exist (never created or already destroyed)
    #[error("file {0} does not exist")]
    NoSuchFile(FileId),

    /// The driver needs a native path but none was given
    #[error("driver '{0}' requires a native path")]
    MissingNativePath(String),

    /// The driver refused to initialize the file
    #[error("driver '{driver}' failed to initialize file: {reason}")]
    DriverInit {
        /// Name of the driver
        driver: String,
        /// Why initialization failed
        reason: String,
    },

    /// Path resolution was asked to start from the isolate root, but none is set
    #[error("isolate has no root file")]
    NoRoot,

    /// Native filesystem error
    #[error("filesystem error: {0}")]
    FileSystem(String),
}
