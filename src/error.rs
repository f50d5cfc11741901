//! Error handling for telerec-rs
//!
//! This module defines custom error types and a Result alias for use
//! throughout the crate.
//!
//! The taxonomy mirrors how failures propagate through a recording session:
//! device and camera errors are local to one device and degrade a single
//! tick, persistence errors are fatal because resume correctness depends on
//! the dataset index, and encoding errors are scoped to one episode and
//! retried on the next resume.

use thiserror::Error;

/// Main error type for telerec-rs operations
#[derive(Error, Debug)]
pub enum TelerecError {
    /// Errors from a robot arm bus (open/read/write)
    #[error("Device error on '{device}': {message}")]
    Device { device: String, message: String },

    /// Errors from a camera (open/capture)
    #[error("Camera error on '{camera}': {message}")]
    Camera { camera: String, message: String },

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dataset index write failure; fatal because resume state is no
    /// longer trustworthy
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Errors scoped to encoding a single episode
    #[error("Encoding error for episode {episode_index}: {message}")]
    Encoding { episode_index: u64, message: String },

    /// A dataset index already exists and the resume flag was not set
    #[error("Dataset already exists at {path:?}; enable resume to continue it")]
    DatasetExists { path: std::path::PathBuf },

    /// A worker channel disconnected unexpectedly
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    /// Timeout waiting on a device
    #[error("Timeout: {0}")]
    Timeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<TelerecError>,
    },
}

impl TelerecError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        TelerecError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a device error for a named arm bus
    pub fn device(device: impl Into<String>, message: impl std::fmt::Display) -> Self {
        TelerecError::Device {
            device: device.into(),
            message: message.to_string(),
        }
    }

    /// Create a camera error for a named camera
    pub fn camera(camera: impl Into<String>, message: impl std::fmt::Display) -> Self {
        TelerecError::Camera {
            camera: camera.into(),
            message: message.to_string(),
        }
    }

    /// Create an encoding error scoped to one episode
    pub fn encoding(episode_index: u64, message: impl std::fmt::Display) -> Self {
        TelerecError::Encoding {
            episode_index,
            message: message.to_string(),
        }
    }

    /// Whether this error must halt the session instead of degrading it
    ///
    /// Only persistence-level failures qualify; device, camera, and encoding
    /// errors are absorbed with degraded coverage or a `failed` index entry.
    pub fn is_fatal(&self) -> bool {
        match self {
            TelerecError::Persistence(_) | TelerecError::DatasetExists { .. } => true,
            TelerecError::WithContext { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

/// Result type alias for telerec-rs operations
pub type Result<T> = std::result::Result<T, TelerecError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
