//! Media backend abstraction
//!
//! The playback worker owns exactly one backend and is the only caller.
//! Every operation is fallible so a misbehaving device or file never
//! takes the worker down.

use std::path::Path;

/// What the backend itself reports about the loaded media
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Playing,
    Paused,
    Stopped,
    /// Reached the end of the media on its own
    Ended,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("audio output unavailable: {0}")]
    Unavailable(String),

    #[error("failed to load {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("no media loaded")]
    NoMedia,

    #[error("seek not supported: {0}")]
    SeekUnsupported(String),

    #[error("playback device error: {0}")]
    Device(String),
}

/// Opaque media player driven by the playback worker
pub trait MediaBackend {
    fn load(&mut self, path: &Path) -> Result<(), BackendError>;
    fn play(&mut self) -> Result<(), BackendError>;
    fn pause(&mut self) -> Result<(), BackendError>;
    fn resume(&mut self) -> Result<(), BackendError>;
    /// Halt and release the loaded media
    fn stop(&mut self) -> Result<(), BackendError>;
    fn seek_to(&mut self, position_ms: u64) -> Result<(), BackendError>;
    fn position_ms(&self) -> Result<u64, BackendError>;
    /// `Ok(None)` while the length is not known yet
    fn duration_ms(&self) -> Result<Option<u64>, BackendError>;
    fn state(&self) -> Result<BackendState, BackendError>;
}

/// Builds the backend on the worker thread
pub type BackendFactory<B> = Box<dyn FnOnce() -> Result<B, BackendError> + Send>;

/// Backend type for platforms without audio output. Uninhabited, so the
/// factory for it can only fail.
#[cfg(not(windows))]
#[derive(Debug)]
pub enum Unavailable {}

#[cfg(not(windows))]
impl MediaBackend for Unavailable {
    fn load(&mut self, _path: &Path) -> Result<(), BackendError> {
        match *self {}
    }
    fn play(&mut self) -> Result<(), BackendError> {
        match *self {}
    }
    fn pause(&mut self) -> Result<(), BackendError> {
        match *self {}
    }
    fn resume(&mut self) -> Result<(), BackendError> {
        match *self {}
    }
    fn stop(&mut self) -> Result<(), BackendError> {
        match *self {}
    }
    fn seek_to(&mut self, _position_ms: u64) -> Result<(), BackendError> {
        match *self {}
    }
    fn position_ms(&self) -> Result<u64, BackendError> {
        match *self {}
    }
    fn duration_ms(&self) -> Result<Option<u64>, BackendError> {
        match *self {}
    }
    fn state(&self) -> Result<BackendState, BackendError> {
        match *self {}
    }
}
