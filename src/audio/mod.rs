//! Audio playback plumbing: the command queue and the media backend

mod backend;
mod command;
#[cfg_attr(not(windows), allow(dead_code))]
mod decode;
#[cfg_attr(not(windows), allow(dead_code))]
mod feed;
#[cfg(windows)]
mod output;

pub use backend::{BackendError, BackendFactory, BackendState, MediaBackend};
pub use command::{channel as command_channel, AudioCommand, CommandSender};

#[cfg(test)]
pub(crate) use backend::mock;

/// Backend for the default output device
#[cfg(windows)]
pub type DefaultBackend = output::CpalBackend;

/// Placeholder type on platforms without an output backend; never constructed
#[cfg(not(windows))]
pub type DefaultBackend = backend::Unavailable;

/// Open the default output device
pub fn default_backend() -> Result<DefaultBackend, BackendError> {
    #[cfg(windows)]
    {
        output::CpalBackend::new()
    }

    #[cfg(not(windows))]
    {
        Err(BackendError::Unavailable(
            "audio output is only implemented for Windows".into(),
        ))
    }
}
