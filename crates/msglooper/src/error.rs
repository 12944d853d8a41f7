use core::fmt;

use osal::OsalError;
use thiserror::Error;

use crate::message::Message;

/// Errors returned by looper lifecycle operations.
#[derive(Error, Debug)]
pub enum LooperError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("looper `{0}` is already running")]
    AlreadyRunning(String),
    #[error(transparent)]
    Platform(#[from] OsalError),
}

/// A post was rejected because the looper is not running.
///
/// The rejected message is handed back untouched, so the caller still owns
/// it and decides how to retire it.
#[derive(Error)]
#[error("looper `{looper}` is not running; message what={} rejected", .message.what)]
pub struct PostError {
    looper: String,
    message: Message,
}

impl PostError {
    pub(crate) fn new(looper: &str, message: Message) -> Self {
        Self {
            looper: looper.to_owned(),
            message,
        }
    }

    pub fn looper(&self) -> &str {
        &self.looper
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_message(self) -> Message {
        self.message
    }
}

impl fmt::Debug for PostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostError")
            .field("looper", &self.looper)
            .field("message", &self.message)
            .finish()
    }
}
