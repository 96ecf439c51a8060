use crate::connection::ListenerError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Listen(#[from] ListenerError),

    #[error("reactor failure: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("server is already running")]
    AlreadyRunning,
}
