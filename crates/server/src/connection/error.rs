use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("could not bind to TCP socket {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("could not accept new connection: {source}")]
    Accept {
        #[from]
        source: io::Error,
    },
}

impl ListenerError {
    pub fn bind<S: ToString>(address: S, source: io::Error) -> Self {
        Self::Bind { address: address.to_string(), source }
    }

    pub fn accept(source: io::Error) -> Self {
        Self::Accept { source }
    }
}
