use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not bind {host} on ports {first}..={last}")]
    Bind {
        host: String,
        first: u16,
        last: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to watch {path}")]
    Watch {
        path: std::path::PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error(transparent)]
    Pattern(#[from] globset::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
