use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No cameras found")]
    NoCamera,
    #[error("libcamera error: {0}")]
    Camera(String),
    #[error("iceoryx2 error: {0}")]
    Ipc(String),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}
