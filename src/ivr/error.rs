use thiserror::Error;

/// A handy [`std::result::Result`] alias with the [`enum@Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error that may occur while driving the call.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Driver(#[from] crate::driver::Error),

    #[error("usage error: {0}")]
    Usage(&'static str),
}
