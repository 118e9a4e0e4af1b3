use thiserror::Error;

use super::upcode::DecodeError;

/// A handy [`std::result::Result`] alias with the [`enum@Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error that may occur while parsing records.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("unknown record tag `{0}`")]
    UnknownTag(String),

    #[error("`{tag}` record with only {count} fields")]
    Arity { tag: &'static str, count: usize },

    #[error("expected an integer for `{field}`, got `{value}`")]
    InvalidInteger { field: &'static str, value: String },
}
