//! Parsing errors for the identifier types in this crate.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum IdParseError {
    #[error("identifier is not valid hex")]
    InvalidHex,
    #[error("identifier has the wrong byte length")]
    WrongLength,
}
