//! Errors raised while loading configuration and reference data

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unreadable, unparsable or out-of-range configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reference data (boundary catalog) that is not usable GeoJSON
    #[error("Invalid GeoJSON: {0}")]
    InvalidGeoJson(String),
}
