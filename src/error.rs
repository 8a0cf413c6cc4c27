// Error types for the BreweryDB client
use thiserror::Error;

use crate::transport::HttpMethod;
use crate::xml::XmlError;

// Every failure a client call can surface, split by category so callers can
// match on where things went wrong.
#[derive(Error, Debug)]
pub enum BreweryDbError {
    // Bad inputs caught before any request is sent
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0} not supported")]
    UnsupportedMethod(HttpMethod),

    // Network, TLS, timeout or any other failure below HTTP
    #[error("Transport error: {0}")]
    Transport(String),

    // The transfer succeeded but the body carried an `error` entry
    #[error("Brewerydb Service Error: {0}")]
    Service(String),

    // Only produced under `DecodePolicy::Strict`
    #[error("Decode error: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, BreweryDbError>;

impl BreweryDbError {
    pub fn is_transport(&self) -> bool {
        matches!(self, BreweryDbError::Transport(_))
    }

    pub fn is_service(&self) -> bool {
        matches!(self, BreweryDbError::Service(_))
    }
}

impl From<reqwest::Error> for BreweryDbError {
    fn from(err: reqwest::Error) -> Self {
        BreweryDbError::Transport(err.to_string())
    }
}

impl From<XmlError> for BreweryDbError {
    fn from(err: XmlError) -> Self {
        BreweryDbError::Decode(err.to_string())
    }
}
