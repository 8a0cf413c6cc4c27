// Client library for the BreweryDB REST API

pub mod client;
pub mod config;
pub mod error;
pub mod params;
pub mod resources;
pub mod transport;
pub mod xml;

// Re-export key types for convenience
pub use client::{ApiResponse, BreweryDbClient, Diagnostics};
pub use config::{ClientConfig, DecodePolicy, ResponseFormat, DEFAULT_BASE_URL};
pub use error::{BreweryDbError, Result};
pub use params::{ParamValue, Params};
pub use resources::{BreweriesQuery, GeoFilter, SearchKind, SearchQuery};
pub use transport::{HttpMethod, HttpTransport, PreparedRequest, RawResponse, Transport};
pub use xml::{Normalized, XmlError};
