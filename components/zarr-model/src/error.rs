use std::fmt;

/// The taxonomy of errors the core recognises, independent of how they are
/// eventually reported over HTTP (see `zarr-projection` for the status-code
/// mapping).
#[derive(Clone, Debug)]
pub enum ServiceError {
    /// A numeric component of a request path failed to parse.
    BadRequest(String),
    /// Image id, resolution, chunk index, or path did not resolve to anything.
    NotFound(String),
    /// The metadata source or pixel source failed.
    Upstream(String),
    /// A configuration value failed validation at construction.
    Config(String),
}

impl ServiceError {
    pub fn not_found(detail: impl Into<String>) -> Self {
        ServiceError::NotFound(detail.into())
    }

    pub fn upstream(detail: impl Into<String>) -> Self {
        ServiceError::Upstream(detail.into())
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        ServiceError::BadRequest(detail.into())
    }

    pub fn config(detail: impl Into<String>) -> Self {
        ServiceError::Config(detail.into())
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::BadRequest(detail) => write!(f, "failed to parse integers: {detail}"),
            ServiceError::NotFound(detail) => write!(f, "{detail}"),
            ServiceError::Upstream(detail) => write!(f, "query failed: {detail}"),
            ServiceError::Config(detail) => write!(f, "invalid configuration: {detail}"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<std::num::ParseIntError> for ServiceError {
    fn from(err: std::num::ParseIntError) -> Self {
        ServiceError::BadRequest(err.to_string())
    }
}
