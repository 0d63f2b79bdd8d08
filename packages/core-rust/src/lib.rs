//! Receptionist core: cache entry types, route table, header set and API definitions.

pub mod clock;
pub mod config;
pub mod headers;
pub mod routes;
pub mod types;
pub mod validation;

pub use clock::{ClockSource, FixedClock, SystemClock};
pub use config::{ApiDefinition, ConfigError};
pub use headers::{HeaderSet, DEFAULT_ACCEPT};
pub use routes::{format_template, FormatParams, RouteFormatError, RouteTable};
pub use types::{Body, CallbackEntry, RequestEntry, Response};
pub use validation::ValidationResult;
