//! Receptionist gateway: cached outbound HTTP requests over a pluggable
//! cache store, plus a parallel path for recording inbound callbacks.

pub mod error;
pub mod gateway;
pub mod log;
pub mod network;
pub mod observer;
pub mod storage;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{GatewayError, StorageError, TransportError};
pub use gateway::{CallbackOptions, Receptionist, ReceptionistConfig, RequestOptions};
pub use log::{CallbackLog, RequestLog, DEFAULT_LOG_CAPACITY};
pub use observer::{CompositeObserver, GatewayObserver};
pub use storage::{open_store, BackendConfig, BackendKind, CacheStore};
pub use transport::{HttpTransport, ReqwestTransport, TransportConfig};
