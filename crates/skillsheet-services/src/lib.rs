//! Backend implementations of the engine's collaborator traits.
//!
//! In-memory backends for tests and single-process deployments, HTTP
//! backends for the training-record store and notification service, and the
//! configuration that selects between them.

pub mod config;
pub mod error;
pub mod files;
pub mod http;
pub mod memory;

pub use config::{load_config, load_config_from, NotificationConfig, RecordStoreConfig, ServicesConfig};
pub use error::ServiceError;
pub use files::FileTemplateRepository;
pub use http::{HttpEmailSink, HttpRecordStore, NullSink};
pub use memory::{MemoryDirectory, MemoryTemplateRepository};
