// HTTP front end: an in-memory entity service behind axum, with `$batch`
// handled by the batch coordinator.
pub mod config;
pub mod json;
pub mod logging;
pub mod path;
pub mod server;
pub mod service;

pub use config::{ConfigError, ServerConfig};
pub use logging::{init_logging, init_test_logging};
pub use path::{ResourcePath, Segment};
pub use server::ODataServer;
pub use service::{BoundFunction, EntityService};
