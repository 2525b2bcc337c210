pub mod config;
pub mod offload;
pub mod protocol;
pub mod session;
pub mod sync;
pub mod telemetry;
pub mod transport;

pub use config::MonitorConfig;
pub use session::{ConnectionState, SessionError};
pub use session::multiplexer::ConnectionMultiplexer;
pub use sync::coordinator::MonitorSync;
pub use sync::SnapshotFetcher;
