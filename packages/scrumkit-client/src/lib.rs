pub mod config;
pub mod connection;
pub mod error;
pub mod log_bridge;
pub mod memory;
pub mod protocol;
pub mod rest;
pub mod session;
pub mod store;
pub mod subscription;
pub mod timer;
pub mod transport;
pub mod ws;

pub use connection::{ConnectionMonitor, ConnectionStatus, QueryRetry};
pub use error::{RealtimeError, SessionError, StoreError};
pub use memory::MemoryBackend;
pub use rest::RestStore;
pub use session::BoardSession;
pub use store::{BoardStore, SessionProbe};
pub use subscription::Subscription;
pub use transport::RealtimeTransport;
pub use ws::WsTransport;
