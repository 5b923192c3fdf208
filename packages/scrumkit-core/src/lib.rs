pub mod config;
pub mod cursor;
pub mod errors;
pub mod positions;
pub mod presence;
pub mod rate_limit;
pub mod realtime;
pub mod retry;
pub mod templates;
pub mod timer;
pub mod types;
