pub mod ble;
pub mod ble_mock;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod scales;
pub mod session;
pub mod state;
pub mod types;

pub use config::ScaleConfig;
pub use scales::ScaleType;
pub use session::ScaleSession;
pub use types::*;
