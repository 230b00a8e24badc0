pub mod clock;
pub mod manager;
pub mod models;

pub use clock::{Clock, SystemClock};
pub use manager::RiskManager;
pub use models::*;
