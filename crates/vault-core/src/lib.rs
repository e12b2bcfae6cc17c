pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod model;
pub mod money;
pub mod types;

pub use clock::{Clock, SystemClock, TestClock};
pub use config::VaultConfig;
pub use constants::*;
pub use error::VaultError;
pub use model::*;
pub use money::Money;
pub use types::*;
