pub mod clock;
pub mod crypto;
pub mod model;
pub mod secrets;

pub use clock::{Clock, SystemClock};
pub use model::{RedeemError, SecretRecord, Severity, Verification};
pub use secrets::{
    Store, SweepHandle, DEFAULT_RETENTION, DEFAULT_SWEEP_DELAY, DEFAULT_SWEEP_INTERVAL,
};
