pub mod alerts;
pub mod expiry;
pub mod handle;
pub mod retention;
pub mod retrier;

pub use handle::WorkerHandle;
