pub mod acp;
pub mod ap2;
pub mod dispatcher;

pub use dispatcher::dispatch;
