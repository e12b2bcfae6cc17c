pub mod filter;
pub mod service;

pub use filter::{SearchFilter, SortBy};
pub use service::{AuthorizationService, AuthorizationServiceConfig};
