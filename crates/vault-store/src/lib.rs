pub mod alerts;
pub mod audit;
pub mod authorizations;
pub mod db;
pub mod delivery;
pub mod idempotency;
pub mod subscriptions;

pub use alerts::AlertStore;
pub use audit::AuditLog;
pub use authorizations::AuthorizationStore;
pub use db::StateDb;
pub use delivery::DeliveryStore;
pub use idempotency::IdempotencyStore;
pub use subscriptions::SubscriptionStore;
