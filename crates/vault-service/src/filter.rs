use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use vault_core::{AuthorizationStatus, Protocol};

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 200;

/// Fields a search can be sorted by (§4.5: "Sortable by `created_at`,
/// `expires_at`, `amount_limit`").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    CreatedAt,
    ExpiresAt,
    AmountLimit,
}

/// Search filters over one tenant's authorizations (§4.5). `tenant_id` is
/// never part of this struct — it always comes from the caller context, so
/// a filter can never be constructed that reaches across tenants.
#[derive(Clone, Debug, Default)]
pub struct SearchFilter {
    pub protocol: Option<Protocol>,
    pub status: Option<AuthorizationStatus>,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub currency: Option<String>,
    pub expires_before: Option<DateTime<Utc>>,
    pub expires_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub created_after: Option<DateTime<Utc>>,
    pub include_deleted: bool,
    pub sort_by: SortBy,
    pub offset: usize,
    pub limit: usize,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self { offset: 0, limit: DEFAULT_LIMIT, ..Default::default() }
    }

    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_LIMIT
        } else {
            self.limit.min(MAX_LIMIT)
        }
    }
}
