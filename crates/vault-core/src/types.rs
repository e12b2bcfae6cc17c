use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Server-assigned identifier for a stored `Authorization`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuthorizationId(pub Uuid);

impl AuthorizationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }
}

impl Default for AuthorizationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AuthorizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for AuthorizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthorizationId({})", &self.0.to_string()[..8])
    }
}

impl std::str::FromStr for AuthorizationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Opaque tenant identifier. Scopes every store query.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

/// Server-assigned identifier for an outbound `Subscription`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned identifier for a `DeliveryAttempt`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct DeliveryAttemptId(pub Uuid);

impl DeliveryAttemptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeliveryAttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryAttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned identifier for an outbound logical event (`publish` call).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned identifier for an `AuditEvent`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct AuditEventId(pub u64);

impl fmt::Display for AuditEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned identifier for an `Alert`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct AlertId(pub u64);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The wire protocol an authorization was issued under. Immutable after create.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum Protocol {
    Ap2,
    Acp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ap2 => write!(f, "AP2"),
            Protocol::Acp => write!(f, "ACP"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AP2" => Ok(Protocol::Ap2),
            "ACP" => Ok(Protocol::Acp),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}

/// Lifecycle state of a stored `Authorization` (spec.md §4.5 state machine).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum AuthorizationStatus {
    Active,
    Valid,
    Used,
    Expired,
    Revoked,
}

impl AuthorizationStatus {
    /// Terminal statuses never transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Revoked | Self::Used)
    }
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "ACTIVE",
            Self::Valid => "VALID",
            Self::Used => "USED",
            Self::Expired => "EXPIRED",
            Self::Revoked => "REVOKED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AuthorizationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(Self::Active),
            "VALID" => Ok(Self::Valid),
            "USED" => Ok(Self::Used),
            "EXPIRED" => Ok(Self::Expired),
            "REVOKED" => Ok(Self::Revoked),
            other => Err(format!("unknown authorization status: {other}")),
        }
    }
}

/// Outcome of running a protocol verifier (C2/C3) over a payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum VerificationStatus {
    Valid,
    Expired,
    SigInvalid,
    IssuerUnknown,
    InvalidFormat,
    MissingRequiredField,
    ScopeInvalid,
    Revoked,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Valid => "VALID",
            Self::Expired => "EXPIRED",
            Self::SigInvalid => "SIG_INVALID",
            Self::IssuerUnknown => "ISSUER_UNKNOWN",
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::MissingRequiredField => "MISSING_REQUIRED_FIELD",
            Self::ScopeInvalid => "SCOPE_INVALID",
            Self::Revoked => "REVOKED",
        };
        write!(f, "{s}")
    }
}

/// The role a caller was authenticated as, supplied by the external
/// caller-identity provider (out of scope for this core — see spec.md §1).
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum CallerRole {
    Member,
    Admin,
}

/// `(user_id, tenant_id, role)` as handed to every core call by the
/// transport layer. The core never resolves identity itself.
#[derive(Clone, Debug)]
pub struct CallerContext {
    pub user_id: String,
    pub tenant_id: TenantId,
    pub role: CallerRole,
    pub ip_address: Option<String>,
}

impl CallerContext {
    pub fn new(user_id: impl Into<String>, tenant_id: TenantId, role: CallerRole) -> Self {
        Self { user_id: user_id.into(), tenant_id, role, ip_address: None }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, CallerRole::Admin)
    }
}
