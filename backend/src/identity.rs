//! Caller identities, roles, and user profiles.
//!
//! The platform in front of this service authenticates callers and forwards
//! an opaque identity string in a request header. The service never parses
//! that string; it only compares it.

use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest, web};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::{Ready, ready};
use tracing::info;

/// Textual form of the platform's anonymous principal.
pub const ANONYMOUS_IDENTITY: &str = "2vxsx-fae";

/// Default header carrying the caller identity.
pub const DEFAULT_IDENTITY_HEADER: &str = "x-caller-identity";

/// Opaque, comparable caller identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wrap a raw identity string. Returns `None` for the anonymous form.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == ANONYMOUS_IDENTITY {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is making the current call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    Authenticated(Identity),
}

impl Caller {
    pub fn from_header(value: Option<&str>) -> Self {
        match value.and_then(Identity::new) {
            Some(identity) => Self::Authenticated(identity),
            None => Self::Anonymous,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated(identity) => Some(identity),
        }
    }
}

/// Name of the header the extractor reads, registered as app data.
#[derive(Debug, Clone)]
pub struct IdentityHeader(pub String);

impl FromRequest for Caller {
    type Error = Infallible;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let header = req
            .app_data::<web::Data<IdentityHeader>>()
            .map(|h| h.0.as_str())
            .unwrap_or(DEFAULT_IDENTITY_HEADER);
        let value = req.headers().get(header).and_then(|v| v.to_str().ok());
        ready(Ok(Caller::from_header(value)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Guest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minecraft_username: Option<String>,
}

/// Role assignments and profiles, keyed by identity.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RoleRegistry {
    roles: HashMap<Identity, Role>,
    profiles: HashMap<Identity, UserProfile>,
    /// Set by the first successful claim and never cleared.
    #[serde(default)]
    admin_claimed: bool,
}

impl RoleRegistry {
    pub fn role_of(&self, caller: &Caller) -> Role {
        match caller {
            Caller::Anonymous => Role::Guest,
            Caller::Authenticated(identity) => {
                self.roles.get(identity).copied().unwrap_or(Role::User)
            }
        }
    }

    pub fn is_admin(&self, caller: &Caller) -> bool {
        self.role_of(caller) == Role::Admin
    }

    pub fn has_admin(&self) -> bool {
        self.roles.values().any(|r| *r == Role::Admin)
    }

    /// Overwrite `target`'s role. Authorization is the caller's concern.
    pub fn assign(&mut self, target: Identity, role: Role) {
        self.roles.insert(target, role);
    }

    /// Grant admin to `identity` iff the bootstrap was never used and no
    /// admin exists. Demoting every admin later does not re-open it.
    ///
    /// Must run under the same exclusive borrow as every other role write.
    pub fn claim_first_admin(&mut self, identity: &Identity) -> bool {
        if self.admin_claimed || self.has_admin() {
            return false;
        }
        self.admin_claimed = true;
        self.roles.insert(identity.clone(), Role::Admin);
        info!(identity = %identity, "First admin claimed");
        true
    }

    pub fn profile(&self, identity: &Identity) -> Option<&UserProfile> {
        self.profiles.get(identity)
    }

    pub fn save_profile(&mut self, identity: Identity, profile: UserProfile) {
        self.profiles.insert(identity, profile);
    }
}
