//! Object access gate
//!
//! Decides whether the actor behind a request may act on the resolved
//! object. Rules, first match wins:
//!
//! 1. enforcement disabled: allow
//! 2. no resolved object: deny
//! 3. public object and READ: allow
//! 4. no bearer identity with a subject: deny
//! 5. subject lacks the permission: deny, otherwise allow
//!
//! Callers only ever see [`GateError::Forbidden`]; the rule that denied
//! is logged.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{GateError, Result};
use crate::identity::AuthType;
use crate::permissions::Permission;

/// Whether permission checks run at all, fixed at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enforcement {
    /// No identity provider is configured; every request is allowed
    Disabled,
    Enforced,
}

/// Permission grants as the gate needs them
#[async_trait]
pub trait GrantLookup: Send + Sync {
    async fn granted_codes(&self, object_id: Uuid, user_id: Uuid) -> Result<Vec<Permission>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NoObjectContext,
    MissingIdentity,
    InsufficientPermission,
    LookupFailed,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DenyReason::NoObjectContext => "no object resolved for request",
            DenyReason::MissingIdentity => "missing bearer identity",
            DenyReason::InsufficientPermission => "insufficient permission",
            DenyReason::LookupFailed => "permission lookup failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

#[derive(Clone)]
pub struct AccessGate {
    enforcement: Enforcement,
    grants: Arc<dyn GrantLookup>,
}

impl AccessGate {
    pub fn new(enforcement: Enforcement, grants: Arc<dyn GrantLookup>) -> Self {
        Self { enforcement, grants }
    }

    pub fn enforcement(&self) -> Enforcement {
        self.enforcement
    }

    pub async fn decide(&self, permission: Permission, ctx: &RequestContext) -> Decision {
        if self.enforcement == Enforcement::Disabled {
            return Decision::Allow;
        }

        let Some(object) = ctx.object.as_ref() else {
            return Decision::Deny(DenyReason::NoObjectContext);
        };

        if object.public && permission == Permission::Read {
            return Decision::Allow;
        }

        let identity = &ctx.identity;
        if identity.auth_type != AuthType::Bearer || identity.subject_id.is_none() {
            return Decision::Deny(DenyReason::MissingIdentity);
        }

        let Some(user_id) = identity.user_id() else {
            debug!(
                "Subject {:?} is not a user id; no grants can exist for it",
                identity.subject_id
            );
            return Decision::Deny(DenyReason::InsufficientPermission);
        };

        match self.grants.granted_codes(object.id, user_id).await {
            Ok(codes) if codes.contains(&permission) => Decision::Allow,
            Ok(_) => Decision::Deny(DenyReason::InsufficientPermission),
            Err(e) => {
                error!("Permission lookup for object {} failed: {}", object.id, e);
                Decision::Deny(DenyReason::LookupFailed)
            }
        }
    }

    /// Allow, or a generic forbidden with the reason logged
    pub async fn authorize(&self, permission: Permission, ctx: &RequestContext) -> std::result::Result<(), GateError> {
        match self.decide(permission, ctx).await {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => {
                warn!(
                    object_id = ?ctx.object.as_ref().map(|o| o.id),
                    subject = ?ctx.identity.subject_id,
                    permission = %permission,
                    "Access denied: {}",
                    reason
                );
                Err(GateError::Forbidden)
            }
        }
    }
}
