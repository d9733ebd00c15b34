//! Object catalog
//!
//! This crate provides:
//! - Tag and metadata dictionaries shared across object versions
//! - Reconciliation of a version's attribute set against an incoming one,
//!   with orphan pruning
//! - Object permission grants and the access gate that consults them
//! - The app-mode guard matching presented credentials to server mode
//! - A thin axum HTTP surface wiring the guards in front of the stores
//!
//! Can be used as a library or standalone binary

pub mod app_mode;
pub mod attributes;
pub mod context;
pub mod database;
pub mod entity;
pub mod error;
pub mod gate;
pub mod identity;
pub mod permissions;
pub mod routes;
pub mod schema;
pub mod service;

// Re-export commonly used types
pub use app_mode::{check_app_mode, AuthMode};
pub use attributes::{
    AttributeKind, AttributeMatcher, AttributePair, AttributeRecord, AttributeStore, Reconciler,
    Reconciliation,
};
pub use context::{ObjectRecord, ObjectResolver, RequestContext};
pub use database::{settle, Database};
pub use error::{CatalogError, GateError, Result};
pub use gate::{AccessGate, Decision, DenyReason, Enforcement, GrantLookup};
pub use identity::{AuthType, IdentityVerifier, RequestIdentity, SYSTEM_USER};
pub use permissions::{Permission, PermissionFilter, PermissionStore, StoredGrants};
pub use service::{CatalogServiceRunner, ServiceConfig};
