//! Per-request processing context
//!
//! Record resolution loads the target object once and attaches a frozen
//! snapshot to the request. Resolution never fails a request: any error
//! is logged and the context is left without an object, which the access
//! gate treats the same as a missing object.

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::entity::object;
use crate::identity::RequestIdentity;

/// Header-level facts storage reports for an object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeadMetadata {
    pub content_length: Option<i64>,
    pub content_type: Option<String>,
    pub version_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// External storage, as far as record resolution needs it
#[async_trait]
pub trait ObjectHead: Send + Sync {
    async fn head(&self, path: &str) -> anyhow::Result<HeadMetadata>;
}

/// Resolved object snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRecord {
    pub id: Uuid,
    pub path: String,
    pub name: Option<String>,
    pub public: bool,
    pub active: bool,
    pub head: Option<HeadMetadata>,
}

impl From<object::Model> for ObjectRecord {
    fn from(model: object::Model) -> Self {
        Self {
            id: model.id,
            path: model.path,
            name: model.name,
            public: model.public,
            active: model.active,
            head: None,
        }
    }
}

/// Identity and resolved object for one request
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub identity: RequestIdentity,
    pub object: Option<Arc<ObjectRecord>>,
}

impl RequestContext {
    pub fn new(identity: RequestIdentity, object: Option<ObjectRecord>) -> Self {
        Self {
            identity,
            object: object.map(Arc::new),
        }
    }
}

/// Loads object records for request contexts
#[derive(Clone)]
pub struct ObjectResolver {
    connection: DatabaseConnection,
    storage: Option<Arc<dyn ObjectHead>>,
}

impl ObjectResolver {
    pub fn new(connection: DatabaseConnection, storage: Option<Arc<dyn ObjectHead>>) -> Self {
        Self { connection, storage }
    }

    /// Object record merged with storage headers, or `None` on any failure
    pub async fn resolve(&self, object_id: Uuid) -> Option<ObjectRecord> {
        let model = match object::Entity::find_by_id(object_id).one(&self.connection).await {
            Ok(Some(model)) => model,
            Ok(None) => {
                debug!("Object {} not found", object_id);
                return None;
            }
            Err(e) => {
                warn!("Failed to load object {}: {}", object_id, e);
                return None;
            }
        };

        let mut record = ObjectRecord::from(model);
        if let Some(storage) = &self.storage {
            match storage.head(&record.path).await {
                Ok(head) => record.head = Some(head),
                Err(e) => {
                    warn!("Failed to read storage headers for object {}: {}", object_id, e);
                    return None;
                }
            }
        }
        Some(record)
    }
}
