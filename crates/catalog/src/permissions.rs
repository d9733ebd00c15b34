//! Object permission grants

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::entity::object_permission;
use crate::error::{CatalogError, Result};
use crate::gate::GrantLookup;

/// Permission codes that can be granted on an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Permission {
    Create,
    Read,
    Update,
    Delete,
    Manage,
}

impl Permission {
    pub const ALL: [Permission; 5] = [
        Permission::Create,
        Permission::Read,
        Permission::Update,
        Permission::Delete,
        Permission::Manage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Create => "CREATE",
            Permission::Read => "READ",
            Permission::Update => "UPDATE",
            Permission::Delete => "DELETE",
            Permission::Manage => "MANAGE",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CREATE" => Ok(Permission::Create),
            "READ" => Ok(Permission::Read),
            "UPDATE" => Ok(Permission::Update),
            "DELETE" => Ok(Permission::Delete),
            "MANAGE" => Ok(Permission::Manage),
            _ => Err(CatalogError::InvalidPermission(s.to_string())),
        }
    }
}

/// Conjunctive search filter; empty fields match anything
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionFilter {
    #[serde(default)]
    pub object_id: Option<Uuid>,
    #[serde(default)]
    pub user_ids: Vec<Uuid>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl PermissionFilter {
    fn condition(&self) -> Condition {
        let mut cond = Condition::all();
        if let Some(object_id) = self.object_id {
            cond = cond.add(object_permission::Column::ObjectId.eq(object_id));
        }
        if !self.user_ids.is_empty() {
            cond = cond.add(object_permission::Column::UserId.is_in(self.user_ids.clone()));
        }
        if !self.permissions.is_empty() {
            cond = cond.add(
                object_permission::Column::PermissionCode
                    .is_in(self.permissions.iter().map(|p| p.as_str())),
            );
        }
        cond
    }
}

/// Data access for object permission grants.
///
/// Reads accept any connection; writes require the caller's unit of work.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionStore;

impl PermissionStore {
    pub async fn search<C>(&self, db: &C, filter: &PermissionFilter) -> Result<Vec<object_permission::Model>>
    where
        C: ConnectionTrait,
    {
        Ok(object_permission::Entity::find()
            .filter(filter.condition())
            .order_by_asc(object_permission::Column::CreatedAt)
            .all(db)
            .await?)
    }

    /// Permission codes `user_id` holds on `object_id`
    pub async fn granted_codes<C>(&self, db: &C, object_id: Uuid, user_id: Uuid) -> Result<Vec<Permission>>
    where
        C: ConnectionTrait,
    {
        let filter = PermissionFilter {
            object_id: Some(object_id),
            user_ids: vec![user_id],
            permissions: Vec::new(),
        };
        let mut codes = Vec::new();
        for grant in self.search(db, &filter).await? {
            codes.push(grant.permission_code.parse()?);
        }
        Ok(codes)
    }

    /// Grant `codes` on `object_id` to `user_id`; existing grants are skipped.
    ///
    /// Returns only the rows this call inserted.
    pub async fn grant(
        &self,
        txn: &DatabaseTransaction,
        object_id: Uuid,
        user_id: Uuid,
        codes: &[Permission],
        actor: Uuid,
    ) -> Result<Vec<object_permission::Model>> {
        let held = self.granted_codes(txn, object_id, user_id).await?;

        let mut wanted: Vec<Permission> = codes.iter().copied().filter(|c| !held.contains(c)).collect();
        wanted.sort();
        wanted.dedup();

        let now = Utc::now();
        let mut inserted = Vec::with_capacity(wanted.len());
        for code in wanted {
            let grant = object_permission::ActiveModel {
                id: Set(Uuid::new_v4()),
                object_id: Set(object_id),
                user_id: Set(user_id),
                permission_code: Set(code.as_str().to_string()),
                created_by: Set(actor),
                created_at: Set(now),
            };
            inserted.push(grant.insert(txn).await?);
        }

        if !inserted.is_empty() {
            info!(
                "Granted {} permission(s) on object {} to user {}",
                inserted.len(),
                object_id,
                user_id
            );
        }
        Ok(inserted)
    }

    /// Revoke grants on `object_id`; empty `user_ids` or `codes` match all
    pub async fn revoke(
        &self,
        txn: &DatabaseTransaction,
        object_id: Uuid,
        user_ids: &[Uuid],
        codes: &[Permission],
    ) -> Result<u64> {
        let filter = PermissionFilter {
            object_id: Some(object_id),
            user_ids: user_ids.to_vec(),
            permissions: codes.to_vec(),
        };
        let removed = object_permission::Entity::delete_many()
            .filter(filter.condition())
            .exec(txn)
            .await?
            .rows_affected;

        debug!("Revoked {} permission(s) on object {}", removed, object_id);
        Ok(removed)
    }
}

/// Grant lookup backed by the permission table
#[derive(Clone)]
pub struct StoredGrants {
    connection: DatabaseConnection,
    store: PermissionStore,
}

impl StoredGrants {
    pub fn new(connection: DatabaseConnection) -> Self {
        Self {
            connection,
            store: PermissionStore,
        }
    }
}

#[async_trait]
impl GrantLookup for StoredGrants {
    async fn granted_codes(&self, object_id: Uuid, user_id: Uuid) -> Result<Vec<Permission>> {
        self.store
            .granted_codes(&self.connection, object_id, user_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_parse_roundtrip() {
        for permission in Permission::ALL {
            assert_eq!(permission.as_str().parse::<Permission>().unwrap(), permission);
        }
        assert_eq!("read".parse::<Permission>().unwrap(), Permission::Read);
        assert!("WRITE_ALL".parse::<Permission>().is_err());
    }

    #[test]
    fn test_permission_serde_uses_codes() {
        let json = serde_json::to_string(&Permission::Manage).unwrap();
        assert_eq!(json, "\"MANAGE\"");
        let parsed: Permission = serde_json::from_str("\"DELETE\"").unwrap();
        assert_eq!(parsed, Permission::Delete);
    }
}
