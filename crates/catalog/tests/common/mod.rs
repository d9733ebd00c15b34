//! Shared fixtures for catalog integration tests
#![allow(dead_code)]

use catalog::database::Database;
use catalog::entity::{object, version};
use catalog::schema::create_schema;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use uuid::Uuid;

/// Fresh in-memory database with every table created
pub async fn setup() -> Database {
    let db = Database::new("sqlite::memory:").await.unwrap();
    create_schema(db.connection()).await.unwrap();
    db
}

pub async fn seed_object(db: &Database, public: bool) -> Uuid {
    let id = Uuid::new_v4();
    let now = Utc::now();
    object::ActiveModel {
        id: Set(id),
        path: Set(format!("bucket/{}.bin", id)),
        name: Set(Some("fixture.bin".to_string())),
        public: Set(public),
        active: Set(true),
        created_by: Set(Uuid::nil()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db.connection())
    .await
    .unwrap();
    id
}

pub async fn seed_version(db: &Database, object_id: Uuid) -> Uuid {
    let id = Uuid::new_v4();
    version::ActiveModel {
        id: Set(id),
        object_id: Set(object_id),
        s3_version_id: Set(None),
        mime_type: Set(Some("application/octet-stream".to_string())),
        delete_marker: Set(false),
        created_by: Set(Uuid::nil()),
        created_at: Set(Utc::now()),
    }
    .insert(db.connection())
    .await
    .unwrap();
    id
}

/// Object with a single version
pub async fn seed_object_version(db: &Database, public: bool) -> (Uuid, Uuid) {
    let object_id = seed_object(db, public).await;
    let version_id = seed_version(db, object_id).await;
    (object_id, version_id)
}
