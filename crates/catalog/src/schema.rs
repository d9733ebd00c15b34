//! Table bootstrap derived from the entities
//!
//! Creates missing tables and the unique indexes the stores rely on.
//! This is not a migration framework; existing tables are left alone.

use sea_orm::sea_query::Index;
use sea_orm::{ConnectionTrait, DbErr, EntityTrait, Schema};
use tracing::info;

use crate::entity::{
    metadata, object, object_permission, tag, version, version_metadata, version_tag,
};

/// Create every catalog table and index that does not exist yet
pub async fn create_schema<C>(db: &C) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    let schema = Schema::new(db.get_database_backend());

    // Parents before children so foreign keys resolve
    create_table(db, &schema, object::Entity).await?;
    create_table(db, &schema, version::Entity).await?;
    create_table(db, &schema, tag::Entity).await?;
    create_table(db, &schema, metadata::Entity).await?;
    create_table(db, &schema, version_tag::Entity).await?;
    create_table(db, &schema, version_metadata::Entity).await?;
    create_table(db, &schema, object_permission::Entity).await?;

    let indexes = [
        Index::create()
            .name("idx_tag_key_value")
            .table(tag::Entity)
            .col(tag::Column::Key)
            .col(tag::Column::Value)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_metadata_key_value")
            .table(metadata::Entity)
            .col(metadata::Column::Key)
            .col(metadata::Column::Value)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_object_permission_grant")
            .table(object_permission::Entity)
            .col(object_permission::Column::ObjectId)
            .col(object_permission::Column::UserId)
            .col(object_permission::Column::PermissionCode)
            .unique()
            .if_not_exists()
            .to_owned(),
    ];

    let backend = db.get_database_backend();
    for index in indexes {
        db.execute(backend.build(&index)).await?;
    }

    info!("Catalog schema is in place");
    Ok(())
}

async fn create_table<C, E>(db: &C, schema: &Schema, entity: E) -> Result<(), DbErr>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(db.get_database_backend().build(&stmt)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use sea_orm::PaginatorTrait;

    #[tokio::test]
    async fn test_create_schema_is_repeatable() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let db = db.connection();
        create_schema(db).await.unwrap();
        create_schema(db).await.unwrap();

        assert_eq!(tag::Entity::find().count(db).await.unwrap(), 0);
        assert_eq!(version_metadata::Entity::find().count(db).await.unwrap(), 0);
    }
}
