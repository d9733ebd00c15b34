//! version entity
//! Versions of an object; anchor for tag and metadata associations

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "version")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub object_id: Uuid,
    pub s3_version_id: Option<String>,  // Version id reported by storage, if versioned
    pub mime_type: Option<String>,
    pub delete_marker: bool,
    pub created_by: Uuid,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::object::Entity",
        from = "Column::ObjectId",
        to = "super::object::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Object,

    #[sea_orm(has_many = "super::version_tag::Entity")]
    VersionTag,

    #[sea_orm(has_many = "super::version_metadata::Entity")]
    VersionMetadata,
}

impl Related<super::object::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Object.def()
    }
}

impl Related<super::version_tag::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::VersionTag.def()
    }
}

impl Related<super::version_metadata::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::VersionMetadata.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
