//! metadata entity
//! Shared (key, value) metadata dictionary, unique on (key, value)

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "metadata")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(column_type = "String(StringLen::N(510))")]
    pub key: String,  // Always lowercase; may be longer than the key as sent
    pub value: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::version_metadata::Entity")]
    VersionMetadata,
}

impl Related<super::version_metadata::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::VersionMetadata.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
