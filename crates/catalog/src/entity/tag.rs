//! tag entity
//! Shared (key, value) tag dictionary, unique on (key, value)

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "tag")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub key: String,
    pub value: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::version_tag::Entity")]
    VersionTag,
}

impl Related<super::version_tag::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::VersionTag.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
