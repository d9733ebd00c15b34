//! Sea-ORM entities for catalog tables

pub mod metadata;
pub mod object;
pub mod object_permission;
pub mod tag;
pub mod version;
pub mod version_metadata;
pub mod version_tag;

// Re-export entities for convenience
pub use metadata::Entity as Metadata;
pub use object::Entity as Object;
pub use object_permission::Entity as ObjectPermission;
pub use tag::Entity as Tag;
pub use version::Entity as Version;
pub use version_metadata::Entity as VersionMetadata;
pub use version_tag::Entity as VersionTag;
