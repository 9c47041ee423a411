//! Relationships Module - Edge metadata, registry, and accessor containers

pub mod metadata;
pub mod registry;
pub mod lazy;
pub mod has_one;
pub mod has_many;
pub mod many_to_many;

// Re-export main types
pub use metadata::{
    pluralize, singularize, JunctionConfig, ReferentialAction, RelationshipKind,
    RelationshipMetadata,
};
pub use registry::{ModelInfo, RelationshipRegistry, ReverseAccessor};
pub use lazy::BelongsTo;
pub use has_one::HasOne;
pub use has_many::HasMany;
pub use many_to_many::ManyToMany;
