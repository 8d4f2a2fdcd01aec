//! Model declarations and normalization.

pub mod definition;
pub mod loader;
pub mod normalize;

pub use definition::{
    AttributeDef, CastType, ColumnReference, ColumnType, DynamoAttrType, IndexDef,
    ModelDefinition, RawModel, RelationDecl, ThroughTarget, TraitFlags,
};
pub use loader::{JsonModelSource, ModelSource, StaticModelSource};
pub use normalize::{
    normalize, Attribute, NormalizedModel, RelationKind, RelationSet, RelationTarget,
};
