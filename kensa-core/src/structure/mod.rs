//! Structural metadata of every resource, datatype and backbone element,
//! per FHIR revision.

pub mod constraint;
pub mod loader;
pub mod registry;
pub mod revision;

pub use constraint::{
    Binding, BindingStrength, CodedKind, Max, PrimitiveKind, StructureConstraint, TypeTag,
};
pub use loader::{DefinitionFile, DefinitionLoader, TypeKind};
pub use registry::{LookupError, StructureRegistry, TypeDefinition};
pub use revision::Revision;
