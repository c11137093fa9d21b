pub mod error;
pub mod operation_outcome;
pub mod resource;
pub mod structure;
pub mod terminology;
pub mod validation;

pub use error::{KensaError, Result};
pub use operation_outcome::{
    CodeableConcept, Coding, IssueSeverity, IssueType, OperationOutcome, OperationOutcomeIssue,
};
pub use resource::{Meta, Resource, ResourceBuilder};
pub use structure::{LookupError, Revision, StructureConstraint, StructureRegistry, TypeTag};
pub use terminology::{InMemoryValueSets, OracleError, ValueSet, ValueSetOracle};
pub use validation::{
    IssueCode, ValidationIssue, ValidationOutcome, Validator, ValidatorOptions, assemble,
};
