//! Validation of JSON documents against the structure tables
//!
//! - `type_checker`: one value against the permitted types of an element
//! - `resolver`: cardinality and choice groups of one object
//! - `validator`: work-list traversal and the terminology phase
//! - `outcome`: assembly of the final issue list

pub mod issue;
pub mod outcome;
pub mod resolver;
pub mod type_checker;
pub mod validator;

pub use issue::{IssueCode, ValidationIssue};
pub use outcome::{ValidationOutcome, assemble};
pub use resolver::{FieldPresence, resolve};
pub use type_checker::{TypeCheckResult, check};
pub use validator::{Validator, ValidatorOptions};
