use serde::{Deserialize, Serialize};
use std::fmt;

/// Primitive datatypes of the standard, checked lexically by the type checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Boolean,
    Integer,
    Integer64,
    UnsignedInt,
    PositiveInt,
    Decimal,
    String,
    Markdown,
    Code,
    Id,
    Uri,
    Url,
    Canonical,
    Oid,
    Uuid,
    Base64Binary,
    Date,
    DateTime,
    Instant,
    Time,
    Xhtml,
}

impl PrimitiveKind {
    pub fn from_code(code: &str) -> Option<Self> {
        let kind = match code {
            "boolean" => Self::Boolean,
            "integer" => Self::Integer,
            "integer64" => Self::Integer64,
            "unsignedInt" => Self::UnsignedInt,
            "positiveInt" => Self::PositiveInt,
            "decimal" => Self::Decimal,
            "string" => Self::String,
            "markdown" => Self::Markdown,
            "code" => Self::Code,
            "id" => Self::Id,
            "uri" => Self::Uri,
            "url" => Self::Url,
            "canonical" => Self::Canonical,
            "oid" => Self::Oid,
            "uuid" => Self::Uuid,
            "base64Binary" => Self::Base64Binary,
            "date" => Self::Date,
            "dateTime" => Self::DateTime,
            "instant" => Self::Instant,
            "time" => Self::Time,
            "xhtml" => Self::Xhtml,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Integer64 => "integer64",
            Self::UnsignedInt => "unsignedInt",
            Self::PositiveInt => "positiveInt",
            Self::Decimal => "decimal",
            Self::String => "string",
            Self::Markdown => "markdown",
            Self::Code => "code",
            Self::Id => "id",
            Self::Uri => "uri",
            Self::Url => "url",
            Self::Canonical => "canonical",
            Self::Oid => "oid",
            Self::Uuid => "uuid",
            Self::Base64Binary => "base64Binary",
            Self::Date => "date",
            Self::DateTime => "dateTime",
            Self::Instant => "instant",
            Self::Time => "time",
            Self::Xhtml => "xhtml",
        }
    }
}

/// Shape of a coded element bound to a value set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedKind {
    Code,
    Coding,
    CodeableConcept,
}

impl CodedKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Coding => "Coding",
            Self::CodeableConcept => "CodeableConcept",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingStrength {
    Required,
    Extensible,
    Preferred,
    Example,
}

impl BindingStrength {
    /// Only required and extensible bindings constrain the permitted codes.
    pub fn is_checked(self) -> bool {
        matches!(self, Self::Required | Self::Extensible)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub value_set: String,
    pub strength: BindingStrength,
}

/// Declared type of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    Primitive(PrimitiveKind),
    /// Named complex datatype (HumanName, Quantity, ...).
    Complex(String),
    /// Inline sub-structure, registered under its dotted path (`Patient.contact`).
    Backbone(String),
    /// Reference to another resource; empty `targets` means any resource.
    Reference { targets: Vec<String> },
    /// Inline resource typed by its own `resourceType`.
    Resource,
    Coded { kind: CodedKind, binding: Binding },
}

impl TypeTag {
    pub fn name(&self) -> &str {
        match self {
            Self::Primitive(kind) => kind.as_str(),
            Self::Complex(name) | Self::Backbone(name) => name,
            Self::Reference { .. } => "Reference",
            Self::Resource => "Resource",
            Self::Coded { kind, .. } => kind.as_str(),
        }
    }

    /// Primitive values carry their extensions in a sibling `_field` key.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Primitive(_)
                | Self::Coded {
                    kind: CodedKind::Code,
                    ..
                }
        )
    }

    /// Suffix of a choice member's name: `deceased[x]` + `dateTime` -> `deceasedDateTime`.
    pub fn choice_suffix(&self) -> String {
        let name = self.name();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
            None => String::new(),
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference { targets } if !targets.is_empty() => {
                write!(f, "Reference({})", targets.join("|"))
            }
            other => f.write_str(other.name()),
        }
    }
}

/// Upper occurrence bound of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Max {
    Bounded(u32),
    Unbounded,
}

impl Max {
    pub fn allows(self, count: usize) -> bool {
        match self {
            Self::Bounded(max) => count <= max as usize,
            Self::Unbounded => true,
        }
    }

    /// Repeating elements are represented as JSON arrays.
    pub fn is_repeating(self) -> bool {
        match self {
            Self::Bounded(max) => max > 1,
            Self::Unbounded => true,
        }
    }
}

impl fmt::Display for Max {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(max) => write!(f, "{}", max),
            Self::Unbounded => f.write_str("*"),
        }
    }
}

impl std::str::FromStr for Max {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            return Ok(Self::Unbounded);
        }
        s.parse::<u32>()
            .map(Self::Bounded)
            .map_err(|_| format!("invalid max cardinality '{}'", s))
    }
}

/// One declared element of a resource or datatype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureConstraint {
    /// JSON property name within the owning type (`active`, `deceasedBoolean`).
    pub path: String,
    pub types: Vec<TypeTag>,
    pub min: u32,
    pub max: Max,
    /// Shared stem of a choice element (`deceased` for `deceased[x]`).
    pub choice_group: Option<String>,
    pub is_backbone: bool,
}

impl StructureConstraint {
    pub fn is_required(&self) -> bool {
        self.min > 0
    }

    pub fn is_primitive(&self) -> bool {
        self.types.iter().any(TypeTag::is_primitive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choice_suffix() {
        assert_eq!(
            TypeTag::Primitive(PrimitiveKind::DateTime).choice_suffix(),
            "DateTime"
        );
        assert_eq!(TypeTag::Complex("Quantity".into()).choice_suffix(), "Quantity");
        assert_eq!(
            TypeTag::Reference { targets: vec![] }.choice_suffix(),
            "Reference"
        );
    }

    #[test]
    fn test_max_bounds() {
        assert!(Max::Bounded(1).allows(1));
        assert!(!Max::Bounded(1).allows(2));
        assert!(Max::Unbounded.allows(1000));
        assert!(!Max::Bounded(1).is_repeating());
        assert!(Max::Bounded(3).is_repeating());
        assert_eq!("*".parse::<Max>().unwrap(), Max::Unbounded);
        assert!("many".parse::<Max>().is_err());
    }

    #[test]
    fn test_reference_display_lists_targets() {
        let tag = TypeTag::Reference {
            targets: vec!["Patient".into(), "Group".into()],
        };
        assert_eq!(tag.to_string(), "Reference(Patient|Group)");
    }
}
