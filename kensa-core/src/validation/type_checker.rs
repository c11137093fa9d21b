use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::structure::{CodedKind, PrimitiveKind, TypeTag};

// Lexical rules of the JSON representation of primitive types.
static DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2][0-9]|3[0-1]))?)?$")
        .expect("valid date regex")
});
static DATE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2][0-9]|3[0-1])(T([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?(Z|(\+|-)((0[0-9]|1[0-3]):[0-5][0-9]|14:00)))?)?)?$")
        .expect("valid dateTime regex")
});
static INSTANT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)-(0[1-9]|1[0-2])-(0[1-9]|[1-2][0-9]|3[0-1])T([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?(Z|(\+|-)((0[0-9]|1[0-3]):[0-5][0-9]|14:00))$")
        .expect("valid instant regex")
});
static TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?$")
        .expect("valid time regex")
});
static CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s]+( [^\s]+)*$").expect("valid code regex"));
static ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\-\.]{1,64}$").expect("valid id regex"));
static OID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^urn:oid:[0-2](\.(0|[1-9][0-9]*))+$").expect("valid oid regex")
});
static UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^urn:uuid:[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("valid uuid regex")
});
static BASE64: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*([0-9a-zA-Z\+/=]){4}\s*)+$").expect("valid base64 regex")
});
static INTEGER64: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(0|[-+]?[1-9][0-9]*)$").expect("valid integer64 regex"));

/// Result of checking one value against the permitted types of an element.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeCheckResult<'t> {
    /// The first permitted type the value conforms to.
    Ok(&'t TypeTag),
    Mismatch {
        expected: String,
        observed: &'static str,
        /// Set when the JSON kind was right but the content was not.
        reason: Option<String>,
    },
}

impl TypeCheckResult<'_> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Diagnostic text for a mismatch
    pub fn describe(&self) -> Option<String> {
        match self {
            Self::Ok(_) => None,
            Self::Mismatch {
                expected,
                observed,
                reason: Some(reason),
            } => Some(format!("expected {}, found {} ({})", expected, observed, reason)),
            Self::Mismatch {
                expected,
                observed,
                reason: None,
            } => Some(format!("expected {}, found {}", expected, observed)),
        }
    }
}

/// JSON kind of a value, for diagnostics.
pub fn observed_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Check a single (non-array) value against the permitted types.
///
/// Complex values only have their outer shape checked here; their content is
/// validated by the caller descending into them.
pub fn check<'t>(value: &Value, allowed: &'t [TypeTag]) -> TypeCheckResult<'t> {
    let mut reason = None;

    for tag in allowed {
        match check_tag(value, tag) {
            Ok(()) => return TypeCheckResult::Ok(tag),
            Err(Some(r)) if reason.is_none() => reason = Some(r),
            Err(_) => {}
        }
    }

    TypeCheckResult::Mismatch {
        expected: allowed
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" | "),
        observed: observed_kind(value),
        reason,
    }
}

/// `Err(None)` when the JSON kind is wrong, `Err(Some(reason))` when the kind
/// is right but the content is not.
fn check_tag(value: &Value, tag: &TypeTag) -> Result<(), Option<String>> {
    match tag {
        TypeTag::Primitive(kind) => check_primitive(*kind, value),
        TypeTag::Coded {
            kind: CodedKind::Code,
            ..
        } => check_primitive(PrimitiveKind::Code, value),
        TypeTag::Reference { targets } => check_reference(value, targets),
        TypeTag::Complex(_) | TypeTag::Backbone(_) | TypeTag::Resource | TypeTag::Coded { .. } => {
            if value.is_object() {
                Ok(())
            } else {
                Err(None)
            }
        }
    }
}

fn check_primitive(kind: PrimitiveKind, value: &Value) -> Result<(), Option<String>> {
    match kind {
        PrimitiveKind::Boolean => value.is_boolean().then_some(()).ok_or(None),
        PrimitiveKind::Decimal => value.is_number().then_some(()).ok_or(None),
        PrimitiveKind::Integer | PrimitiveKind::UnsignedInt | PrimitiveKind::PositiveInt => {
            check_integer(kind, value)
        }
        _ => {
            let Some(text) = value.as_str() else {
                return Err(None);
            };
            if text.is_empty() {
                return Err(Some("empty string".to_string()));
            }
            if lexically_valid(kind, text) {
                Ok(())
            } else {
                Err(Some(format!("'{}' is not a valid {}", text, kind.as_str())))
            }
        }
    }
}

fn check_integer(kind: PrimitiveKind, value: &Value) -> Result<(), Option<String>> {
    let Value::Number(number) = value else {
        return Err(None);
    };
    let Some(n) = number.as_i64().filter(|n| i32::try_from(*n).is_ok()) else {
        return Err(Some(format!("{} is not a 32-bit integer", number)));
    };
    match kind {
        PrimitiveKind::UnsignedInt if n < 0 => Err(Some(format!("{} is negative", n))),
        PrimitiveKind::PositiveInt if n < 1 => Err(Some(format!("{} is not positive", n))),
        _ => Ok(()),
    }
}

fn lexically_valid(kind: PrimitiveKind, text: &str) -> bool {
    match kind {
        PrimitiveKind::String | PrimitiveKind::Markdown => true,
        PrimitiveKind::Code => CODE.is_match(text),
        PrimitiveKind::Id => ID.is_match(text),
        PrimitiveKind::Uri | PrimitiveKind::Url | PrimitiveKind::Canonical => {
            !text.chars().any(char::is_whitespace)
        }
        PrimitiveKind::Oid => OID.is_match(text),
        PrimitiveKind::Uuid => UUID.is_match(text),
        PrimitiveKind::Base64Binary => BASE64.is_match(text),
        PrimitiveKind::Date => DATE.is_match(text),
        PrimitiveKind::DateTime => DATE_TIME.is_match(text),
        PrimitiveKind::Instant => INSTANT.is_match(text),
        PrimitiveKind::Time => TIME.is_match(text),
        PrimitiveKind::Integer64 => INTEGER64.is_match(text) && text.parse::<i64>().is_ok(),
        PrimitiveKind::Xhtml => text.trim_start().starts_with("<div"),
        // JSON-typed kinds are handled before reaching here
        PrimitiveKind::Boolean
        | PrimitiveKind::Decimal
        | PrimitiveKind::Integer
        | PrimitiveKind::UnsignedInt
        | PrimitiveKind::PositiveInt => false,
    }
}

/// A reference needs something identifying it. Its target is never resolved,
/// only the resource type it names is compared with the permitted targets.
fn check_reference(value: &Value, targets: &[String]) -> Result<(), Option<String>> {
    let Some(object) = value.as_object() else {
        return Err(None);
    };

    if !["reference", "identifier", "display", "extension"]
        .iter()
        .any(|key| object.contains_key(*key))
    {
        return Err(Some(
            "reference has none of reference, identifier or display".to_string(),
        ));
    }

    if targets.is_empty() || targets.iter().any(|t| t == "Resource") {
        return Ok(());
    }

    let named_types = object
        .get("reference")
        .and_then(Value::as_str)
        .and_then(referenced_type)
        .into_iter()
        .chain(
            object
                .get("type")
                .and_then(Value::as_str)
                .map(|t| t.rsplit('/').next().unwrap_or(t)),
        );

    for named in named_types {
        if !targets.iter().any(|t| t == named) {
            return Err(Some(format!(
                "reference to {} is not permitted here",
                named
            )));
        }
    }

    Ok(())
}

/// Resource type named by a literal reference (`Patient/1`,
/// `http://server/fhir/Patient/1/_history/2`). Local (`#id`) and URN
/// references name no type.
pub fn referenced_type(reference: &str) -> Option<&str> {
    if reference.starts_with('#') || reference.starts_with("urn:") {
        return None;
    }
    let segments: Vec<&str> = reference.split('/').filter(|s| !s.is_empty()).collect();
    let type_index = match segments.len() {
        n if n >= 4 && segments[n - 2] == "_history" => n - 4,
        n if n >= 2 => n - 2,
        _ => return None,
    };
    let candidate = segments[type_index];
    candidate
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_uppercase())
        .then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{Binding, BindingStrength};
    use serde_json::json;

    fn primitive(kind: PrimitiveKind) -> Vec<TypeTag> {
        vec![TypeTag::Primitive(kind)]
    }

    #[test]
    fn test_boolean_must_be_json_boolean() {
        let tags = primitive(PrimitiveKind::Boolean);
        assert!(check(&json!(true), &tags).is_ok());
        let result = check(&json!("yes"), &tags);
        assert_eq!(
            result.describe().unwrap(),
            "expected boolean, found string"
        );
    }

    #[test]
    fn test_code_rejects_surrounding_whitespace() {
        let tags = primitive(PrimitiveKind::Code);
        assert!(check(&json!("final"), &tags).is_ok());
        assert!(check(&json!("two words"), &tags).is_ok());
        assert!(!check(&json!(" final"), &tags).is_ok());
        assert!(!check(&json!("final "), &tags).is_ok());
        assert!(!check(&json!(""), &tags).is_ok());
    }

    #[test]
    fn test_bound_code_uses_code_rules() {
        let tags = vec![TypeTag::Coded {
            kind: CodedKind::Code,
            binding: Binding {
                value_set: "http://hl7.org/fhir/ValueSet/administrative-gender".into(),
                strength: BindingStrength::Required,
            },
        }];
        assert!(check(&json!("male"), &tags).is_ok());
        assert!(!check(&json!(1), &tags).is_ok());
    }

    #[test]
    fn test_dates() {
        let date = primitive(PrimitiveKind::Date);
        assert!(check(&json!("1974-12-25"), &date).is_ok());
        assert!(check(&json!("1974-12"), &date).is_ok());
        assert!(check(&json!("1974"), &date).is_ok());
        assert!(!check(&json!("1974-13-01"), &date).is_ok());
        assert!(!check(&json!(12345), &date).is_ok());

        let date_time = primitive(PrimitiveKind::DateTime);
        assert!(check(&json!("2015-02-07T13:28:17-05:00"), &date_time).is_ok());
        assert!(check(&json!("2017-01-01T00:00:00.000Z"), &date_time).is_ok());
        assert!(!check(&json!("2015-02-07T13:28:17"), &date_time).is_ok());

        let instant = primitive(PrimitiveKind::Instant);
        assert!(check(&json!("2015-02-07T13:28:17.239+02:00"), &instant).is_ok());
        assert!(!check(&json!("2015-02-07"), &instant).is_ok());

        let time = primitive(PrimitiveKind::Time);
        assert!(check(&json!("14:30:00"), &time).is_ok());
        assert!(!check(&json!("25:00:00"), &time).is_ok());
    }

    #[test]
    fn test_integers() {
        let integer = primitive(PrimitiveKind::Integer);
        assert!(check(&json!(-5), &integer).is_ok());
        assert!(!check(&json!(1.5), &integer).is_ok());
        assert!(!check(&json!(4_000_000_000i64), &integer).is_ok());
        assert!(!check(&json!("5"), &integer).is_ok());

        assert!(!check(&json!(-1), &primitive(PrimitiveKind::UnsignedInt)).is_ok());
        assert!(check(&json!(0), &primitive(PrimitiveKind::UnsignedInt)).is_ok());
        assert!(!check(&json!(0), &primitive(PrimitiveKind::PositiveInt)).is_ok());

        let integer64 = primitive(PrimitiveKind::Integer64);
        assert!(check(&json!("9223372036854775807"), &integer64).is_ok());
        assert!(!check(&json!(12), &integer64).is_ok());
        assert!(!check(&json!("0012"), &integer64).is_ok());
    }

    #[test]
    fn test_identifiers_and_uris() {
        assert!(check(&json!("abc-123.x"), &primitive(PrimitiveKind::Id)).is_ok());
        assert!(!check(&json!("abc_123"), &primitive(PrimitiveKind::Id)).is_ok());
        assert!(check(&json!("urn:oid:1.2.36.146"), &primitive(PrimitiveKind::Oid)).is_ok());
        assert!(
            check(
                &json!("urn:uuid:c757873d-ec9a-4326-a141-556f43239520"),
                &primitive(PrimitiveKind::Uuid)
            )
            .is_ok()
        );
        assert!(!check(&json!("http://a b"), &primitive(PrimitiveKind::Uri)).is_ok());
        assert!(check(&json!("aGVsbG8="), &primitive(PrimitiveKind::Base64Binary)).is_ok());
    }

    #[test]
    fn test_complex_requires_object() {
        let tags = vec![TypeTag::Complex("HumanName".into())];
        assert!(check(&json!({"family": "Doe"}), &tags).is_ok());
        let result = check(&json!("Doe"), &tags);
        assert_eq!(
            result,
            TypeCheckResult::Mismatch {
                expected: "HumanName".into(),
                observed: "string",
                reason: None
            }
        );
    }

    #[test]
    fn test_first_matching_tag_wins() {
        let tags = vec![
            TypeTag::Primitive(PrimitiveKind::Boolean),
            TypeTag::Primitive(PrimitiveKind::DateTime),
        ];
        match check(&json!("2020-01-01"), &tags) {
            TypeCheckResult::Ok(tag) => assert_eq!(tag.name(), "dateTime"),
            other => panic!("unexpected {:?}", other),
        }
        let mismatch = check(&json!(3), &tags);
        assert_eq!(
            mismatch.describe().unwrap(),
            "expected boolean | dateTime, found number"
        );
    }

    #[test]
    fn test_reference_shape_and_targets() {
        let tags = vec![TypeTag::Reference {
            targets: vec!["Organization".into(), "Practitioner".into()],
        }];
        assert!(check(&json!({"reference": "Organization/1"}), &tags).is_ok());
        assert!(check(&json!({"display": "Dr. Who"}), &tags).is_ok());
        assert!(
            check(
                &json!({"reference": "http://example.org/fhir/Practitioner/7/_history/2"}),
                &tags
            )
            .is_ok()
        );
        assert!(check(&json!({"reference": "#contained-1"}), &tags).is_ok());
        assert!(!check(&json!({"reference": "Patient/1"}), &tags).is_ok());
        assert!(!check(&json!({"reference": "Organization/1", "type": "Patient"}), &tags).is_ok());
        assert!(!check(&json!({}), &tags).is_ok());
        assert!(!check(&json!("Organization/1"), &tags).is_ok());
    }

    #[test]
    fn test_referenced_type() {
        assert_eq!(referenced_type("Patient/123"), Some("Patient"));
        assert_eq!(
            referenced_type("https://example.org/fhir/Observation/9"),
            Some("Observation")
        );
        assert_eq!(referenced_type("urn:uuid:1234"), None);
        assert_eq!(referenced_type("#p1"), None);
        assert_eq!(referenced_type("justanid"), None);
    }
}
