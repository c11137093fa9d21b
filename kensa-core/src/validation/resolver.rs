use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use crate::structure::{Max, StructureConstraint};
use crate::validation::issue::{IssueCode, ValidationIssue};

/// Occurrence count of every key of one JSON object.
///
/// Arrays count their elements, `null` counts as absent. A primitive that only
/// carries extensions (`_birthDate`) still counts as present.
#[derive(Debug, Default)]
pub struct FieldPresence {
    counts: HashMap<String, usize>,
}

impl FieldPresence {
    pub fn from_object(object: &Map<String, Value>) -> Self {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for (key, value) in object {
            let count = match value {
                Value::Null => 0,
                Value::Array(items) => items.len(),
                _ => 1,
            };
            let name = key.strip_prefix('_').unwrap_or(key);
            let entry = counts.entry(name.to_string()).or_default();
            *entry = (*entry).max(count);
        }
        Self { counts }
    }

    pub fn count(&self, name: &str) -> usize {
        self.counts.get(name).copied().unwrap_or(0)
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.count(name) > 0
    }
}

pub(crate) fn child_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

/// Cardinality and choice-group findings for one object, in declaration order.
pub fn resolve(
    constraints: &[StructureConstraint],
    present: &FieldPresence,
    path: &str,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut seen_groups: HashSet<&str> = HashSet::new();

    for constraint in constraints {
        let Some(group) = constraint.choice_group.as_deref() else {
            check_cardinality(constraint, present.count(&constraint.path), path, &mut issues);
            continue;
        };

        if !seen_groups.insert(group) {
            continue;
        }

        let members: Vec<&StructureConstraint> = constraints
            .iter()
            .filter(|c| c.choice_group.as_deref() == Some(group))
            .collect();
        let used: Vec<&StructureConstraint> = members
            .iter()
            .copied()
            .filter(|m| present.is_present(&m.path))
            .collect();
        let group_path = child_path(path, &format!("{}[x]", group));

        match used.as_slice() {
            [] if constraint.is_required() => issues.push(ValidationIssue::error(
                IssueCode::ChoiceMissing,
                group_path,
                format!(
                    "one of {} is required",
                    members
                        .iter()
                        .map(|m| m.path.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )),
            [] => {}
            [single] => {
                check_cardinality(single, present.count(&single.path), path, &mut issues)
            }
            many => issues.push(ValidationIssue::error(
                IssueCode::ChoiceConflict,
                group_path,
                format!(
                    "only one form of '{}[x]' may be present, found {}",
                    group,
                    many.iter()
                        .map(|m| m.path.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )),
        }
    }

    issues
}

fn check_cardinality(
    constraint: &StructureConstraint,
    count: usize,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let field_path = child_path(path, &constraint.path);
    let min = constraint.min as usize;

    if count == 0 && min > 0 {
        issues.push(ValidationIssue::error(
            IssueCode::MissingRequiredField,
            field_path,
            format!("missing required element '{}'", constraint.path),
        ));
    } else if count > 0 && count < min {
        issues.push(ValidationIssue::error(
            IssueCode::MissingRequiredField,
            field_path,
            format!(
                "element '{}' has {} occurrence(s), at least {} required",
                constraint.path, count, min
            ),
        ));
    } else if !constraint.max.allows(count) {
        let Max::Bounded(max) = constraint.max else {
            return;
        };
        issues.push(ValidationIssue::error(
            IssueCode::CardinalityExceeded,
            field_path,
            format!(
                "element '{}' has {} occurrences, at most {} allowed",
                constraint.path, count, max
            ),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{PrimitiveKind, TypeTag};
    use serde_json::json;

    fn field(path: &str, min: u32, max: Max) -> StructureConstraint {
        StructureConstraint {
            path: path.to_string(),
            types: vec![TypeTag::Primitive(PrimitiveKind::String)],
            min,
            max,
            choice_group: None,
            is_backbone: false,
        }
    }

    fn choice(path: &str, group: &str, min: u32) -> StructureConstraint {
        StructureConstraint {
            choice_group: Some(group.to_string()),
            ..field(path, min, Max::Bounded(1))
        }
    }

    fn presence(value: Value) -> FieldPresence {
        FieldPresence::from_object(value.as_object().unwrap())
    }

    #[test]
    fn test_presence_counts() {
        let present = presence(json!({
            "a": [1, 2, 3],
            "b": null,
            "c": "x",
            "_d": {"extension": []},
            "e": []
        }));
        assert_eq!(present.count("a"), 3);
        assert_eq!(present.count("b"), 0);
        assert_eq!(present.count("c"), 1);
        assert!(present.is_present("d"));
        assert!(!present.is_present("e"));
        assert!(!present.is_present("zzz"));
    }

    #[test]
    fn test_missing_required() {
        let constraints = vec![field("status", 1, Max::Bounded(1))];
        let issues = resolve(&constraints, &presence(json!({})), "Observation");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, IssueCode::MissingRequiredField);
        assert_eq!(issues[0].path, "Observation.status");
    }

    #[test]
    fn test_too_few_occurrences() {
        let constraints = vec![field("item", 2, Max::Unbounded)];
        let issues = resolve(&constraints, &presence(json!({"item": ["a"]})), "X");
        assert_eq!(issues[0].code, IssueCode::MissingRequiredField);
        assert!(issues[0].diagnostics.contains("at least 2"));
    }

    #[test]
    fn test_cardinality_exceeded() {
        let constraints = vec![field("gender", 0, Max::Bounded(1))];
        let issues = resolve(
            &constraints,
            &presence(json!({"gender": ["male", "female"]})),
            "Patient",
        );
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, IssueCode::CardinalityExceeded);
        assert_eq!(issues[0].path, "Patient.gender");
    }

    #[test]
    fn test_choice_conflict_reported_once() {
        let constraints = vec![
            choice("deceasedBoolean", "deceased", 0),
            choice("deceasedDateTime", "deceased", 0),
        ];
        let issues = resolve(
            &constraints,
            &presence(json!({"deceasedBoolean": true, "deceasedDateTime": "2020-01-01"})),
            "Patient",
        );
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, IssueCode::ChoiceConflict);
        assert_eq!(issues[0].path, "Patient.deceased[x]");
    }

    #[test]
    fn test_single_choice_member_is_fine() {
        let constraints = vec![
            choice("deceasedBoolean", "deceased", 0),
            choice("deceasedDateTime", "deceased", 0),
        ];
        let issues = resolve(
            &constraints,
            &presence(json!({"deceasedDateTime": "2020-01-01"})),
            "Patient",
        );
        assert!(issues.is_empty());
    }

    #[test]
    fn test_required_choice_missing() {
        let constraints = vec![
            choice("valueString", "value", 1),
            choice("valueBoolean", "value", 1),
        ];
        let issues = resolve(&constraints, &presence(json!({})), "Extension");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, IssueCode::ChoiceMissing);
        assert_eq!(issues[0].path, "Extension.value[x]");
        assert!(issues[0].diagnostics.contains("valueString, valueBoolean"));
    }

    #[test]
    fn test_declaration_order() {
        let constraints = vec![
            field("b", 1, Max::Bounded(1)),
            choice("xString", "x", 0),
            choice("xBoolean", "x", 0),
            field("a", 1, Max::Bounded(1)),
        ];
        let issues = resolve(
            &constraints,
            &presence(json!({"xString": "s", "xBoolean": true})),
            "T",
        );
        let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["T.b", "T.x[x]", "T.a"]);
    }
}
