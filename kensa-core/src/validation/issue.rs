use serde::{Deserialize, Serialize};
use std::fmt;

use crate::operation_outcome::{IssueSeverity, IssueType};

/// Machine code of a validation finding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum IssueCode {
    UnknownResourceType,
    UnknownDatatype,
    MissingRequiredField,
    CardinalityExceeded,
    ChoiceConflict,
    ChoiceMissing,
    TypeMismatch,
    InvalidCode,
    UnrecognizedElement,
    TerminologyUnavailable,
    TooDeep,
    Informational,
}

impl IssueCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownResourceType => "unknown-resource-type",
            Self::UnknownDatatype => "unknown-datatype",
            Self::MissingRequiredField => "missing-required-field",
            Self::CardinalityExceeded => "cardinality-exceeded",
            Self::ChoiceConflict => "choice-conflict",
            Self::ChoiceMissing => "choice-missing",
            Self::TypeMismatch => "type-mismatch",
            Self::InvalidCode => "invalid-code",
            Self::UnrecognizedElement => "unrecognized-element",
            Self::TerminologyUnavailable => "terminology-unavailable",
            Self::TooDeep => "too-deep",
            Self::Informational => "informational",
        }
    }

    /// Standard `OperationOutcome.issue.code` for this finding
    pub fn issue_type(self) -> IssueType {
        match self {
            Self::UnknownResourceType | Self::UnknownDatatype => IssueType::NotSupported,
            Self::MissingRequiredField => IssueType::Required,
            Self::CardinalityExceeded
            | Self::ChoiceConflict
            | Self::ChoiceMissing
            | Self::UnrecognizedElement => IssueType::Structure,
            Self::TypeMismatch => IssueType::Value,
            Self::InvalidCode => IssueType::CodeInvalid,
            Self::TerminologyUnavailable => IssueType::Transient,
            Self::TooDeep => IssueType::TooLong,
            Self::Informational => IssueType::Informational,
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding of a validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub code: IssueCode,
    /// Element path, e.g. `Patient.name[0].given[1]`
    pub path: String,
    pub diagnostics: String,
}

impl ValidationIssue {
    pub fn new(
        severity: IssueSeverity,
        code: IssueCode,
        path: impl Into<String>,
        diagnostics: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            code,
            path: path.into(),
            diagnostics: diagnostics.into(),
        }
    }

    pub fn error(code: IssueCode, path: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Error, code, path, diagnostics)
    }

    pub fn warning(
        code: IssueCode,
        path: impl Into<String>,
        diagnostics: impl Into<String>,
    ) -> Self {
        Self::new(IssueSeverity::Warning, code, path, diagnostics)
    }

    pub fn is_failure(&self) -> bool {
        self.severity.is_failure()
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}: {}",
            self.severity, self.code, self.path, self.diagnostics
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_code_serializes_kebab_case() {
        let json = serde_json::to_string(&IssueCode::MissingRequiredField).unwrap();
        assert_eq!(json, "\"missing-required-field\"");
        assert_eq!(IssueCode::ChoiceConflict.as_str(), "choice-conflict");
    }

    #[test]
    fn test_display() {
        let issue = ValidationIssue::error(
            IssueCode::TypeMismatch,
            "Patient.active",
            "expected boolean, found string",
        );
        assert_eq!(
            issue.to_string(),
            "error [type-mismatch] Patient.active: expected boolean, found string"
        );
        assert!(issue.is_failure());
    }
}
