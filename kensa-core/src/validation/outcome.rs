use serde::{Deserialize, Serialize};

use crate::operation_outcome::{IssueSeverity, OperationOutcome};
use crate::validation::issue::{IssueCode, ValidationIssue};

/// Result of one validation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub issue: Vec<ValidationIssue>,
}

/// Wrap a pass's issues into an outcome. An outcome is never empty: a clean
/// pass carries a single informational issue.
pub fn assemble(issues: Vec<ValidationIssue>) -> ValidationOutcome {
    if issues.is_empty() {
        return ValidationOutcome {
            issue: vec![ValidationIssue::new(
                IssueSeverity::Information,
                IssueCode::Informational,
                "",
                "No issues detected",
            )],
        };
    }
    ValidationOutcome { issue: issues }
}

impl ValidationOutcome {
    /// No fatal or error issues
    pub fn is_valid(&self) -> bool {
        !self.issue.iter().any(ValidationIssue::is_failure)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issue.iter().filter(|i| i.is_failure())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issue
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn with_code(&self, code: IssueCode) -> impl Iterator<Item = &ValidationIssue> {
        self.issue.iter().filter(move |i| i.code == code)
    }

    pub fn to_operation_outcome(&self) -> OperationOutcome {
        OperationOutcome::from(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_issues_become_informational() {
        let outcome = assemble(Vec::new());
        assert_eq!(outcome.issue.len(), 1);
        assert_eq!(outcome.issue[0].severity, IssueSeverity::Information);
        assert_eq!(outcome.issue[0].diagnostics, "No issues detected");
        assert!(outcome.is_valid());
    }

    #[test]
    fn test_warnings_do_not_invalidate() {
        let outcome = assemble(vec![ValidationIssue::warning(
            IssueCode::UnrecognizedElement,
            "Patient.nickname",
            "unrecognized element 'nickname'",
        )]);
        assert!(outcome.is_valid());
        assert_eq!(outcome.warnings().count(), 1);
        assert_eq!(outcome.error_count(), 0);
    }

    #[test]
    fn test_fatal_and_error_invalidate() {
        let error = assemble(vec![ValidationIssue::error(
            IssueCode::MissingRequiredField,
            "Observation.status",
            "missing required element 'status'",
        )]);
        assert!(!error.is_valid());

        let fatal = assemble(vec![ValidationIssue::new(
            IssueSeverity::Fatal,
            IssueCode::TooDeep,
            "Bundle.entry[0]",
            "nesting limit reached",
        )]);
        assert!(!fatal.is_valid());
        assert_eq!(fatal.with_code(IssueCode::TooDeep).count(), 1);
    }
}
