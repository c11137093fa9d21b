use serde::{Deserialize, Serialize};

use crate::validation::{ValidationIssue, ValidationOutcome};

/// Code system used for kensa's own issue codes in `issue.details.coding`.
pub const ISSUE_CODE_SYSTEM: &str = "urn:kensa:issue-code";

/// FHIR OperationOutcome resource for error reporting
/// See: https://www.hl7.org/fhir/operationoutcome.html
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub issue: Vec<OperationOutcomeIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcomeIssue {
    pub severity: IssueSeverity,
    pub code: IssueType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<CodeableConcept>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Fatal,
    Error,
    Warning,
    Information,
}

impl IssueSeverity {
    /// Fatal and error issues make a resource invalid.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Fatal | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fatal => "fatal",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "information",
        }
    }
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
    Invalid,
    Structure,
    Required,
    Value,
    Invariant,
    NotSupported,
    TooLong,
    CodeInvalid,
    Exception,
    Timeout,
    Transient,
    Processing,
    Informational,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeableConcept {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coding: Option<Vec<Coding>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl OperationOutcome {
    /// Create a new OperationOutcome with a single issue
    pub fn new(severity: IssueSeverity, code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self {
            resource_type: "OperationOutcome".to_string(),
            id: None,
            issue: vec![OperationOutcomeIssue {
                severity,
                code,
                diagnostics: Some(diagnostics.into()),
                details: None,
                expression: None,
            }],
        }
    }

    /// Create an error OperationOutcome
    pub fn error(code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Error, code, diagnostics)
    }

    /// Create an invalid resource error
    pub fn invalid_resource(diagnostics: impl Into<String>) -> Self {
        Self::error(IssueType::Invalid, diagnostics)
    }

    /// Outcome for a validation pass that was cancelled or timed out
    pub fn transient(diagnostics: impl Into<String>) -> Self {
        Self::error(IssueType::Transient, diagnostics)
    }

    /// Add an issue with expression (path to the problematic element)
    pub fn with_expression(mut self, expression: Vec<String>) -> Self {
        if let Some(issue) = self.issue.last_mut() {
            issue.expression = Some(expression);
        }
        self
    }
}

impl From<&ValidationIssue> for OperationOutcomeIssue {
    fn from(issue: &ValidationIssue) -> Self {
        Self {
            severity: issue.severity,
            code: issue.code.issue_type(),
            diagnostics: Some(issue.diagnostics.clone()),
            details: Some(CodeableConcept {
                coding: Some(vec![Coding {
                    system: Some(ISSUE_CODE_SYSTEM.to_string()),
                    code: Some(issue.code.as_str().to_string()),
                    display: None,
                }]),
                text: None,
            }),
            expression: (!issue.path.is_empty()).then(|| vec![issue.path.clone()]),
        }
    }
}

impl From<&ValidationOutcome> for OperationOutcome {
    fn from(outcome: &ValidationOutcome) -> Self {
        Self {
            resource_type: "OperationOutcome".to_string(),
            id: None,
            issue: outcome.issue.iter().map(OperationOutcomeIssue::from).collect(),
        }
    }
}
