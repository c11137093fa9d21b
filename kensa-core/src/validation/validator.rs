use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{KensaError, Result};
use crate::operation_outcome::IssueSeverity;
use crate::structure::{
    Binding, BindingStrength, CodedKind, Revision, StructureConstraint, StructureRegistry,
    TypeDefinition, TypeTag,
};
use crate::terminology::{InMemoryValueSets, OracleError, ValueSetOracle};
use crate::validation::issue::{IssueCode, ValidationIssue};
use crate::validation::outcome::{ValidationOutcome, assemble};
use crate::validation::resolver::{FieldPresence, child_path, resolve};
use crate::validation::type_checker::{self, TypeCheckResult, observed_kind};

/// Tunables of a [`Validator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorOptions {
    /// Severity of a code outside a required binding
    pub invalid_code_severity: IssueSeverity,
    /// Stop walking after the first error or fatal issue
    pub stop_at_first_error: bool,
    /// Deepest nesting expanded before reporting `too-deep`
    pub max_depth: usize,
    /// Terminology lookups in flight at once
    pub lookup_concurrency: usize,
    /// Budget for the whole terminology phase
    pub lookup_timeout_ms: Option<u64>,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            invalid_code_severity: IssueSeverity::Warning,
            stop_at_first_error: false,
            max_depth: 128,
            lookup_concurrency: 16,
            lookup_timeout_ms: None,
        }
    }
}

/// Position in a pre-order walk: the parent frame's key plus the slot taken
/// within that frame. Child frames extend the key of the slot they were
/// queued in, so a whole subtree sorts before the next sibling field.
type IssueKey = Vec<u32>;

struct Finding {
    key: IssueKey,
    issue: ValidationIssue,
}

#[derive(Debug, Clone)]
struct CodeCandidate {
    system: Option<String>,
    code: String,
}

impl fmt::Display for CodeCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.system {
            Some(system) => write!(f, "'{}|{}'", system, self.code),
            None => write!(f, "'{}'", self.code),
        }
    }
}

/// A coded value waiting for the oracle. Its key is reserved when queued so
/// the answer sorts where the value was met.
struct PendingLookup {
    key: IssueKey,
    path: String,
    binding: Binding,
    candidates: Vec<CodeCandidate>,
}

#[derive(Default)]
struct Accumulator {
    frame: IssueKey,
    local: u32,
    findings: Vec<Finding>,
    lookups: Vec<PendingLookup>,
    failed: bool,
}

impl Accumulator {
    fn begin_frame(&mut self, key: IssueKey) {
        self.frame = key;
        self.local = 0;
    }

    fn next_key(&mut self) -> IssueKey {
        let mut key = self.frame.clone();
        key.push(self.local);
        self.local += 1;
        key
    }

    fn report(&mut self, issue: ValidationIssue) {
        self.failed |= issue.is_failure();
        let key = self.next_key();
        self.findings.push(Finding { key, issue });
    }

    fn queue(&mut self, path: String, binding: &Binding, candidates: Vec<CodeCandidate>) {
        if candidates.is_empty() {
            return;
        }
        let key = self.next_key();
        self.lookups.push(PendingLookup {
            key,
            path,
            binding: binding.clone(),
            candidates,
        });
    }
}

enum FrameKind {
    /// Inline resource; its type comes from its own `resourceType`
    Resource,
    Typed { name: String, resource: bool },
}

struct Frame<'d> {
    key: IssueKey,
    value: &'d Value,
    kind: FrameKind,
    path: String,
    depth: usize,
}

/// Child frames discovered while scanning one frame.
struct FrameScan<'d> {
    depth: usize,
    children: Vec<Frame<'d>>,
}

impl<'d> FrameScan<'d> {
    fn push_typed(&mut self, key: IssueKey, value: &'d Value, name: &str, path: String) {
        self.children.push(Frame {
            key,
            value,
            kind: FrameKind::Typed {
                name: name.to_string(),
                resource: false,
            },
            path,
            depth: self.depth + 1,
        });
    }

    fn push_resource(&mut self, key: IssueKey, value: &'d Value, path: String) {
        self.children.push(Frame {
            key,
            value,
            kind: FrameKind::Resource,
            path,
            depth: self.depth + 1,
        });
    }
}

/// Validates JSON documents against the structure tables of one revision.
///
/// Cheap to clone; the registry and the oracle are shared.
#[derive(Clone)]
pub struct Validator {
    registry: Arc<StructureRegistry>,
    oracle: Arc<dyn ValueSetOracle>,
    revision: Revision,
    options: ValidatorOptions,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("revision", &self.revision)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Validator {
    /// Validator using the built-in value sets
    pub fn new(registry: Arc<StructureRegistry>, revision: Revision) -> Self {
        Self {
            registry,
            oracle: Arc::new(InMemoryValueSets::new()),
            revision,
            options: ValidatorOptions::default(),
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn ValueSetOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_options(mut self, options: ValidatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn registry(&self) -> &Arc<StructureRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &ValidatorOptions {
        &self.options
    }

    /// Full validation, terminology included.
    ///
    /// `hint` names the expected type of the root. It may be a datatype when
    /// the document is not a resource.
    pub async fn validate(&self, document: &Value, hint: Option<&str>) -> Result<ValidationOutcome> {
        self.run(document, hint, self.options.stop_at_first_error, true)
            .await
    }

    /// [`validate`](Self::validate), abandoned as soon as `cancel` completes.
    pub async fn validate_with_cancel<C>(
        &self,
        document: &Value,
        hint: Option<&str>,
        cancel: C,
    ) -> Result<ValidationOutcome>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            () = cancel => Err(KensaError::Cancelled("validation cancelled by caller".to_string())),
            result = self.validate(document, hint) => result,
        }
    }

    /// Structural checks only; bound codes are not looked up.
    pub fn validate_structure(
        &self,
        document: &Value,
        hint: Option<&str>,
    ) -> Result<ValidationOutcome> {
        let acc = self.walk(document, hint, self.options.stop_at_first_error)?;
        Ok(self.finish(acc))
    }

    pub async fn validate_str(&self, text: &str, hint: Option<&str>) -> Result<ValidationOutcome> {
        let document: Value = serde_json::from_str(text)?;
        self.validate(&document, hint).await
    }

    /// Stops at the first error. Terminology is only consulted when a bad
    /// code can fail the document.
    pub async fn is_valid(&self, document: &Value) -> bool {
        let check_codes = self.options.invalid_code_severity.is_failure();
        match self.run(document, None, true, check_codes).await {
            Ok(outcome) => outcome.is_valid(),
            Err(e) => {
                tracing::debug!("Validity check raised an error: {}", e);
                false
            }
        }
    }

    async fn run(
        &self,
        document: &Value,
        hint: Option<&str>,
        stop_at_first_error: bool,
        check_codes: bool,
    ) -> Result<ValidationOutcome> {
        let mut acc = self.walk(document, hint, stop_at_first_error)?;
        let lookups = std::mem::take(&mut acc.lookups);

        if check_codes && !(stop_at_first_error && acc.failed) && !lookups.is_empty() {
            let pending = lookups.len();
            let phase = self.check_codes(lookups);
            let findings = match self.options.lookup_timeout_ms {
                Some(ms) => tokio::time::timeout(Duration::from_millis(ms), phase)
                    .await
                    .map_err(|_| {
                        tracing::warn!("{} terminology lookup(s) timed out after {} ms", pending, ms);
                        KensaError::Cancelled(format!(
                            "terminology lookups did not finish within {} ms",
                            ms
                        ))
                    })?,
                None => phase.await,
            };
            acc.findings.extend(findings);
        }

        Ok(self.finish(acc))
    }

    fn finish(&self, acc: Accumulator) -> ValidationOutcome {
        let mut findings = acc.findings;
        findings.sort_by(|a, b| a.key.cmp(&b.key));
        let outcome = assemble(findings.into_iter().map(|f| f.issue).collect());
        tracing::debug!(
            "Validated against FHIR {}: {} issue(s), {} error(s)",
            self.revision,
            outcome.issue.len(),
            outcome.error_count()
        );
        outcome
    }

    /// Structural pass over an explicit stack of frames, visited in pre-order.
    fn walk(
        &self,
        document: &Value,
        hint: Option<&str>,
        stop_at_first_error: bool,
    ) -> Result<Accumulator> {
        let object = document
            .as_object()
            .ok_or_else(|| KensaError::InvalidDocument {
                message: format!(
                    "expected a JSON object at the root, found {}",
                    observed_kind(document)
                ),
            })?;

        let mut acc = Accumulator::default();
        let Some(root) = self.root_frame(document, object, hint, &mut acc) else {
            return Ok(acc);
        };

        let mut stack = vec![root];
        while let Some(frame) = stack.pop() {
            acc.begin_frame(frame.key.clone());
            self.visit(frame, &mut acc, &mut stack);
            if stop_at_first_error && acc.failed {
                break;
            }
        }

        Ok(acc)
    }

    fn root_frame<'d>(
        &self,
        document: &'d Value,
        object: &Map<String, Value>,
        hint: Option<&str>,
        acc: &mut Accumulator,
    ) -> Option<Frame<'d>> {
        let declared = match object.get("resourceType") {
            None => None,
            Some(Value::String(name)) => Some(name.as_str()),
            Some(other) => {
                acc.report(ValidationIssue::error(
                    IssueCode::TypeMismatch,
                    child_path(hint.unwrap_or_default(), "resourceType"),
                    format!("resourceType must be a string, found {}", observed_kind(other)),
                ));
                None
            }
        };

        let type_name = match (declared, hint) {
            (Some(declared), Some(hint)) if declared != hint => {
                acc.report(ValidationIssue::error(
                    IssueCode::TypeMismatch,
                    child_path(hint, "resourceType"),
                    format!(
                        "expected a {} resource, document declares '{}'",
                        hint, declared
                    ),
                ));
                declared
            }
            (Some(declared), _) => declared,
            (None, Some(hint)) => {
                if self.registry.is_resource(hint, self.revision) {
                    acc.report(ValidationIssue::error(
                        IssueCode::MissingRequiredField,
                        child_path(hint, "resourceType"),
                        "missing required element 'resourceType'",
                    ));
                }
                hint
            }
            (None, None) => {
                if !object.contains_key("resourceType") {
                    acc.report(ValidationIssue::error(
                        IssueCode::MissingRequiredField,
                        "resourceType",
                        "document has no resourceType and no type hint was given",
                    ));
                }
                return None;
            }
        };

        let resource = match self.registry.definition(type_name, self.revision) {
            Ok(definition) if definition.is_resource() => true,
            // a datatype may be validated on its own when named by the hint
            Ok(_) if declared.is_none() => false,
            _ => {
                acc.report(ValidationIssue::error(
                    IssueCode::UnknownResourceType,
                    type_name,
                    format!(
                        "unknown resource type '{}' in FHIR {}",
                        type_name, self.revision
                    ),
                ));
                return None;
            }
        };

        Some(Frame {
            key: acc.next_key(),
            value: document,
            kind: FrameKind::Typed {
                name: type_name.to_string(),
                resource,
            },
            path: type_name.to_string(),
            depth: 0,
        })
    }

    fn visit<'d>(&self, frame: Frame<'d>, acc: &mut Accumulator, stack: &mut Vec<Frame<'d>>) {
        let Frame {
            key: _,
            value,
            kind,
            path,
            depth,
        } = frame;

        if depth > self.options.max_depth {
            acc.report(ValidationIssue::error(
                IssueCode::TooDeep,
                path,
                format!(
                    "nesting exceeds the limit of {} levels",
                    self.options.max_depth
                ),
            ));
            return;
        }

        let Some(object) = value.as_object() else {
            return;
        };

        let (name, resource) = match kind {
            FrameKind::Typed { name, resource } => (name, resource),
            FrameKind::Resource => match self.inline_resource_type(object, &path, acc) {
                Some(name) => (name, true),
                None => return,
            },
        };

        let definition = match self.registry.definition(&name, self.revision) {
            Ok(definition) => definition,
            Err(e) => {
                acc.report(ValidationIssue::error(IssueCode::UnknownDatatype, path, e.to_string()));
                return;
            }
        };

        let mut scan = FrameScan {
            depth,
            children: Vec::new(),
        };
        self.scan(object, definition, resource, &path, acc, &mut scan);
        stack.extend(scan.children.into_iter().rev());
    }

    fn inline_resource_type(
        &self,
        object: &Map<String, Value>,
        path: &str,
        acc: &mut Accumulator,
    ) -> Option<String> {
        let type_path = child_path(path, "resourceType");
        match object.get("resourceType") {
            Some(Value::String(name)) if self.registry.is_resource(name, self.revision) => {
                Some(name.clone())
            }
            Some(Value::String(name)) => {
                acc.report(ValidationIssue::error(
                    IssueCode::UnknownResourceType,
                    type_path,
                    format!("unknown resource type '{}' in FHIR {}", name, self.revision),
                ));
                None
            }
            Some(other) => {
                acc.report(ValidationIssue::error(
                    IssueCode::TypeMismatch,
                    type_path,
                    format!("resourceType must be a string, found {}", observed_kind(other)),
                ));
                None
            }
            None => {
                acc.report(ValidationIssue::error(
                    IssueCode::MissingRequiredField,
                    type_path,
                    "missing required element 'resourceType'",
                ));
                None
            }
        }
    }

    /// Cardinality, then declared fields in order, then undeclared keys.
    fn scan<'d>(
        &self,
        object: &'d Map<String, Value>,
        definition: &TypeDefinition,
        resource: bool,
        path: &str,
        acc: &mut Accumulator,
        scan: &mut FrameScan<'d>,
    ) {
        let present = FieldPresence::from_object(object);
        for issue in resolve(definition.constraints(), &present, path) {
            acc.report(issue);
        }

        for constraint in definition.constraints() {
            let extension = if constraint.is_primitive() {
                object.get(&format!("_{}", constraint.path))
            } else {
                None
            };

            if let Some(value) = object.get(&constraint.path) {
                let field_path = child_path(path, &constraint.path);
                self.scan_field(value, extension, constraint, &field_path, acc, scan);
            }
            if let Some(extension) = extension {
                let extension_path = child_path(path, &format!("_{}", constraint.path));
                scan_primitive_extension(extension, extension_path, acc, scan);
            }
        }

        for key in object.keys() {
            let declared = definition.field(key).is_some()
                || (resource && key == "resourceType")
                || key
                    .strip_prefix('_')
                    .and_then(|name| definition.field(name))
                    .is_some_and(StructureConstraint::is_primitive);
            if !declared {
                acc.report(ValidationIssue::warning(
                    IssueCode::UnrecognizedElement,
                    child_path(path, key),
                    format!("unrecognized element '{}' on {}", key, definition.name),
                ));
            }
        }
    }

    fn scan_field<'d>(
        &self,
        value: &'d Value,
        extension: Option<&Value>,
        constraint: &StructureConstraint,
        field_path: &str,
        acc: &mut Accumulator,
        scan: &mut FrameScan<'d>,
    ) {
        match value {
            Value::Array(items) => {
                // longer arrays are already reported by the resolver
                if !constraint.max.is_repeating() && items.len() == 1 {
                    acc.report(ValidationIssue::error(
                        IssueCode::TypeMismatch,
                        field_path,
                        format!(
                            "element '{}' is not repeating but holds an array",
                            constraint.path
                        ),
                    ));
                }
                for (index, item) in items.iter().enumerate() {
                    let has_extension = extension
                        .and_then(|e| e.get(index))
                        .is_some_and(|e| !e.is_null());
                    let item_path = format!("{}[{}]", field_path, index);
                    self.scan_value(item, has_extension, constraint, item_path, acc, scan);
                }
            }
            single => {
                if constraint.max.is_repeating() {
                    acc.report(ValidationIssue::error(
                        IssueCode::TypeMismatch,
                        field_path,
                        format!(
                            "element '{}' repeats and must be an array, found {}",
                            constraint.path,
                            observed_kind(single)
                        ),
                    ));
                }
                let has_extension = extension.is_some_and(|e| !e.is_null());
                self.scan_value(single, has_extension, constraint, field_path.to_string(), acc, scan);
            }
        }
    }

    fn scan_value<'d>(
        &self,
        value: &'d Value,
        has_extension: bool,
        constraint: &StructureConstraint,
        path: String,
        acc: &mut Accumulator,
        scan: &mut FrameScan<'d>,
    ) {
        if value.is_null() {
            if !has_extension {
                acc.report(ValidationIssue::error(
                    IssueCode::TypeMismatch,
                    path,
                    "null is only allowed alongside a primitive extension",
                ));
            }
            return;
        }

        let tag = match type_checker::check(value, &constraint.types) {
            TypeCheckResult::Ok(tag) => tag,
            mismatch => {
                acc.report(ValidationIssue::error(
                    IssueCode::TypeMismatch,
                    path,
                    mismatch.describe().unwrap_or_default(),
                ));
                return;
            }
        };

        match tag {
            TypeTag::Primitive(_) => {}
            TypeTag::Coded { kind, binding } => {
                if binding.strength.is_checked() {
                    acc.queue(path.clone(), binding, code_candidates(*kind, value));
                }
                if *kind != CodedKind::Code {
                    scan.push_typed(acc.next_key(), value, kind.as_str(), path);
                }
            }
            TypeTag::Complex(name) | TypeTag::Backbone(name) => {
                scan.push_typed(acc.next_key(), value, name, path)
            }
            TypeTag::Reference { .. } => scan.push_typed(acc.next_key(), value, "Reference", path),
            TypeTag::Resource => scan.push_resource(acc.next_key(), value, path),
        }
    }

    async fn check_codes(&self, lookups: Vec<PendingLookup>) -> Vec<Finding> {
        let answers: Vec<(PendingLookup, std::result::Result<bool, OracleError>)> =
            stream::iter(lookups)
                .map(|lookup| async move {
                    let answer = self.ask_oracle(&lookup).await;
                    (lookup, answer)
                })
                .buffer_unordered(self.options.lookup_concurrency.max(1))
                .collect()
                .await;

        answers
            .into_iter()
            .filter_map(|(lookup, answer)| self.lookup_finding(lookup, answer))
            .collect()
    }

    /// Allowed when any candidate is allowed; an oracle failure only counts
    /// when no candidate was accepted.
    async fn ask_oracle(&self, lookup: &PendingLookup) -> std::result::Result<bool, OracleError> {
        let mut failure = None;
        for candidate in &lookup.candidates {
            match self
                .oracle
                .is_code_allowed(
                    &lookup.binding.value_set,
                    candidate.system.as_deref(),
                    &candidate.code,
                )
                .await
            {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(false),
        }
    }

    fn lookup_finding(
        &self,
        lookup: PendingLookup,
        answer: std::result::Result<bool, OracleError>,
    ) -> Option<Finding> {
        let codes = lookup
            .candidates
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let value_set = &lookup.binding.value_set;

        let issue = match answer {
            Ok(true) => return None,
            Ok(false) => {
                let (severity, strength) = match lookup.binding.strength {
                    BindingStrength::Required => (self.options.invalid_code_severity, "required"),
                    _ => (IssueSeverity::Warning, "extensible"),
                };
                ValidationIssue::new(
                    severity,
                    IssueCode::InvalidCode,
                    lookup.path,
                    format!(
                        "{} is not in value set '{}' ({} binding)",
                        codes, value_set, strength
                    ),
                )
            }
            Err(e) => {
                tracing::warn!(
                    "Could not check {} against {} at {}: {}",
                    codes,
                    value_set,
                    lookup.path,
                    e
                );
                ValidationIssue::warning(
                    IssueCode::TerminologyUnavailable,
                    lookup.path,
                    format!("could not check {} against value set '{}': {}", codes, value_set, e),
                )
            }
        };

        Some(Finding {
            key: lookup.key,
            issue,
        })
    }
}

/// `_field` content: one `Element` per non-null entry.
fn scan_primitive_extension<'d>(
    extension: &'d Value,
    path: String,
    acc: &mut Accumulator,
    scan: &mut FrameScan<'d>,
) {
    let mut element = |value: &'d Value, path: String| {
        if value.is_object() {
            scan.push_typed(acc.next_key(), value, "Element", path);
        } else {
            acc.report(ValidationIssue::error(
                IssueCode::TypeMismatch,
                path,
                format!("expected Element, found {}", observed_kind(value)),
            ));
        }
    };

    match extension {
        Value::Null => {}
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                if !item.is_null() {
                    element(item, format!("{}[{}]", path, index));
                }
            }
        }
        single => element(single, path),
    }
}

fn code_candidates(kind: CodedKind, value: &Value) -> Vec<CodeCandidate> {
    match kind {
        CodedKind::Code => value
            .as_str()
            .map(|code| CodeCandidate {
                system: None,
                code: code.to_string(),
            })
            .into_iter()
            .collect(),
        CodedKind::Coding => coding_candidate(value).into_iter().collect(),
        CodedKind::CodeableConcept => value
            .get("coding")
            .and_then(Value::as_array)
            .map(|codings| codings.iter().filter_map(coding_candidate).collect())
            .unwrap_or_default(),
    }
}

fn coding_candidate(coding: &Value) -> Option<CodeCandidate> {
    let code = coding.get("code")?.as_str()?;
    Some(CodeCandidate {
        system: coding
            .get("system")
            .and_then(Value::as_str)
            .map(str::to_string),
        code: code.to_string(),
    })
}
