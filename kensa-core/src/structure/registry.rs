use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::error::{KensaError, Result};
use crate::structure::constraint::{
    Binding, CodedKind, Max, PrimitiveKind, StructureConstraint, TypeTag,
};
use crate::structure::loader::{
    DefinitionFile, DefinitionLoader, ElementData, TypeDefinitionData, TypeKind, TypeRefData,
};
use crate::structure::revision::Revision;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("Unknown type '{type_name}' in FHIR {revision}")]
    NotFound {
        type_name: String,
        revision: Revision,
    },
}

/// Fully flattened definition of one resource, datatype or backbone element.
#[derive(Debug, Clone)]
pub struct TypeDefinition {
    pub name: String,
    pub kind: TypeKind,
    pub base: Option<String>,
    constraints: Vec<StructureConstraint>,
    index: HashMap<String, usize>,
}

impl TypeDefinition {
    fn new(
        name: String,
        kind: TypeKind,
        base: Option<String>,
        constraints: Vec<StructureConstraint>,
    ) -> Self {
        let index = constraints
            .iter()
            .enumerate()
            .map(|(i, c)| (c.path.clone(), i))
            .collect();
        Self {
            name,
            kind,
            base,
            constraints,
            index,
        }
    }

    /// Constraints in declaration order, inherited elements first.
    pub fn constraints(&self) -> &[StructureConstraint] {
        &self.constraints
    }

    pub fn field(&self, name: &str) -> Option<&StructureConstraint> {
        self.index.get(name).map(|&i| &self.constraints[i])
    }

    pub fn is_resource(&self) -> bool {
        self.kind == TypeKind::Resource
    }
}

#[derive(Debug, Default)]
struct RevisionTable {
    fhir_version: Option<String>,
    types: HashMap<String, TypeDefinition>,
}

/// Read-only lookup of structure constraints per revision.
///
/// Built once at startup and shared (`Arc`) between concurrent validations.
#[derive(Debug, Default)]
pub struct StructureRegistry {
    tables: HashMap<Revision, RevisionTable>,
}

/// Elements declared directly on a type, before base flattening.
struct OwnType {
    kind: TypeKind,
    base: Option<String>,
    constraints: Vec<StructureConstraint>,
}

impl StructureRegistry {
    /// Registry over the definition tables shipped with the crate
    pub fn embedded() -> Result<Self> {
        Self::from_definitions(DefinitionLoader::embedded()?)
    }

    /// Embedded tables plus any definition files found in `extra_dir`.
    ///
    /// A type defined again in a later file replaces the earlier definition.
    pub fn load(extra_dir: Option<&Path>) -> Result<Self> {
        let mut files = DefinitionLoader::embedded()?;
        if let Some(dir) = extra_dir {
            files.extend(DefinitionLoader::load_from_directory(dir)?);
        }
        Self::from_definitions(files)
    }

    pub fn from_definitions(files: Vec<DefinitionFile>) -> Result<Self> {
        let mut owned: HashMap<Revision, (Option<String>, HashMap<String, OwnType>)> =
            HashMap::new();

        for file in files {
            let (fhir_version, table) = owned.entry(file.revision).or_default();
            if file.fhir_version.is_some() {
                *fhir_version = file.fhir_version;
            }
            for data in file.types {
                register_type(table, data)?;
            }
        }

        let mut tables = HashMap::new();
        for (revision, (fhir_version, own_types)) in owned {
            let types = flatten(&own_types, revision)?;
            tracing::info!("Compiled {} types for FHIR {}", types.len(), revision);
            tables.insert(revision, RevisionTable { fhir_version, types });
        }

        Ok(Self { tables })
    }

    /// Ordered constraints of `type_name`, inherited elements included
    pub fn lookup(
        &self,
        type_name: &str,
        revision: Revision,
    ) -> std::result::Result<&[StructureConstraint], LookupError> {
        self.definition(type_name, revision)
            .map(TypeDefinition::constraints)
    }

    pub fn definition(
        &self,
        type_name: &str,
        revision: Revision,
    ) -> std::result::Result<&TypeDefinition, LookupError> {
        self.tables
            .get(&revision)
            .and_then(|table| table.types.get(type_name))
            .ok_or_else(|| LookupError::NotFound {
                type_name: type_name.to_string(),
                revision,
            })
    }

    pub fn is_resource(&self, type_name: &str, revision: Revision) -> bool {
        self.definition(type_name, revision)
            .is_ok_and(TypeDefinition::is_resource)
    }

    /// Sorted names of all types known for `revision`
    pub fn type_names(&self, revision: Revision) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .tables
            .get(&revision)
            .map(|table| table.types.keys().map(String::as_str).collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    /// Sorted names of the concrete resource types known for `revision`
    pub fn resource_types(&self, revision: Revision) -> Vec<&str> {
        self.type_names(revision)
            .into_iter()
            .filter(|name| !matches!(*name, "Resource" | "DomainResource"))
            .filter(|name| self.is_resource(name, revision))
            .collect()
    }

    pub fn revisions(&self) -> Vec<Revision> {
        let mut revisions: Vec<Revision> = self.tables.keys().copied().collect();
        revisions.sort();
        revisions
    }

    pub fn fhir_version(&self, revision: Revision) -> &str {
        self.tables
            .get(&revision)
            .and_then(|table| table.fhir_version.as_deref())
            .unwrap_or(revision.fhir_version())
    }
}

fn register_type(table: &mut HashMap<String, OwnType>, data: TypeDefinitionData) -> Result<()> {
    let constraints = compile_elements(&data.name, &data.elements, table)?;
    table.insert(
        data.name,
        OwnType {
            kind: data.kind,
            base: data.base,
            constraints,
        },
    );
    Ok(())
}

/// Compile one level of elements. Inline backbones are registered in `table`
/// under `owner.path` as a side effect.
fn compile_elements(
    owner: &str,
    elements: &[ElementData],
    table: &mut HashMap<String, OwnType>,
) -> Result<Vec<StructureConstraint>> {
    let mut constraints = Vec::with_capacity(elements.len());

    for element in elements {
        let max = element
            .max
            .parse::<Max>()
            .map_err(|e| KensaError::definition(format!("{}.{}: {}", owner, element.path, e)))?;

        if let Some(reference) = &element.content_reference {
            constraints.push(StructureConstraint {
                path: element.path.clone(),
                types: vec![TypeTag::Backbone(
                    reference.trim_start_matches('#').to_string(),
                )],
                min: element.min,
                max,
                choice_group: None,
                is_backbone: true,
            });
            continue;
        }

        if element.types.is_empty() {
            return Err(KensaError::definition(format!(
                "{}.{} declares no type",
                owner, element.path
            )));
        }

        if let Some(children) = &element.elements {
            let backbone = format!("{}.{}", owner, element.path);
            let child_constraints = compile_elements(&backbone, children, table)?;
            table.insert(
                backbone.clone(),
                OwnType {
                    kind: TypeKind::Backbone,
                    base: Some(element.types[0].code.clone()),
                    constraints: child_constraints,
                },
            );
            constraints.push(StructureConstraint {
                path: element.path.clone(),
                types: vec![TypeTag::Backbone(backbone)],
                min: element.min,
                max,
                choice_group: None,
                is_backbone: true,
            });
            continue;
        }

        let binding = element.binding.as_ref().map(|b| Binding {
            value_set: b.value_set.clone(),
            strength: b.strength,
        });
        let tags: Vec<TypeTag> = element
            .types
            .iter()
            .map(|t| type_tag(t, binding.as_ref()))
            .collect();

        match element.path.strip_suffix("[x]") {
            Some(stem) => {
                for tag in tags {
                    constraints.push(StructureConstraint {
                        path: format!("{}{}", stem, tag.choice_suffix()),
                        types: vec![tag],
                        min: element.min,
                        max,
                        choice_group: Some(stem.to_string()),
                        is_backbone: false,
                    });
                }
            }
            None => constraints.push(StructureConstraint {
                path: element.path.clone(),
                types: tags,
                min: element.min,
                max,
                choice_group: None,
                is_backbone: false,
            }),
        }
    }

    Ok(constraints)
}

fn type_tag(data: &TypeRefData, binding: Option<&Binding>) -> TypeTag {
    let coded = |kind| {
        binding.map(|b| TypeTag::Coded {
            kind,
            binding: b.clone(),
        })
    };

    match data.code.as_str() {
        "code" => coded(CodedKind::Code).unwrap_or(TypeTag::Primitive(PrimitiveKind::Code)),
        "Coding" => coded(CodedKind::Coding).unwrap_or_else(|| TypeTag::Complex("Coding".into())),
        "CodeableConcept" => coded(CodedKind::CodeableConcept)
            .unwrap_or_else(|| TypeTag::Complex("CodeableConcept".into())),
        "Reference" => TypeTag::Reference {
            // canonical URLs end in the type name
            targets: data
                .target_profile
                .iter()
                .map(|p| p.rsplit('/').next().unwrap_or(p).to_string())
                .collect(),
        },
        "Resource" => TypeTag::Resource,
        other => PrimitiveKind::from_code(other)
            .map(TypeTag::Primitive)
            .unwrap_or_else(|| TypeTag::Complex(other.to_string())),
    }
}

/// Prepend inherited elements along each type's base chain.
fn flatten(
    own_types: &HashMap<String, OwnType>,
    revision: Revision,
) -> Result<HashMap<String, TypeDefinition>> {
    let mut resolved: HashMap<String, Vec<StructureConstraint>> = HashMap::new();

    for name in own_types.keys() {
        let mut chain = Vec::new();
        let mut current = name.as_str();
        // walk up to the first already-resolved ancestor (or the root)
        while !resolved.contains_key(current) {
            if chain.iter().any(|n: &&str| *n == current) {
                return Err(KensaError::definition(format!(
                    "FHIR {}: base cycle through '{}'",
                    revision, current
                )));
            }
            chain.push(current);
            let own = own_types.get(current).ok_or_else(|| {
                KensaError::definition(format!(
                    "FHIR {}: unknown base type '{}'",
                    revision, current
                ))
            })?;
            match own.base.as_deref() {
                Some(base) => current = base,
                None => break,
            }
        }

        for type_name in chain.into_iter().rev() {
            let own = &own_types[type_name];
            let mut constraints = own
                .base
                .as_deref()
                .and_then(|base| resolved.get(base))
                .cloned()
                .unwrap_or_default();
            for constraint in &own.constraints {
                match constraints.iter().position(|c| c.path == constraint.path) {
                    Some(pos) => constraints[pos] = constraint.clone(),
                    None => constraints.push(constraint.clone()),
                }
            }
            resolved.insert(type_name.to_string(), constraints);
        }
    }

    Ok(resolved
        .into_iter()
        .map(|(name, constraints)| {
            let own = &own_types[&name];
            let definition =
                TypeDefinition::new(name.clone(), own.kind, own.base.clone(), constraints);
            (name, definition)
        })
        .collect())
}
