use serde::Deserialize;
use std::path::Path;

use crate::error::Result;
use crate::structure::constraint::BindingStrength;
use crate::structure::revision::Revision;

const R4_DEFINITIONS: &str = include_str!("../../definitions/r4.json");
const R4B_DEFINITIONS: &str = include_str!("../../definitions/r4b.json");
const R5_DEFINITIONS: &str = include_str!("../../definitions/r5.json");

/// One generated definition file: every type of one revision.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionFile {
    pub revision: Revision,
    #[serde(default)]
    pub fhir_version: Option<String>,
    #[serde(rename = "type", default)]
    pub types: Vec<TypeDefinitionData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Resource,
    Datatype,
    Backbone,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypeDefinitionData {
    pub name: String,
    pub kind: TypeKind,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(rename = "element", default)]
    pub elements: Vec<ElementData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementData {
    pub path: String,
    pub min: u32,
    pub max: String,
    #[serde(rename = "type", default)]
    pub types: Vec<TypeRefData>,
    #[serde(default)]
    pub binding: Option<BindingData>,
    #[serde(default)]
    pub content_reference: Option<String>,
    /// Inline backbone children.
    #[serde(rename = "element", default)]
    pub elements: Option<Vec<ElementData>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeRefData {
    pub code: String,
    #[serde(default)]
    pub target_profile: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingData {
    pub strength: BindingStrength,
    pub value_set: String,
}

/// Loads structure definition tables
pub struct DefinitionLoader;

impl DefinitionLoader {
    /// Definition tables compiled into the crate, one per supported revision
    pub fn embedded() -> Result<Vec<DefinitionFile>> {
        [R4_DEFINITIONS, R4B_DEFINITIONS, R5_DEFINITIONS]
            .into_iter()
            .map(Self::parse)
            .collect()
    }

    pub fn parse(json: &str) -> Result<DefinitionFile> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load definition files from a directory.
    ///
    /// Files that cannot be read or parsed are skipped with a warning; a missing
    /// directory yields no files.
    pub fn load_from_directory(dir_path: impl AsRef<Path>) -> Result<Vec<DefinitionFile>> {
        let mut files = Vec::new();
        let dir_path = dir_path.as_ref();

        if !dir_path.exists() {
            return Ok(files);
        }

        let mut paths = std::fs::read_dir(dir_path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        // read_dir order is platform dependent; later files override earlier ones
        paths.sort();

        for path in paths {
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path) {
                Ok(content) => match Self::parse(&content) {
                    Ok(file) => files.push(file),
                    Err(e) => {
                        tracing::warn!("Failed to parse definition file {:?}: {}", path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read file {:?}: {}", path, e);
                }
            }
        }

        tracing::info!("Loaded {} definition files from {:?}", files.len(), dir_path);
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_embedded_definitions_cover_all_revisions() {
        let files = DefinitionLoader::embedded().unwrap();
        let revisions: Vec<Revision> = files.iter().map(|f| f.revision).collect();
        assert_eq!(revisions, Revision::ALL.to_vec());
        assert!(files.iter().all(|f| f.types.iter().any(|t| t.name == "Patient")));
    }

    #[test]
    fn test_parse_inline_backbone() {
        let file = DefinitionLoader::parse(
            r#"{
                "revision": "R4",
                "type": [{
                    "name": "Thing",
                    "kind": "resource",
                    "element": [
                        {"path": "part", "min": 0, "max": "*", "type": [{"code": "BackboneElement"}],
                         "element": [{"path": "label", "min": 1, "max": "1", "type": [{"code": "string"}]}]}
                    ]
                }]
            }"#,
        )
        .unwrap();

        let part = &file.types[0].elements[0];
        assert_eq!(part.elements.as_ref().unwrap()[0].path, "label");
    }

    #[test]
    fn test_load_from_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let files = DefinitionLoader::load_from_directory(temp_dir.path()).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_load_skips_unparseable_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("broken.json"), "{ not json").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();
        fs::write(
            temp_dir.path().join("extra.json"),
            r#"{"revision": "R5", "type": []}"#,
        )
        .unwrap();

        let files = DefinitionLoader::load_from_directory(temp_dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].revision, Revision::R5);
    }

    #[test]
    fn test_load_nonexistent_directory() {
        let files = DefinitionLoader::load_from_directory("/nonexistent/path").unwrap();
        assert!(files.is_empty());
    }
}
