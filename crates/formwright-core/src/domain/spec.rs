//! Parsed activity specifications.
//!
//! Parsing and validation of authoring formats happen elsewhere; the engine
//! receives these already-structured values. `type_key` is carried opaquely.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One activity to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivitySpec {
    pub code: String,
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sections: Vec<SectionSpec>,
}

/// A section and its fields, in build order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SectionSpec {
    pub title: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

/// A field to place. Its ordinal is its position in `SectionSpec::fields`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub type_key: String,
    #[serde(default)]
    pub label: Option<String>,
    /// Properties-panel controls to set once the field is bound.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// A field located within its activity: global spec order plus its section.
#[derive(Debug, Clone, Copy)]
pub struct PlannedField<'a> {
    pub spec_index: usize,
    pub section_index: usize,
    pub section: &'a SectionSpec,
    pub field: &'a FieldSpec,
}

impl ActivitySpec {
    pub fn field_count(&self) -> usize {
        self.sections.iter().map(|s| s.fields.len()).sum()
    }

    /// Every field in specification order, numbered across sections.
    pub fn planned_fields(&self) -> Vec<PlannedField<'_>> {
        self.sections
            .iter()
            .enumerate()
            .flat_map(|(section_index, section)| {
                section.fields.iter().map(move |field| (section_index, section, field))
            })
            .enumerate()
            .map(|(spec_index, (section_index, section, field))| PlannedField {
                spec_index,
                section_index,
                section,
                field,
            })
            .collect()
    }

    /// SHA-256 hex digest of the serialized specification.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}
