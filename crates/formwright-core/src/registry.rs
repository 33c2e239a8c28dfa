//! Entity registry: the engine's confirmed belief about sections and fields.
//!
//! The registry never asserts an entity it has not confirmed itself. It may
//! lag the UI, but every divergence from observed state surfaces as drift:
//! either a `DuplicateId` on register or `missing` entries from `diff`.
//! `rebuild_from_observation` is the only destructive operation and is only
//! ever called explicitly by a recovery path.

use std::collections::{HashMap, HashSet};

use formwright_surface::{EntityDescriptor, EntityId, EntityKind, Scope, Snapshot};
use serde::Serialize;

use crate::domain::RegistryError;
use crate::obs;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionEntry {
    pub id: EntityId,
    pub title: Option<String>,
    pub ordinal: u32,
    /// The canvas was last proven to display this section.
    pub aligned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldEntry {
    pub id: EntityId,
    pub type_key: Option<String>,
    pub section_id: EntityId,
    pub ordinal: u32,
    /// Logical sequence number, not wall time.
    pub created_at: u64,
    /// The properties panel was last proven bound to this field.
    pub bound: bool,
    /// Position in the activity specification, when this field was built for one.
    pub spec_index: Option<usize>,
}

/// An entity to register: an observed descriptor plus the spec slot it fills.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub descriptor: EntityDescriptor,
    pub spec_index: Option<usize>,
}

impl Entity {
    pub fn observed(descriptor: EntityDescriptor) -> Self {
        Self {
            descriptor,
            spec_index: None,
        }
    }

    pub fn for_spec(descriptor: EntityDescriptor, spec_index: usize) -> Self {
        Self {
            descriptor,
            spec_index: Some(spec_index),
        }
    }
}

/// Result of comparing an observation against the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryDiff {
    /// Observed but not registered: candidates for confirmation.
    pub new: Vec<EntityDescriptor>,
    /// Registered but not observed: drift.
    pub missing: Vec<EntityId>,
    /// Ids present on both sides whose relative order differs.
    pub reordered: Vec<EntityId>,
}

impl RegistryDiff {
    pub fn is_clean(&self) -> bool {
        self.new.is_empty() && self.missing.is_empty() && self.reordered.is_empty()
    }
}

/// One section and its fields, as the registry believes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionView {
    pub section: SectionEntry,
    pub fields: Vec<FieldEntry>,
}

/// Ordered, versioned copy of the registry's belief.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    pub revision: u64,
    pub sections: Vec<SectionView>,
}

#[derive(Debug, Default)]
pub struct Registry {
    revision: u64,
    sequence: u64,
    section_epoch: u64,
    sections: Vec<SectionEntry>,
    fields: HashMap<EntityId, Vec<FieldEntry>>,
    section_ids: HashSet<EntityId>,
    field_ids: HashSet<EntityId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumped on every confirmed mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Bumped whenever the section list may have re-rendered.
    pub fn section_epoch(&self) -> u64 {
        self.section_epoch
    }

    pub fn known_ids(&self, kind: EntityKind) -> &HashSet<EntityId> {
        match kind {
            EntityKind::Section => &self.section_ids,
            EntityKind::Field => &self.field_ids,
        }
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.section_ids.contains(id) || self.field_ids.contains(id)
    }

    /// Record a confirmed entity. Returns the new revision.
    pub fn register(&mut self, entity: Entity) -> Result<u64, RegistryError> {
        let desc = entity.descriptor;
        match desc.kind {
            EntityKind::Section => {
                if self.section_ids.contains(&desc.id) {
                    return Err(RegistryError::DuplicateId {
                        id: desc.id,
                        kind: EntityKind::Section,
                    });
                }
                let index = (desc.ordinal as usize).min(self.sections.len());
                self.sections.insert(
                    index,
                    SectionEntry {
                        id: desc.id.clone(),
                        title: desc.title,
                        ordinal: desc.ordinal,
                        aligned: false,
                    },
                );
                renumber_sections(&mut self.sections);
                self.fields.entry(desc.id.clone()).or_default();
                self.section_ids.insert(desc.id);
                self.section_epoch += 1;
            }
            EntityKind::Field => {
                if self.field_ids.contains(&desc.id) {
                    return Err(RegistryError::DuplicateId {
                        id: desc.id,
                        kind: EntityKind::Field,
                    });
                }
                let section_id = desc.section_id.ok_or_else(|| RegistryError::UnknownSection {
                    field: desc.id.clone(),
                    section: EntityId::new(""),
                })?;
                let Some(list) = self.fields.get_mut(&section_id) else {
                    return Err(RegistryError::UnknownSection {
                        field: desc.id,
                        section: section_id,
                    });
                };
                self.sequence += 1;
                let index = (desc.ordinal as usize).min(list.len());
                list.insert(
                    index,
                    FieldEntry {
                        id: desc.id.clone(),
                        type_key: desc.type_key,
                        section_id,
                        ordinal: desc.ordinal,
                        created_at: self.sequence,
                        bound: false,
                        spec_index: entity.spec_index,
                    },
                );
                renumber_fields(list);
                self.field_ids.insert(desc.id);
            }
        }
        self.revision += 1;
        Ok(self.revision)
    }

    /// Compare an observation against current belief. Pure.
    pub fn diff(&self, observed: &Snapshot) -> RegistryDiff {
        let known = self.ordered_ids(&observed.scope);
        let known_set: HashSet<&EntityId> = known.iter().collect();

        let mut entities: Vec<&EntityDescriptor> = observed.entities.iter().collect();
        entities.sort_by_key(|e| e.ordinal);
        let observed_set: HashSet<&EntityId> = entities.iter().map(|e| &e.id).collect();

        let new = entities
            .iter()
            .filter(|e| !known_set.contains(&e.id))
            .map(|e| (*e).clone())
            .collect();
        let missing = known
            .iter()
            .filter(|id| !observed_set.contains(id))
            .cloned()
            .collect();

        let common_known: Vec<&EntityId> =
            known.iter().filter(|id| observed_set.contains(id)).collect();
        let common_observed: Vec<&EntityId> = entities
            .iter()
            .map(|e| &e.id)
            .filter(|id| known_set.contains(id))
            .collect();
        let reordered = common_known
            .iter()
            .zip(common_observed.iter())
            .filter(|(a, b)| a != b)
            .map(|(_, b)| (*b).clone())
            .collect();

        RegistryDiff {
            new,
            missing,
            reordered,
        }
    }

    /// Replace belief for one scope with what was observed.
    ///
    /// Discards provisional flags (alignment, binding) for the scope. Returns
    /// the diff against the belief that was replaced.
    pub fn rebuild_from_observation(
        &mut self,
        observed: &Snapshot,
    ) -> Result<RegistryDiff, RegistryError> {
        let diff = self.diff(observed);
        let mut entities = observed.entities.clone();
        entities.sort_by_key(|e| e.ordinal);

        match &observed.scope {
            Scope::Sections => {
                let sections: Vec<SectionEntry> = entities
                    .into_iter()
                    .filter(|e| e.kind == EntityKind::Section)
                    .map(|e| SectionEntry {
                        id: e.id,
                        title: e.title,
                        ordinal: e.ordinal,
                        aligned: false,
                    })
                    .collect();
                self.section_ids = sections.iter().map(|s| s.id.clone()).collect();
                self.fields.retain(|id, _| self.section_ids.contains(id));
                for section in &sections {
                    self.fields.entry(section.id.clone()).or_default();
                }
                self.sections = sections;
                renumber_sections(&mut self.sections);
                self.field_ids = self
                    .fields
                    .values()
                    .flat_map(|list| list.iter().map(|f| f.id.clone()))
                    .collect();
            }
            Scope::Section(section_id) => {
                let Some(previous) = self.fields.get(section_id) else {
                    let field = entities
                        .first()
                        .map(|e| e.id.clone())
                        .unwrap_or_else(|| EntityId::new(""));
                    return Err(RegistryError::UnknownSection {
                        field,
                        section: section_id.clone(),
                    });
                };
                let prior: HashMap<EntityId, FieldEntry> = previous
                    .iter()
                    .map(|f| (f.id.clone(), f.clone()))
                    .collect();
                for id in prior.keys() {
                    self.field_ids.remove(id);
                }

                let mut rebuilt = Vec::with_capacity(entities.len());
                for e in entities.into_iter().filter(|e| e.kind == EntityKind::Field) {
                    let (created_at, spec_index, type_key) = match prior.get(&e.id) {
                        Some(old) => (old.created_at, old.spec_index, old.type_key.clone()),
                        None => {
                            self.sequence += 1;
                            (self.sequence, None, e.type_key.clone())
                        }
                    };
                    self.field_ids.insert(e.id.clone());
                    rebuilt.push(FieldEntry {
                        id: e.id,
                        type_key: e.type_key.or(type_key),
                        section_id: section_id.clone(),
                        ordinal: e.ordinal,
                        created_at,
                        bound: false,
                        spec_index,
                    });
                }
                renumber_fields(&mut rebuilt);
                self.fields.insert(section_id.clone(), rebuilt);
            }
        }

        self.section_epoch += 1;
        self.revision += 1;
        if !diff.is_clean() {
            obs::emit_registry_drift(&observed.scope, diff.new.len(), diff.missing.len(), diff.reordered.len());
        }
        Ok(diff)
    }

    /// Record a confirmed reorder. The observed id set must match belief.
    pub fn confirm_order(&mut self, observed: &Snapshot) -> Result<u64, RegistryError> {
        let mut entities: Vec<&EntityDescriptor> = observed.entities.iter().collect();
        entities.sort_by_key(|e| e.ordinal);
        let order: Vec<&EntityId> = entities.iter().map(|e| &e.id).collect();

        match &observed.scope {
            Scope::Sections => {
                let known: HashSet<&EntityId> = self.sections.iter().map(|s| &s.id).collect();
                let seen: HashSet<&EntityId> = order.iter().copied().collect();
                if known != seen || order.len() != known.len() {
                    return Err(RegistryError::OrderMismatch {
                        section: EntityId::new(""),
                    });
                }
                self.sections
                    .sort_by_key(|s| order.iter().position(|id| *id == &s.id));
                renumber_sections(&mut self.sections);
                self.section_epoch += 1;
            }
            Scope::Section(section_id) => {
                let mismatch = || RegistryError::OrderMismatch {
                    section: section_id.clone(),
                };
                let list = self.fields.get_mut(section_id).ok_or_else(mismatch)?;
                let known: HashSet<&EntityId> = list.iter().map(|f| &f.id).collect();
                let seen: HashSet<&EntityId> = order.iter().copied().collect();
                if known != seen || order.len() != known.len() {
                    return Err(mismatch());
                }
                list.sort_by_key(|f| order.iter().position(|id| *id == &f.id));
                renumber_fields(list);
            }
        }
        self.revision += 1;
        Ok(self.revision)
    }

    /// Mark `section_id` as the one the canvas displays. Not a structural
    /// mutation, so the revision is unchanged.
    pub fn set_aligned(&mut self, section_id: &EntityId) {
        for s in &mut self.sections {
            s.aligned = &s.id == section_id;
        }
    }

    pub fn clear_alignment(&mut self) {
        for s in &mut self.sections {
            s.aligned = false;
        }
    }

    /// Mark `field_id` as the one the properties panel is bound to.
    pub fn set_bound(&mut self, field_id: &EntityId) {
        for f in self.fields.values_mut().flat_map(|l| l.iter_mut()) {
            f.bound = &f.id == field_id;
        }
    }

    pub fn set_section_title(&mut self, section_id: &EntityId, title: &str) {
        if let Some(s) = self.sections.iter_mut().find(|s| &s.id == section_id) {
            s.title = Some(title.to_string());
        }
    }

    /// Attach a spec slot to a field confirmed through a resync.
    pub fn tag_spec_index(&mut self, field_id: &EntityId, spec_index: usize) {
        if let Some(f) = self
            .fields
            .values_mut()
            .flat_map(|l| l.iter_mut())
            .find(|f| &f.id == field_id)
        {
            f.spec_index = Some(spec_index);
        }
    }

    pub fn sections(&self) -> &[SectionEntry] {
        &self.sections
    }

    pub fn section(&self, id: &EntityId) -> Option<&SectionEntry> {
        self.sections.iter().find(|s| &s.id == id)
    }

    pub fn section_by_title(&self, title: &str) -> Option<&SectionEntry> {
        self.sections
            .iter()
            .find(|s| s.title.as_deref() == Some(title))
    }

    pub fn fields_of(&self, section_id: &EntityId) -> &[FieldEntry] {
        self.fields
            .get(section_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn field(&self, id: &EntityId) -> Option<&FieldEntry> {
        self.fields.values().flat_map(|l| l.iter()).find(|f| &f.id == id)
    }

    /// The field built for the nearest earlier spec slot in this section.
    pub fn anchor_for(&self, section_id: &EntityId, spec_index: usize) -> Option<&FieldEntry> {
        self.fields_of(section_id)
            .iter()
            .filter(|f| f.spec_index.is_some_and(|i| i < spec_index))
            .max_by_key(|f| f.spec_index)
    }

    /// Whether a field for a later spec slot already sits in this section.
    pub fn has_later_field(&self, section_id: &EntityId, spec_index: usize) -> bool {
        self.fields_of(section_id)
            .iter()
            .any(|f| f.spec_index.is_some_and(|i| i > spec_index))
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            revision: self.revision,
            sections: self
                .sections
                .iter()
                .map(|s| SectionView {
                    section: s.clone(),
                    fields: self.fields_of(&s.id).to_vec(),
                })
                .collect(),
        }
    }

    fn ordered_ids(&self, scope: &Scope) -> Vec<EntityId> {
        match scope {
            Scope::Sections => self.sections.iter().map(|s| s.id.clone()).collect(),
            Scope::Section(section_id) => self
                .fields_of(section_id)
                .iter()
                .map(|f| f.id.clone())
                .collect(),
        }
    }
}

fn renumber_sections(sections: &mut [SectionEntry]) {
    for (i, s) in sections.iter_mut().enumerate() {
        s.ordinal = i as u32;
    }
}

fn renumber_fields(fields: &mut [FieldEntry]) {
    for (i, f) in fields.iter_mut().enumerate() {
        f.ordinal = i as u32;
    }
}
