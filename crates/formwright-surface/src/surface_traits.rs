//! Collaborator trait definitions for the build engine
//!
//! These traits define the capabilities the engine consumes but never
//! implements:
//! - `UiObservation`: read the currently rendered entities for a scope
//! - `UiMutation`: single best-effort gestures (click, drag, select, set-value)
//! - `ReadBack`: read one property of one element
//! - `BindingProbe`: which field the properties panel is bound to
//! - `ActivityCatalog`: locate, create and open activity templates
//!
//! All traits are async and driver-agnostic. A scriptable in-memory surface
//! is provided for testing via the `fakes` module.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SurfaceError;

/// Result type for surface operations
pub type SurfaceResult<T> = std::result::Result<T, SurfaceError>;

// ---------------------------------------------------------------------------
// Identity and descriptors
// ---------------------------------------------------------------------------

/// Identifier assigned by the external UI once an entity exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Structural entity kinds the engine tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Section,
    Field,
}

/// One entity as read directly from the rendered UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub id: EntityId,
    pub kind: EntityKind,
    /// Position among siblings, as rendered.
    pub ordinal: u32,
    /// Owning section for fields; `None` for sections.
    pub section_id: Option<EntityId>,
    /// Opaque field type discriminator, when the UI exposes it.
    pub type_key: Option<String>,
    pub title: Option<String>,
}

impl EntityDescriptor {
    pub fn section(id: EntityId, ordinal: u32, title: Option<String>) -> Self {
        Self {
            id,
            kind: EntityKind::Section,
            ordinal,
            section_id: None,
            type_key: None,
            title,
        }
    }

    pub fn field(id: EntityId, section_id: EntityId, ordinal: u32, type_key: Option<String>) -> Self {
        Self {
            id,
            kind: EntityKind::Field,
            ordinal,
            section_id: Some(section_id),
            type_key,
            title: None,
        }
    }
}

/// What part of the editing surface an observation covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// The section list in the sidebar.
    Sections,
    /// The fields rendered on the canvas for one section.
    Section(EntityId),
}

impl Scope {
    pub fn kind(&self) -> EntityKind {
        match self {
            Scope::Sections => EntityKind::Section,
            Scope::Section(_) => EntityKind::Field,
        }
    }
}

/// Ordered list of entities currently rendered for a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub scope: Scope,
    pub entities: Vec<EntityDescriptor>,
}

impl Snapshot {
    pub fn new(scope: Scope, entities: Vec<EntityDescriptor>) -> Self {
        Self { scope, entities }
    }

    pub fn ids(&self) -> HashSet<EntityId> {
        self.entities.iter().map(|e| e.id.clone()).collect()
    }

    pub fn get(&self, id: &EntityId) -> Option<&EntityDescriptor> {
        self.entities.iter().find(|e| &e.id == id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// Where a dropped field should land inside a section.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPosition {
    Top,
    Bottom,
    After(EntityId),
}

/// A description of how to find an element, resolved afresh on every use.
///
/// References are never cached element handles: the driver re-resolves the
/// target each time it is passed in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetRef {
    /// A section entry in the sidebar list.
    SectionItem(EntityId),
    /// A field wrapper on the canvas.
    Field(EntityId),
    /// The canvas root, which reports the section it currently displays.
    CanvasRoot,
    /// The sidebar control that appends a new section.
    AddSectionButton,
    /// A field-type card in the palette.
    PaletteCard(String),
    /// A drop zone inside a displayed section.
    DropZone {
        section_id: EntityId,
        position: DropPosition,
    },
    /// The field properties panel.
    PropertiesPanel,
}

impl std::fmt::Display for TargetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetRef::SectionItem(id) => write!(f, "section item {id}"),
            TargetRef::Field(id) => write!(f, "field {id}"),
            TargetRef::CanvasRoot => write!(f, "canvas root"),
            TargetRef::AddSectionButton => write!(f, "add-section button"),
            TargetRef::PaletteCard(key) => write!(f, "palette card {key}"),
            TargetRef::DropZone {
                section_id,
                position,
            } => write!(f, "drop zone {section_id}/{position:?}"),
            TargetRef::PropertiesPanel => write!(f, "properties panel"),
        }
    }
}

/// A readable or writable property of an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Property {
    /// Section id the canvas root reports.
    SectionId,
    /// Activity code shown in the builder header.
    ActivityCode,
    Title,
    /// A named control on the properties panel.
    Control(String),
}

// ---------------------------------------------------------------------------
// UI capabilities
// ---------------------------------------------------------------------------

/// Reads what is actually rendered, never a cached view.
#[async_trait]
pub trait UiObservation: Send + Sync {
    async fn observe(&self, scope: &Scope) -> SurfaceResult<Snapshot>;
}

/// Single best-effort mutating gestures.
///
/// A returned `Ok(())` only means the gesture was delivered; it says nothing
/// about whether the UI applied it.
#[async_trait]
pub trait UiMutation: Send + Sync {
    async fn click(&self, target: &TargetRef) -> SurfaceResult<()>;

    async fn drag(&self, source: &TargetRef, dest: &TargetRef) -> SurfaceResult<()>;

    async fn select(&self, target: &TargetRef) -> SurfaceResult<()>;

    async fn set_value(&self, target: &TargetRef, property: &Property, value: &str)
        -> SurfaceResult<()>;
}

/// Read-back half of prove/re-prove.
#[async_trait]
pub trait ReadBack: Send + Sync {
    async fn read_value(&self, target: &TargetRef, property: &Property)
        -> SurfaceResult<Option<String>>;
}

/// Which field a properties panel is currently bound to.
#[async_trait]
pub trait BindingProbe: Send + Sync {
    async fn bound_field_id(&self, panel: &TargetRef) -> SurfaceResult<Option<EntityId>>;
}

/// Everything the engine needs from one editing surface.
pub trait Surface: UiObservation + UiMutation + ReadBack + BindingProbe {}

impl<T> Surface for T where T: UiObservation + UiMutation + ReadBack + BindingProbe + ?Sized {}

// ---------------------------------------------------------------------------
// ActivityCatalog
// ---------------------------------------------------------------------------

/// Listing an activity template appears under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Active,
    Inactive,
}

/// An existing activity template found in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMatch {
    pub code: String,
    pub title: String,
    pub template_id: String,
    pub status: TemplateStatus,
    /// Assigned templates are locked and need a new revision to change.
    pub locked: bool,
}

/// Request to create an empty activity shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellRequest {
    pub code: String,
    pub title: String,
    pub category: Option<String>,
}

/// Activity template listing and creation.
#[async_trait]
pub trait ActivityCatalog: Send + Sync {
    /// Search one listing for a template with this exact code.
    async fn find(&self, code: &str, status: TemplateStatus) -> SurfaceResult<Option<TemplateMatch>>;

    /// Create an empty activity shell. Success means "submitted".
    async fn create_shell(&self, request: &ShellRequest) -> SurfaceResult<()>;

    /// Navigate the editing surface to the builder for a template.
    async fn open_builder(&self, template: &TemplateMatch) -> SurfaceResult<()>;
}
