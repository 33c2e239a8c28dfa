//! In-memory fakes for the surface traits (testing and simulation)
//!
//! Provides `SimulatedSurface` and `SimulatedCatalog`, which satisfy the
//! trait contracts without a browser. A `FaultScript` makes the simulated
//! surface misbehave the way the real editor does: drops that render late,
//! drops that silently vanish or apply twice, ignored section selections and
//! a properties panel that binds to the wrong field.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::SurfaceError;
use crate::surface_traits::*;

// ---------------------------------------------------------------------------
// FaultScript
// ---------------------------------------------------------------------------

/// Scripted misbehaviour. Drop numbers are 1-based and count palette drops.
#[derive(Debug, Clone, Default)]
pub struct FaultScript {
    lagged_drops: HashMap<u32, Duration>,
    silent_drops: HashSet<u32>,
    duplicate_drops: HashSet<u32>,
    ignored_selects: u32,
    misbound_clicks: u32,
}

impl FaultScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `nth` drop applies, but only renders after `delay`.
    pub fn lag_drop(mut self, nth: u32, delay: Duration) -> Self {
        self.lagged_drops.insert(nth, delay);
        self
    }

    /// The `nth` drop is accepted and never applied.
    pub fn silent_drop(mut self, nth: u32) -> Self {
        self.silent_drops.insert(nth);
        self
    }

    /// The `nth` drop applies twice.
    pub fn duplicate_drop(mut self, nth: u32) -> Self {
        self.duplicate_drops.insert(nth);
        self
    }

    /// The next `count` section selections are ignored.
    pub fn ignore_selects(mut self, count: u32) -> Self {
        self.ignored_selects = count;
        self
    }

    /// The next `count` field clicks bind the panel to a neighbouring field.
    pub fn misbind_clicks(mut self, count: u32) -> Self {
        self.misbound_clicks = count;
        self
    }
}

/// One gesture delivered to the simulated surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRecord {
    Click(TargetRef),
    Drag { source: TargetRef, dest: TargetRef },
    Select(TargetRef),
    SetValue {
        target: TargetRef,
        property: Property,
        value: String,
    },
}

/// Rendered state of one field, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub id: EntityId,
    pub type_key: String,
    pub title: Option<String>,
    pub properties: BTreeMap<String, String>,
}

/// Rendered state of one section, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionLayout {
    pub id: EntityId,
    pub title: String,
    pub fields: Vec<FieldLayout>,
}

// ---------------------------------------------------------------------------
// SimulatedSurface
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PendingField {
    section_id: EntityId,
    index: usize,
    field: FieldLayout,
    ready_at: Instant,
}

#[derive(Debug, Default)]
struct SimState {
    activity_code: Option<String>,
    sections: Vec<SectionLayout>,
    canvas_section: Option<EntityId>,
    bound_field: Option<EntityId>,
    next_id: u64,
    drops: u32,
    pending: Vec<PendingField>,
    faults: FaultScript,
    mutations: Vec<MutationRecord>,
}

impl SimState {
    fn mint(&mut self, prefix: &str) -> EntityId {
        self.next_id += 1;
        EntityId::new(format!("{prefix}-{}", self.next_id))
    }

    fn section_mut(&mut self, id: &EntityId) -> Option<&mut SectionLayout> {
        self.sections.iter_mut().find(|s| &s.id == id)
    }

    fn field_mut(&mut self, id: &EntityId) -> Option<&mut FieldLayout> {
        self.sections
            .iter_mut()
            .flat_map(|s| s.fields.iter_mut())
            .find(|f| &f.id == id)
    }

    fn field(&self, id: &EntityId) -> Option<&FieldLayout> {
        self.sections
            .iter()
            .flat_map(|s| s.fields.iter())
            .find(|f| &f.id == id)
    }

    fn section_of(&self, field_id: &EntityId) -> Option<&SectionLayout> {
        self.sections
            .iter()
            .find(|s| s.fields.iter().any(|f| &f.id == field_id))
    }

    /// Render every lagged drop whose delay has elapsed.
    fn materialize(&mut self, now: Instant) {
        let (ready, waiting): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|p| p.ready_at <= now);
        self.pending = waiting;
        for p in ready {
            if let Some(section) = self.section_mut(&p.section_id) {
                let index = p.index.min(section.fields.len());
                section.fields.insert(index, p.field);
            }
        }
    }

    fn drop_index(&self, section: &SectionLayout, position: &DropPosition, dest: &TargetRef)
        -> SurfaceResult<usize>
    {
        match position {
            DropPosition::Top => Ok(0),
            DropPosition::Bottom => Ok(section.fields.len()),
            DropPosition::After(anchor) => section
                .fields
                .iter()
                .position(|f| &f.id == anchor)
                .map(|i| i + 1)
                .ok_or_else(|| SurfaceError::ElementNotFound {
                    target: dest.clone(),
                }),
        }
    }

    fn drop_palette_card(&mut self, type_key: &str, dest: &TargetRef) -> SurfaceResult<()> {
        let TargetRef::DropZone {
            section_id,
            position,
        } = dest
        else {
            return Err(rejected("drag", dest, "destination is not a drop zone"));
        };
        if self.canvas_section.as_ref() != Some(section_id) {
            return Err(SurfaceError::ElementNotFound {
                target: dest.clone(),
            });
        }

        self.drops += 1;
        let nth = self.drops;
        if self.faults.silent_drops.contains(&nth) {
            tracing::debug!(drop = nth, "simulated drop silently discarded");
            return Ok(());
        }

        let section = self
            .sections
            .iter()
            .find(|s| &s.id == section_id)
            .ok_or_else(|| SurfaceError::ElementNotFound {
                target: dest.clone(),
            })?;
        let index = self.drop_index(section, position, dest)?;
        let copies = if self.faults.duplicate_drops.contains(&nth) { 2 } else { 1 };
        let lag = self.faults.lagged_drops.get(&nth).copied();

        for offset in 0..copies {
            let field = FieldLayout {
                id: self.mint("f"),
                type_key: type_key.to_string(),
                title: None,
                properties: BTreeMap::new(),
            };
            match lag {
                Some(delay) => self.pending.push(PendingField {
                    section_id: section_id.clone(),
                    index: index + offset,
                    field,
                    ready_at: Instant::now() + delay,
                }),
                None => {
                    if let Some(section) = self.section_mut(section_id) {
                        section.fields.insert(index + offset, field);
                    }
                }
            }
        }
        Ok(())
    }

    fn move_field(&mut self, field_id: &EntityId, dest: &TargetRef) -> SurfaceResult<()> {
        let TargetRef::DropZone {
            section_id,
            position,
        } = dest
        else {
            return Err(rejected("drag", dest, "destination is not a drop zone"));
        };
        let source = TargetRef::Field(field_id.clone());
        let section = self
            .section_mut(section_id)
            .ok_or_else(|| SurfaceError::ElementNotFound {
                target: dest.clone(),
            })?;
        let from = section
            .fields
            .iter()
            .position(|f| &f.id == field_id)
            .ok_or(SurfaceError::ElementNotFound { target: source })?;
        let field = section.fields.remove(from);
        let index = match position {
            DropPosition::Top => 0,
            DropPosition::Bottom => section.fields.len(),
            DropPosition::After(anchor) => match section.fields.iter().position(|f| &f.id == anchor) {
                Some(i) => i + 1,
                None => {
                    section.fields.insert(from, field);
                    return Err(SurfaceError::ElementNotFound {
                        target: dest.clone(),
                    });
                }
            },
        };
        section.fields.insert(index, field);
        Ok(())
    }
}

fn rejected(action: &str, target: &TargetRef, reason: &str) -> SurfaceError {
    SurfaceError::ActionRejected {
        action: action.to_string(),
        target: target.clone(),
        reason: reason.to_string(),
    }
}

/// Scriptable in-memory editing surface.
#[derive(Debug, Default)]
pub struct SimulatedSurface {
    state: Mutex<SimState>,
}

impl SimulatedSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: FaultScript) -> Self {
        let surface = Self::new();
        surface.set_faults(faults);
        surface
    }

    /// Replace the fault script. Drop numbering is not reset.
    pub fn set_faults(&self, faults: FaultScript) {
        self.state.lock().unwrap().faults = faults;
    }

    /// Show an empty builder for `code`, as opening a fresh activity does.
    pub fn load_activity(&self, code: &str) {
        let mut state = self.state.lock().unwrap();
        state.activity_code = Some(code.to_string());
        state.sections.clear();
        state.pending.clear();
        state.canvas_section = None;
        state.bound_field = None;
    }

    /// Add a section directly, bypassing the gesture log.
    pub fn seed_section(&self, title: &str) -> EntityId {
        let mut state = self.state.lock().unwrap();
        let id = state.mint("s");
        state.sections.push(SectionLayout {
            id: id.clone(),
            title: title.to_string(),
            fields: Vec::new(),
        });
        id
    }

    /// Add a field directly, bypassing the gesture log.
    pub fn seed_field(&self, section_id: &EntityId, type_key: &str) -> Option<EntityId> {
        let mut state = self.state.lock().unwrap();
        let id = state.mint("f");
        let section = state.section_mut(section_id)?;
        section.fields.push(FieldLayout {
            id: id.clone(),
            type_key: type_key.to_string(),
            title: None,
            properties: BTreeMap::new(),
        });
        Some(id)
    }

    /// Current rendered layout, including lagged drops that are now due.
    pub fn layout(&self) -> Vec<SectionLayout> {
        let mut state = self.state.lock().unwrap();
        state.materialize(Instant::now());
        state.sections.clone()
    }

    pub fn mutations(&self) -> Vec<MutationRecord> {
        self.state.lock().unwrap().mutations.clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.state.lock().unwrap().mutations.len()
    }

    /// Number of palette drops delivered so far.
    pub fn drop_count(&self) -> u32 {
        self.state.lock().unwrap().drops
    }

    pub fn field_property(&self, field_id: &EntityId, name: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .field(field_id)
            .and_then(|f| f.properties.get(name).cloned())
    }
}

#[async_trait]
impl UiObservation for SimulatedSurface {
    async fn observe(&self, scope: &Scope) -> SurfaceResult<Snapshot> {
        let mut state = self.state.lock().unwrap();
        state.materialize(Instant::now());
        let entities = match scope {
            Scope::Sections => state
                .sections
                .iter()
                .enumerate()
                .map(|(i, s)| EntityDescriptor::section(s.id.clone(), i as u32, Some(s.title.clone())))
                .collect(),
            Scope::Section(section_id) => {
                let section = state
                    .sections
                    .iter()
                    .find(|s| &s.id == section_id)
                    .ok_or_else(|| SurfaceError::ElementNotFound {
                        target: TargetRef::SectionItem(section_id.clone()),
                    })?;
                section
                    .fields
                    .iter()
                    .enumerate()
                    .map(|(i, f)| {
                        let mut desc = EntityDescriptor::field(
                            f.id.clone(),
                            section_id.clone(),
                            i as u32,
                            Some(f.type_key.clone()),
                        );
                        desc.title = f.title.clone();
                        desc
                    })
                    .collect()
            }
        };
        Ok(Snapshot::new(scope.clone(), entities))
    }
}

#[async_trait]
impl UiMutation for SimulatedSurface {
    async fn click(&self, target: &TargetRef) -> SurfaceResult<()> {
        let mut state = self.state.lock().unwrap();
        state.materialize(Instant::now());
        state.mutations.push(MutationRecord::Click(target.clone()));
        match target {
            TargetRef::AddSectionButton => {
                let id = state.mint("s");
                state.sections.push(SectionLayout {
                    id,
                    title: "Untitled section".to_string(),
                    fields: Vec::new(),
                });
                Ok(())
            }
            TargetRef::Field(field_id) => {
                let section = state
                    .section_of(field_id)
                    .ok_or_else(|| SurfaceError::ElementNotFound {
                        target: target.clone(),
                    })?;
                let neighbour = section
                    .fields
                    .iter()
                    .find(|f| &f.id != field_id)
                    .map(|f| f.id.clone());
                if state.faults.misbound_clicks > 0 {
                    state.faults.misbound_clicks -= 1;
                    state.bound_field = neighbour;
                } else {
                    state.bound_field = Some(field_id.clone());
                }
                Ok(())
            }
            TargetRef::CanvasRoot => Ok(()),
            other => Err(rejected("click", other, "not clickable")),
        }
    }

    async fn drag(&self, source: &TargetRef, dest: &TargetRef) -> SurfaceResult<()> {
        let mut state = self.state.lock().unwrap();
        state.materialize(Instant::now());
        state.mutations.push(MutationRecord::Drag {
            source: source.clone(),
            dest: dest.clone(),
        });
        match source {
            TargetRef::PaletteCard(type_key) => state.drop_palette_card(type_key, dest),
            TargetRef::Field(field_id) => state.move_field(field_id, dest),
            other => Err(rejected("drag", other, "not draggable")),
        }
    }

    async fn select(&self, target: &TargetRef) -> SurfaceResult<()> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push(MutationRecord::Select(target.clone()));
        let TargetRef::SectionItem(section_id) = target else {
            return Err(rejected("select", target, "not selectable"));
        };
        if !state.sections.iter().any(|s| &s.id == section_id) {
            return Err(SurfaceError::ElementNotFound {
                target: target.clone(),
            });
        }
        if state.faults.ignored_selects > 0 {
            state.faults.ignored_selects -= 1;
            return Ok(());
        }
        state.canvas_section = Some(section_id.clone());
        state.bound_field = None;
        Ok(())
    }

    async fn set_value(
        &self,
        target: &TargetRef,
        property: &Property,
        value: &str,
    ) -> SurfaceResult<()> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push(MutationRecord::SetValue {
            target: target.clone(),
            property: property.clone(),
            value: value.to_string(),
        });
        let not_found = || SurfaceError::ElementNotFound {
            target: target.clone(),
        };
        match (target, property) {
            (TargetRef::SectionItem(id), Property::Title) => {
                state.section_mut(id).ok_or_else(not_found)?.title = value.to_string();
                Ok(())
            }
            (TargetRef::Field(id), Property::Title) => {
                state.field_mut(id).ok_or_else(not_found)?.title = Some(value.to_string());
                Ok(())
            }
            (TargetRef::PropertiesPanel, Property::Control(name)) => {
                let bound = state.bound_field.clone().ok_or_else(not_found)?;
                state
                    .field_mut(&bound)
                    .ok_or_else(not_found)?
                    .properties
                    .insert(name.clone(), value.to_string());
                Ok(())
            }
            _ => Err(rejected("set_value", target, "property is read-only")),
        }
    }
}

#[async_trait]
impl ReadBack for SimulatedSurface {
    async fn read_value(
        &self,
        target: &TargetRef,
        property: &Property,
    ) -> SurfaceResult<Option<String>> {
        let mut state = self.state.lock().unwrap();
        state.materialize(Instant::now());
        let not_found = || SurfaceError::ElementNotFound {
            target: target.clone(),
        };
        match (target, property) {
            (TargetRef::CanvasRoot, Property::SectionId) => {
                Ok(state.canvas_section.as_ref().map(|id| id.to_string()))
            }
            (TargetRef::CanvasRoot, Property::ActivityCode) => Ok(state.activity_code.clone()),
            (TargetRef::SectionItem(id), Property::Title) => state
                .sections
                .iter()
                .find(|s| &s.id == id)
                .map(|s| Some(s.title.clone()))
                .ok_or_else(not_found),
            (TargetRef::Field(id), Property::Title) => {
                state.field(id).map(|f| f.title.clone()).ok_or_else(not_found)
            }
            (TargetRef::Field(id), Property::Control(name)) => state
                .field(id)
                .map(|f| f.properties.get(name).cloned())
                .ok_or_else(not_found),
            (TargetRef::PropertiesPanel, Property::Control(name)) => {
                let Some(bound) = state.bound_field.clone() else {
                    return Err(not_found());
                };
                Ok(state.field(&bound).and_then(|f| f.properties.get(name).cloned()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl BindingProbe for SimulatedSurface {
    async fn bound_field_id(&self, panel: &TargetRef) -> SurfaceResult<Option<EntityId>> {
        if panel != &TargetRef::PropertiesPanel {
            return Err(SurfaceError::ElementNotFound {
                target: panel.clone(),
            });
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .bound_field
            .clone()
            .filter(|id| state.field(id).is_some()))
    }
}

// ---------------------------------------------------------------------------
// SimulatedCatalog
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CatalogState {
    templates: Vec<TemplateMatch>,
    refused_codes: HashSet<String>,
    searches: Vec<(String, TemplateStatus)>,
    next_id: u64,
}

/// In-memory template catalog that opens builders on a `SimulatedSurface`.
#[derive(Debug)]
pub struct SimulatedCatalog {
    surface: Arc<SimulatedSurface>,
    state: Mutex<CatalogState>,
}

impl SimulatedCatalog {
    pub fn new(surface: Arc<SimulatedSurface>) -> Self {
        Self {
            surface,
            state: Mutex::new(CatalogState::default()),
        }
    }

    /// Pre-populate an existing template.
    pub fn with_template(self, template: TemplateMatch) -> Self {
        self.state.lock().unwrap().templates.push(template);
        self
    }

    /// Make shell creation fail for `code`.
    pub fn refuse_shell(self, code: &str) -> Self {
        self.state.lock().unwrap().refused_codes.insert(code.to_string());
        self
    }

    /// Every search issued, in order.
    pub fn searches(&self) -> Vec<(String, TemplateStatus)> {
        self.state.lock().unwrap().searches.clone()
    }

    pub fn templates(&self) -> Vec<TemplateMatch> {
        self.state.lock().unwrap().templates.clone()
    }
}

#[async_trait]
impl ActivityCatalog for SimulatedCatalog {
    async fn find(&self, code: &str, status: TemplateStatus) -> SurfaceResult<Option<TemplateMatch>> {
        let mut state = self.state.lock().unwrap();
        state.searches.push((code.to_string(), status));
        Ok(state
            .templates
            .iter()
            .find(|t| t.code == code && t.status == status)
            .cloned())
    }

    async fn create_shell(&self, request: &ShellRequest) -> SurfaceResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.refused_codes.contains(&request.code) {
            return Err(SurfaceError::Catalog(format!(
                "shell creation refused for {}",
                request.code
            )));
        }
        state.next_id += 1;
        let template = TemplateMatch {
            code: request.code.clone(),
            title: request.title.clone(),
            template_id: format!("tpl-{}", state.next_id),
            status: TemplateStatus::Inactive,
            locked: false,
        };
        state.templates.push(template);
        Ok(())
    }

    async fn open_builder(&self, template: &TemplateMatch) -> SurfaceResult<()> {
        let known = self
            .state
            .lock()
            .unwrap()
            .templates
            .iter()
            .any(|t| t.template_id == template.template_id);
        if !known {
            return Err(SurfaceError::Catalog(format!(
                "no template with id {}",
                template.template_id
            )));
        }
        self.surface.load_activity(&template.code);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drop_zone(section_id: &EntityId, position: DropPosition) -> TargetRef {
        TargetRef::DropZone {
            section_id: section_id.clone(),
            position,
        }
    }

    #[tokio::test]
    async fn test_drop_into_displayed_section() {
        let surface = SimulatedSurface::new();
        let sid = surface.seed_section("Intro");
        surface.select(&TargetRef::SectionItem(sid.clone())).await.unwrap();

        surface
            .drag(
                &TargetRef::PaletteCard("short_answer".into()),
                &drop_zone(&sid, DropPosition::Bottom),
            )
            .await
            .unwrap();

        let snap = surface.observe(&Scope::Section(sid)).await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.entities[0].type_key.as_deref(), Some("short_answer"));
    }

    #[tokio::test]
    async fn test_drop_rejected_when_section_not_displayed() {
        let surface = SimulatedSurface::new();
        let sid = surface.seed_section("Intro");
        let err = surface
            .drag(
                &TargetRef::PaletteCard("paragraph".into()),
                &drop_zone(&sid, DropPosition::Bottom),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SurfaceError::ElementNotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lagged_drop_renders_after_delay() {
        let surface = SimulatedSurface::with_faults(
            FaultScript::new().lag_drop(1, Duration::from_millis(500)),
        );
        let sid = surface.seed_section("Intro");
        surface.select(&TargetRef::SectionItem(sid.clone())).await.unwrap();
        surface
            .drag(
                &TargetRef::PaletteCard("paragraph".into()),
                &drop_zone(&sid, DropPosition::Bottom),
            )
            .await
            .unwrap();

        let scope = Scope::Section(sid);
        assert!(surface.observe(&scope).await.unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(surface.observe(&scope).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_and_silent_drops() {
        let surface = SimulatedSurface::with_faults(
            FaultScript::new().silent_drop(1).duplicate_drop(2),
        );
        let sid = surface.seed_section("Intro");
        surface.select(&TargetRef::SectionItem(sid.clone())).await.unwrap();
        for _ in 0..2 {
            surface
                .drag(
                    &TargetRef::PaletteCard("paragraph".into()),
                    &drop_zone(&sid, DropPosition::Bottom),
                )
                .await
                .unwrap();
        }
        assert_eq!(surface.drop_count(), 2);
        assert_eq!(surface.observe(&Scope::Section(sid)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_misbound_click_binds_neighbour() {
        let surface = SimulatedSurface::with_faults(FaultScript::new().misbind_clicks(1));
        let sid = surface.seed_section("Intro");
        let first = surface.seed_field(&sid, "paragraph").unwrap();
        let second = surface.seed_field(&sid, "paragraph").unwrap();

        surface.click(&TargetRef::Field(second.clone())).await.unwrap();
        let bound = surface.bound_field_id(&TargetRef::PropertiesPanel).await.unwrap();
        assert_eq!(bound, Some(first));

        surface.click(&TargetRef::Field(second.clone())).await.unwrap();
        let bound = surface.bound_field_id(&TargetRef::PropertiesPanel).await.unwrap();
        assert_eq!(bound, Some(second));
    }

    #[tokio::test]
    async fn test_reorder_moves_field_after_anchor() {
        let surface = SimulatedSurface::new();
        let sid = surface.seed_section("Intro");
        let a = surface.seed_field(&sid, "paragraph").unwrap();
        let b = surface.seed_field(&sid, "paragraph").unwrap();
        let c = surface.seed_field(&sid, "paragraph").unwrap();

        surface
            .drag(
                &TargetRef::Field(c.clone()),
                &drop_zone(&sid, DropPosition::After(a.clone())),
            )
            .await
            .unwrap();

        let order: Vec<EntityId> = surface.layout()[0].fields.iter().map(|f| f.id.clone()).collect();
        assert_eq!(order, vec![a, c, b]);
    }

    #[tokio::test]
    async fn test_catalog_create_then_open() {
        let surface = Arc::new(SimulatedSurface::new());
        let catalog = SimulatedCatalog::new(Arc::clone(&surface));
        let request = ShellRequest {
            code: "CPC-01".into(),
            title: "Written assessment".into(),
            category: None,
        };
        catalog.create_shell(&request).await.unwrap();

        let found = catalog
            .find("CPC-01", TemplateStatus::Inactive)
            .await
            .unwrap()
            .expect("created template");
        catalog.open_builder(&found).await.unwrap();

        let code = surface
            .read_value(&TargetRef::CanvasRoot, &Property::ActivityCode)
            .await
            .unwrap();
        assert_eq!(code.as_deref(), Some("CPC-01"));
        assert_eq!(catalog.searches().len(), 1);
    }

    #[tokio::test]
    async fn test_catalog_refuses_shell() {
        let surface = Arc::new(SimulatedSurface::new());
        let catalog = SimulatedCatalog::new(surface).refuse_shell("CPC-03");
        let request = ShellRequest {
            code: "CPC-03".into(),
            title: "Broken".into(),
            category: None,
        };
        assert!(matches!(
            catalog.create_shell(&request).await,
            Err(SurfaceError::Catalog(_))
        ));
    }
}
