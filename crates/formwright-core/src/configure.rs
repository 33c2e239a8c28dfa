//! Field binding and properties-panel configuration.
//!
//! Configuration writes only happen through a [`BoundField`], which the
//! engine hands out after proving the properties panel is bound to the
//! field. Each write re-checks the binding immediately before acting and is
//! confirmed by reading the value back. A write is never issued while the
//! panel reports a different field.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use formwright_surface::{EntityId, Property, Surface, SurfaceError, SurfaceResult, TargetRef};
use tracing::debug;

use crate::domain::{FieldSpec, SkipReason};
use crate::verify::{self, Outcome, VerifiedAction, VerifyPolicy};

/// Proof that the properties panel was bound to a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundField {
    field_id: EntityId,
    type_key: String,
}

impl BoundField {
    pub(crate) fn new(field_id: EntityId, type_key: impl Into<String>) -> Self {
        Self {
            field_id,
            type_key: type_key.into(),
        }
    }

    pub fn field_id(&self) -> &EntityId {
        &self.field_id
    }

    /// Opaque type discriminator, for capability lookups.
    pub fn type_key(&self) -> &str {
        &self.type_key
    }
}

/// Which properties-panel controls each field type exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityTable {
    rules: BTreeMap<String, BTreeSet<String>>,
}

impl CapabilityTable {
    pub fn empty() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    pub fn with(mut self, type_key: &str, controls: &[&str]) -> Self {
        self.rules
            .entry(type_key.to_string())
            .or_default()
            .extend(controls.iter().map(|c| c.to_string()));
        self
    }

    pub fn supports(&self, type_key: &str, control: &str) -> bool {
        self.rules
            .get(type_key)
            .is_some_and(|controls| controls.contains(control))
    }
}

impl Default for CapabilityTable {
    fn default() -> Self {
        Self::empty()
            .with("instruction", &["label", "visibility"])
            .with("short_answer", &["label", "required", "placeholder", "max_length"])
            .with("paragraph", &["label", "required", "rows"])
            .with("multiple_choice", &["label", "required", "options", "shuffle"])
            .with("checkbox", &["label", "required", "options"])
            .with("date", &["label", "required"])
            .with("file_upload", &["label", "required", "max_files"])
            .with("table", &["label", "rows", "columns"])
            .with("signature", &["label", "required"])
    }
}

/// Per-control result of configuring one field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigureReport {
    pub written: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
    pub failed: Vec<ControlFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFailure {
    pub control: String,
    pub reason: SkipReason,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Content configuration for a bound field.
#[async_trait]
pub trait ContentConfigurator: Send + Sync {
    async fn configure(
        &self,
        surface: &dyn Surface,
        field: &BoundField,
        spec: &FieldSpec,
        policy: &VerifyPolicy,
    ) -> ConfigureReport;
}

/// Writes the label and `FieldSpec::properties` through guarded,
/// read-back-verified writes.
#[derive(Debug, Clone, Default)]
pub struct PropertyConfigurator {
    table: CapabilityTable,
}

impl PropertyConfigurator {
    pub fn new(table: CapabilityTable) -> Self {
        Self { table }
    }
}

#[async_trait]
impl ContentConfigurator for PropertyConfigurator {
    async fn configure(
        &self,
        surface: &dyn Surface,
        field: &BoundField,
        spec: &FieldSpec,
        policy: &VerifyPolicy,
    ) -> ConfigureReport {
        let mut report = ConfigureReport::default();
        let label = spec.label.as_ref().map(|l| ("label".to_string(), l.clone()));
        let controls = label
            .into_iter()
            .chain(spec.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        for (control, value) in controls {
            if !self.table.supports(field.type_key(), &control) {
                debug!(field = %field.field_id(), control = %control, "control not supported; skipped");
                report.skipped.push((control, SkipReason::UnsupportedControl));
                continue;
            }
            match guarded_write(surface, field, &control, &value, policy).await {
                Outcome::Confirmed { .. } => report.written.push(control),
                other => report.failed.push(ControlFailure {
                    control,
                    reason: SkipReason::PropertyUnverified,
                    attempts: other.attempts(),
                    last_error: other.last_error(),
                }),
            }
        }
        report
    }
}

struct WriteControl<'a> {
    surface: &'a dyn Surface,
    field: &'a BoundField,
    property: Property,
    value: &'a str,
}

impl WriteControl<'_> {
    async fn bound_to_field(&self) -> SurfaceResult<bool> {
        let bound = self
            .surface
            .bound_field_id(&TargetRef::PropertiesPanel)
            .await?;
        Ok(bound.as_ref() == Some(self.field.field_id()))
    }

    async fn value_matches(&self) -> SurfaceResult<Option<()>> {
        if !self.bound_to_field().await? {
            return Ok(None);
        }
        let current = self
            .surface
            .read_value(&TargetRef::PropertiesPanel, &self.property)
            .await?;
        Ok((current.as_deref() == Some(self.value)).then_some(()))
    }
}

#[async_trait]
impl VerifiedAction for WriteControl<'_> {
    type Proof = ();

    fn kind(&self) -> &'static str {
        "write_property"
    }

    fn target(&self) -> String {
        format!("{} {:?}", self.field.field_id(), self.property)
    }

    async fn precondition(&self) -> SurfaceResult<Option<()>> {
        self.value_matches().await
    }

    async fn act(&self) -> SurfaceResult<()> {
        let bound = self
            .surface
            .bound_field_id(&TargetRef::PropertiesPanel)
            .await?;
        if bound.as_ref() != Some(self.field.field_id()) {
            return Err(SurfaceError::BindingMismatch {
                expected: self.field.field_id().clone(),
                actual: bound,
            });
        }
        self.surface
            .set_value(&TargetRef::PropertiesPanel, &self.property, self.value)
            .await
    }

    async fn expectation(&self) -> SurfaceResult<Option<()>> {
        self.value_matches().await
    }
}

/// Write one control on the properties panel of a bound field.
pub async fn guarded_write(
    surface: &dyn Surface,
    field: &BoundField,
    control: &str,
    value: &str,
    policy: &VerifyPolicy,
) -> Outcome<()> {
    let action = WriteControl {
        surface,
        field,
        property: Property::Control(control.to_string()),
        value,
    };
    verify::run(&action, policy).await
}

/// Click a field until the properties panel proves it is bound to it.
pub(crate) struct BindField<'a> {
    pub surface: &'a dyn Surface,
    pub field_id: &'a EntityId,
    pub type_key: &'a str,
}

impl BindField<'_> {
    async fn bound(&self) -> SurfaceResult<Option<BoundField>> {
        let bound = self
            .surface
            .bound_field_id(&TargetRef::PropertiesPanel)
            .await?;
        Ok((bound.as_ref() == Some(self.field_id))
            .then(|| BoundField::new(self.field_id.clone(), self.type_key)))
    }
}

#[async_trait]
impl VerifiedAction for BindField<'_> {
    type Proof = BoundField;

    fn kind(&self) -> &'static str {
        "bind_field"
    }

    fn target(&self) -> String {
        self.field_id.to_string()
    }

    async fn precondition(&self) -> SurfaceResult<Option<BoundField>> {
        self.bound().await
    }

    async fn act(&self) -> SurfaceResult<()> {
        self.surface
            .click(&TargetRef::Field(self.field_id.clone()))
            .await
    }

    async fn expectation(&self) -> SurfaceResult<Option<BoundField>> {
        self.bound().await
    }
}
