//! Formwright-Surface: collaborator seam for the formwright build engine
//!
//! The engine never touches a browser directly. Everything it needs from the
//! editing surface and the activity catalog is expressed as a trait here, so
//! a real driver and the in-memory simulation are interchangeable.
//!
//! ## Key Components
//!
//! - `UiObservation`, `UiMutation`, `ReadBack`, `BindingProbe`: the surface
//! - `ActivityCatalog`: template listing, shell creation and builder navigation
//! - `SimulatedSurface`, `SimulatedCatalog`: scriptable fakes with fault injection

mod error;
pub mod fakes;
pub mod surface_traits;

pub use error::SurfaceError;
pub use fakes::{FaultScript, MutationRecord, SimulatedCatalog, SimulatedSurface};
pub use surface_traits::{
    ActivityCatalog, BindingProbe, DropPosition, EntityDescriptor, EntityId, EntityKind, Property,
    ReadBack, Scope, ShellRequest, Snapshot, Surface, SurfaceResult, TargetRef, TemplateMatch,
    TemplateStatus, UiMutation, UiObservation,
};
