//! Visual-effect compositing pipeline for retained scene graphs
//!
//! `layerfx` applies filter effects, clip-paths and masks to elements of a
//! retained scene graph, producing correctly-transformed pixel output that
//! is composited back into a parent drawing surface. It reconciles three
//! coordinate regimes (device pixels, user units, bounding-box fractions),
//! manages offscreen buffers under strict size limits, tracks resource
//! invalidation across reference edges, and guards every recursive resource
//! dereference against cycles.
//!
//! The scene graph, layout and style systems are external collaborators:
//! they hand over resolved geometry ([`scene::TargetGeometry`]), declared
//! effect parameters and a rasterization callback
//! ([`scene::ContentSource`]); this crate drives the capture/apply/composite
//! sequence on top of them.
//!
//! Everything is single-threaded and cooperative: one paint traversal owns
//! its canvases, chains and cycle guard exclusively, and every failure is
//! recovered within the paint call that caused it — a failed effect paints
//! as "effect not applied", never as a broken pipeline.

pub mod canvas;
pub mod clip;
pub mod color;
pub mod error;
pub mod filter;
pub mod geometry;
pub mod mask;
pub mod resource;
pub mod scene;
pub mod surface;
pub mod units;

pub use canvas::Canvas;
pub use clip::{ClipResource, ClipShape, ClipStrategy, ShapeKind};
pub use color::Rgba;
pub use error::{EffectError, Error, ResolveError, Result, SurfaceError};
pub use filter::layer::{FilterRegime, LayerFilterController, PassState};
pub use filter::{EffectChain, EffectOperation, FilterDefinition, InputRef, Primitive};
pub use geometry::{Point, Rect, Size};
pub use mask::MaskResource;
pub use resource::{
  CycleGuard, EffectResource, ElementId, InvalidationRegistry, InvalidationSeverity, ResourceId,
  ResourceStore,
};
pub use scene::{ColorInterpolation, ContentSource, MaskKind, PaintMode, TargetGeometry};
pub use units::{LengthContext, LengthMode, LengthValue, UnitSpace};
