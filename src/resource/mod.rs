//! Effect resources and their shared bookkeeping
//!
//! A resource is a scene-graph node that other elements reference by id: a
//! filter definition, a clip-path or a mask. Resources are stored in a
//! [`ResourceStore`] as a tagged variant and dispatched by `match`; the
//! shared capabilities every kind supports are client invalidation and a
//! resource bounding box.
//!
//! Resource lifetime is owned by the scene-graph node that declares it, not
//! by its clients: removing every client from the registry never destroys
//! the resource itself.

mod cycle;
mod registry;

pub use cycle::{CycleGuard, CycleScope};
pub use registry::{InvalidationRegistry, InvalidationSeverity};

use crate::clip::ClipResource;
use crate::filter::FilterDefinition;
use crate::geometry::Rect;
use crate::mask::MaskResource;
use crate::scene::TargetGeometry;
use crate::units::LengthContext;
use rustc_hash::FxHashMap;

/// Stable identity of a scene-graph element
///
/// Handles are issued by the host scene graph; the pipeline never
/// dereferences them, it only uses them as map keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

/// Stable identity of an effect resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

/// Discriminant of a resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
  Filter,
  Clip,
  Mask,
}

/// A tagged effect resource
#[derive(Debug)]
pub enum EffectResource {
  Filter(FilterDefinition),
  Clip(ClipResource),
  Mask(MaskResource),
}

impl EffectResource {
  /// The resource's kind tag
  pub fn kind(&self) -> ResourceKind {
    match self {
      EffectResource::Filter(_) => ResourceKind::Filter,
      EffectResource::Clip(_) => ResourceKind::Clip,
      EffectResource::Mask(_) => ResourceKind::Mask,
    }
  }

  /// Broadcasts an invalidation to every registered client of `id`
  pub fn invalidate_clients(
    &self,
    registry: &mut InvalidationRegistry,
    id: ResourceId,
    severity: InvalidationSeverity,
  ) {
    registry.invalidate_all_clients(id, severity);
  }

  /// The rectangle this resource affects for the given target
  ///
  /// Used by repaint-rect computation; falls back to the target's own
  /// bounding box when the resource cannot produce a tighter bound.
  pub fn resource_bounding_box(
    &self,
    target: &TargetGeometry,
    ambient: &LengthContext,
  ) -> Rect {
    match self {
      EffectResource::Filter(filter) => filter
        .resolve_region(ambient, target.object_bounding_box)
        .unwrap_or(target.object_bounding_box),
      EffectResource::Clip(clip) => clip.resource_bounding_box(target),
      EffectResource::Mask(mask) => mask.resource_bounding_box(target, ambient),
    }
  }
}

/// Storage for all live effect resources, keyed by stable identity
///
/// Explicit handle-keyed storage replaces raw back-pointers: a removed or
/// rebuilt resource simply stops resolving, it can never dangle.
#[derive(Debug, Default)]
pub struct ResourceStore {
  resources: FxHashMap<ResourceId, EffectResource>,
}

impl ResourceStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Inserts or replaces a resource, returning the previous occupant
  pub fn insert(&mut self, id: ResourceId, resource: EffectResource) -> Option<EffectResource> {
    self.resources.insert(id, resource)
  }

  /// Removes a resource
  ///
  /// The caller is responsible for broadcasting the final invalidation to
  /// clients before removal.
  pub fn remove(&mut self, id: ResourceId) -> Option<EffectResource> {
    self.resources.remove(&id)
  }

  pub fn get(&self, id: ResourceId) -> Option<&EffectResource> {
    self.resources.get(&id)
  }

  pub fn get_mut(&mut self, id: ResourceId) -> Option<&mut EffectResource> {
    self.resources.get_mut(&id)
  }

  /// Convenience accessor for a clip resource
  pub fn clip(&self, id: ResourceId) -> Option<&ClipResource> {
    match self.get(id) {
      Some(EffectResource::Clip(clip)) => Some(clip),
      _ => None,
    }
  }

  /// Convenience accessor for a mask resource
  pub fn mask(&self, id: ResourceId) -> Option<&MaskResource> {
    match self.get(id) {
      Some(EffectResource::Mask(mask)) => Some(mask),
      _ => None,
    }
  }

  /// Convenience accessor for a filter definition
  pub fn filter(&self, id: ResourceId) -> Option<&FilterDefinition> {
    match self.get(id) {
      Some(EffectResource::Filter(filter)) => Some(filter),
      _ => None,
    }
  }

  pub fn len(&self) -> usize {
    self.resources.len()
  }

  pub fn is_empty(&self) -> bool {
    self.resources.is_empty()
  }
}
