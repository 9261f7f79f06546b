//! Reverse-client bookkeeping for effect resources
//!
//! Every resource kind shares the same invalidation protocol: elements
//! register as clients of the resources they reference, and any change to a
//! resource broadcasts to its clients with a severity describing how much
//! work the client must redo. The registry stores identities only — no
//! references into the scene graph — so removal or rebuild of either side
//! cannot dangle.

use super::{ElementId, ResourceId};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

/// How much work an invalidated client must redo
///
/// Later variants strictly subsume earlier ones; pending invalidations for
/// the same client coalesce to the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InvalidationSeverity {
  /// Only the client's parent chain needs repropagation (no repaint of the
  /// client's own content)
  ParentOnly,
  /// The client's painted boundaries changed; repaint without relayout
  Boundaries,
  /// Geometry feeding the resource changed; the client needs layout and
  /// repaint
  LayoutAndBoundaries,
}

/// Resource → clients mapping with transactional reference updates
///
/// Invariant: a client appears in exactly the client sets of the resources
/// it currently references. [`InvalidationRegistry::set_references`] updates
/// both directions of the mapping in one step.
///
/// Broadcast invalidations are queued rather than dispatched; the host
/// layout/paint engine drains them at a phase boundary with
/// [`InvalidationRegistry::drain_pending`]. Painting never triggers layout
/// directly.
#[derive(Debug, Default)]
pub struct InvalidationRegistry {
  clients: FxHashMap<ResourceId, FxHashSet<ElementId>>,
  references: FxHashMap<ElementId, FxHashSet<ResourceId>>,
  pending: FxHashMap<ElementId, InvalidationSeverity>,
}

impl InvalidationRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers `element` as a client of `resource`
  pub fn add_client(&mut self, resource: ResourceId, element: ElementId) {
    self.clients.entry(resource).or_default().insert(element);
    self.references.entry(element).or_default().insert(resource);
  }

  /// Unregisters `element` from `resource`
  ///
  /// Removing the last client does not destroy the resource; lifetime is
  /// owned by the declaring scene-graph node.
  pub fn remove_client(&mut self, resource: ResourceId, element: ElementId) {
    if let Some(set) = self.clients.get_mut(&resource) {
      set.remove(&element);
      if set.is_empty() {
        self.clients.remove(&resource);
      }
    }
    if let Some(set) = self.references.get_mut(&element) {
      set.remove(&resource);
      if set.is_empty() {
        self.references.remove(&element);
      }
    }
  }

  /// Replaces the full set of resources `element` references
  ///
  /// This is the transactional path used when a style change rewrites an
  /// element's references: stale memberships are dropped and new ones added
  /// in one step, preserving the registry invariant.
  pub fn set_references(&mut self, element: ElementId, resources: &[ResourceId]) {
    let new_set: FxHashSet<ResourceId> = resources.iter().copied().collect();
    let old_set = self.references.get(&element).cloned().unwrap_or_default();

    for stale in old_set.difference(&new_set) {
      if let Some(set) = self.clients.get_mut(stale) {
        set.remove(&element);
        if set.is_empty() {
          self.clients.remove(stale);
        }
      }
    }
    for added in new_set.difference(&old_set) {
      self.clients.entry(*added).or_default().insert(element);
    }

    if new_set.is_empty() {
      self.references.remove(&element);
    } else {
      self.references.insert(element, new_set);
    }
  }

  /// Drops an element from every resource's client set
  ///
  /// Called when the element leaves the scene graph.
  pub fn detach_client(&mut self, element: ElementId) {
    self.set_references(element, &[]);
    self.pending.remove(&element);
  }

  /// Queues an invalidation for every client of `resource`
  pub fn invalidate_all_clients(&mut self, resource: ResourceId, severity: InvalidationSeverity) {
    let Some(clients) = self.clients.get(&resource) else {
      return;
    };
    trace!(?resource, ?severity, count = clients.len(), "invalidating clients");
    for element in clients {
      let entry = self.pending.entry(*element).or_insert(severity);
      if severity > *entry {
        *entry = severity;
      }
    }
  }

  /// Queues an invalidation for a single client of `resource`
  ///
  /// No-op when the element is not actually a client.
  pub fn invalidate_client(
    &mut self,
    resource: ResourceId,
    element: ElementId,
    severity: InvalidationSeverity,
  ) {
    let is_client = self
      .clients
      .get(&resource)
      .is_some_and(|set| set.contains(&element));
    if !is_client {
      return;
    }
    let entry = self.pending.entry(element).or_insert(severity);
    if severity > *entry {
      *entry = severity;
    }
  }

  /// Takes the queued invalidations, coalesced per client
  ///
  /// The host drains this at a phase boundary and decides whether each entry
  /// needs a repaint or a full layout pass.
  pub fn drain_pending(&mut self) -> Vec<(ElementId, InvalidationSeverity)> {
    let mut drained: Vec<_> = self.pending.drain().collect();
    drained.sort_by_key(|(element, _)| *element);
    drained
  }

  /// The clients currently registered for `resource`
  pub fn clients_of(&self, resource: ResourceId) -> impl Iterator<Item = ElementId> + '_ {
    self
      .clients
      .get(&resource)
      .into_iter()
      .flat_map(|set| set.iter().copied())
  }

  /// The resources `element` currently references
  pub fn references_of(&self, element: ElementId) -> impl Iterator<Item = ResourceId> + '_ {
    self
      .references
      .get(&element)
      .into_iter()
      .flat_map(|set| set.iter().copied())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const R1: ResourceId = ResourceId(1);
  const R2: ResourceId = ResourceId(2);
  const E1: ElementId = ElementId(10);
  const E2: ElementId = ElementId(20);

  #[test]
  fn add_and_remove_maintain_both_directions() {
    let mut registry = InvalidationRegistry::new();
    registry.add_client(R1, E1);
    assert_eq!(registry.clients_of(R1).collect::<Vec<_>>(), vec![E1]);
    assert_eq!(registry.references_of(E1).collect::<Vec<_>>(), vec![R1]);

    registry.remove_client(R1, E1);
    assert_eq!(registry.clients_of(R1).count(), 0);
    assert_eq!(registry.references_of(E1).count(), 0);
  }

  #[test]
  fn set_references_is_transactional() {
    let mut registry = InvalidationRegistry::new();
    registry.set_references(E1, &[R1]);
    registry.set_references(E1, &[R2]);

    assert_eq!(registry.clients_of(R1).count(), 0);
    assert_eq!(registry.clients_of(R2).collect::<Vec<_>>(), vec![E1]);
  }

  #[test]
  fn broadcast_reaches_all_clients() {
    let mut registry = InvalidationRegistry::new();
    registry.add_client(R1, E1);
    registry.add_client(R1, E2);
    registry.invalidate_all_clients(R1, InvalidationSeverity::Boundaries);

    let pending = registry.drain_pending();
    assert_eq!(pending.len(), 2);
    assert!(pending
      .iter()
      .all(|(_, severity)| *severity == InvalidationSeverity::Boundaries));
    // Drained means drained.
    assert!(registry.drain_pending().is_empty());
  }

  #[test]
  fn pending_severity_coalesces_to_maximum() {
    let mut registry = InvalidationRegistry::new();
    registry.add_client(R1, E1);
    registry.invalidate_client(R1, E1, InvalidationSeverity::LayoutAndBoundaries);
    registry.invalidate_client(R1, E1, InvalidationSeverity::ParentOnly);

    let pending = registry.drain_pending();
    assert_eq!(
      pending,
      vec![(E1, InvalidationSeverity::LayoutAndBoundaries)]
    );
  }

  #[test]
  fn invalidate_client_ignores_non_clients() {
    let mut registry = InvalidationRegistry::new();
    registry.add_client(R1, E1);
    registry.invalidate_client(R1, E2, InvalidationSeverity::Boundaries);
    assert!(registry.drain_pending().is_empty());
  }

  #[test]
  fn detach_client_clears_memberships_and_pending() {
    let mut registry = InvalidationRegistry::new();
    registry.add_client(R1, E1);
    registry.add_client(R2, E1);
    registry.invalidate_all_clients(R1, InvalidationSeverity::Boundaries);
    registry.detach_client(E1);

    assert_eq!(registry.clients_of(R1).count(), 0);
    assert_eq!(registry.clients_of(R2).count(), 0);
    assert!(registry.drain_pending().is_empty());
  }
}
