//! Cycle guard for re-entrant resource resolution
//!
//! Clip-paths can reference shapes that carry their own clip-paths, masks
//! can nest masks, and filters can reference rendered content. Any operation
//! that dereferences another element during resolution enters that element
//! into the guard first; re-entry means the reference chain has looped back
//! on itself and the resolution must fail instead of recursing.
//!
//! The guard is owned by one paint traversal and threaded through the calls
//! that need it — there is no process-wide set, so a host that paints on
//! several threads gets one guard per traversal for free. Entries are
//! released by [`CycleScope`]'s `Drop` on every exit path, including early
//! returns on error.

use super::ElementId;
use crate::error::EffectError;
use rustc_hash::FxHashSet;
use std::cell::RefCell;

/// Scoped set of elements currently being resolved
///
/// # Examples
///
/// ```
/// use layerfx::resource::{CycleGuard, ElementId};
///
/// let guard = CycleGuard::new();
/// let scope = guard.enter(ElementId(1)).unwrap();
/// assert!(guard.enter(ElementId(1)).is_err());
/// drop(scope);
/// assert!(guard.enter(ElementId(1)).is_ok());
/// ```
#[derive(Debug, Default)]
pub struct CycleGuard {
  visiting: RefCell<FxHashSet<ElementId>>,
}

impl CycleGuard {
  pub fn new() -> Self {
    Self::default()
  }

  /// Marks `element` as being resolved for the lifetime of the returned
  /// scope
  ///
  /// Fails with [`EffectError::CycleDetected`] if the element is already
  /// being resolved higher up the call chain.
  pub fn enter(&self, element: ElementId) -> Result<CycleScope<'_>, EffectError> {
    let inserted = self.visiting.borrow_mut().insert(element);
    if !inserted {
      return Err(EffectError::CycleDetected { element });
    }
    Ok(CycleScope {
      guard: self,
      element,
    })
  }

  /// Whether `element` is currently being resolved
  pub fn is_visiting(&self, element: ElementId) -> bool {
    self.visiting.borrow().contains(&element)
  }

  /// True when no resolution is in flight
  pub fn is_empty(&self) -> bool {
    self.visiting.borrow().is_empty()
  }
}

/// Membership in a [`CycleGuard`] for the duration of one resolution call
///
/// Releases the entry on drop, so the element is removed on every exit
/// path — normal completion, `?` propagation, or panic unwinding.
#[derive(Debug)]
pub struct CycleScope<'a> {
  guard: &'a CycleGuard,
  element: ElementId,
}

impl Drop for CycleScope<'_> {
  fn drop(&mut self) {
    let removed = self.guard.visiting.borrow_mut().remove(&self.element);
    debug_assert!(removed, "cycle scope dropped twice for {:?}", self.element);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const E1: ElementId = ElementId(1);
  const E2: ElementId = ElementId(2);

  #[test]
  fn reentry_is_detected() {
    let guard = CycleGuard::new();
    let _scope = guard.enter(E1).unwrap();
    assert_eq!(
      guard.enter(E1).unwrap_err(),
      EffectError::CycleDetected { element: E1 }
    );
    // A different element is unaffected.
    assert!(guard.enter(E2).is_ok());
  }

  #[test]
  fn exit_allows_reentry() {
    let guard = CycleGuard::new();
    let scope = guard.enter(E1).unwrap();
    drop(scope);
    assert!(guard.enter(E1).is_ok());
  }

  #[test]
  fn scope_releases_on_error_path() {
    let guard = CycleGuard::new();
    let failing: Result<(), EffectError> = (|| {
      let _scope = guard.enter(E1)?;
      Err(EffectError::DegenerateGeometry { what: "test" })
    })();
    assert!(failing.is_err());
    assert!(guard.is_empty());
  }

  #[test]
  fn nested_scopes_release_in_any_order() {
    let guard = CycleGuard::new();
    let a = guard.enter(E1).unwrap();
    let b = guard.enter(E2).unwrap();
    drop(a);
    assert!(guard.is_visiting(E2));
    assert!(!guard.is_visiting(E1));
    drop(b);
    assert!(guard.is_empty());
  }
}
