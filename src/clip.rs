//! Clip-path resource
//!
//! A `clip-path` reference clips a target to the geometry of the resource's
//! content. Two strategies exist: direct path clipping, which intersects the
//! destination's clip with a single shape's path, and mask-fallback
//! clipping, which rasterizes the clip content offscreen and composites it
//! with destination-in. Path clipping is only equivalent to the rendered
//! clip when the content is exactly one visible, un-clipped shape — fill
//! rules make multiple shapes additive in ways a single path union is not,
//! and text geometry is not available as a path at all.

use crate::canvas::Canvas;
use crate::geometry::{Point, Rect};
use crate::resource::{CycleGuard, ElementId, ResourceId, ResourceStore};
use crate::scene::{ClipRule, ContentSource, PaintMode, TargetGeometry};
use crate::units::{content_transform, UnitSpace};
use tiny_skia::{BlendMode, Transform};
use tracing::trace;

/// What kind of renderer backs a clip-path child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
  /// A shape or path element with retrievable geometry
  Shape,
  /// Text content; never eligible for path clipping
  Text,
  /// A container or other non-geometry element
  Other,
}

/// One child of a clip-path resource, as the scene graph describes it
#[derive(Debug, Clone)]
pub struct ClipShape {
  pub element: ElementId,
  pub kind: ShapeKind,
  /// Display/visibility-resolved visibility
  pub visible: bool,
  /// Whether the child carries its own clip-path
  pub clipped: bool,
  /// The child's geometric path in clip-content units
  pub path: Option<tiny_skia::Path>,
  pub clip_rule: ClipRule,
  /// The child's own transform within the clip content
  pub transform: Transform,
}

impl ClipShape {
  pub fn shape(element: ElementId, path: Option<tiny_skia::Path>) -> Self {
    Self {
      element,
      kind: ShapeKind::Shape,
      visible: true,
      clipped: false,
      path,
      clip_rule: ClipRule::NonZero,
      transform: Transform::identity(),
    }
  }
}

/// The strategy chosen for a clip application
#[derive(Debug)]
pub enum ClipStrategy<'a> {
  /// Clip the destination directly to this shape's path
  Path(&'a ClipShape),
  /// Rasterize the clip content and composite with destination-in
  Mask,
}

/// A clip-path resource: declared units plus its content description
#[derive(Debug)]
pub struct ClipResource {
  pub element: ElementId,
  /// Interpretation of the content's coordinates
  pub units: UnitSpace,
  /// The resource element's own transform
  pub transform: Transform,
  /// The clip-path applied to the resource itself, if any
  pub self_clip: Option<ResourceId>,
  pub children: Vec<ClipShape>,
  /// Stroke bounding box of the content, in content units
  pub stroke_bounding_box: Rect,
}

impl ClipResource {
  pub fn new(element: ElementId, units: UnitSpace, children: Vec<ClipShape>) -> Self {
    Self {
      element,
      units,
      transform: Transform::identity(),
      self_clip: None,
      children,
      stroke_bounding_box: Rect::ZERO,
    }
  }

  // ==========================================================================
  // Strategy selection
  // ==========================================================================

  /// Chooses between direct path clipping and mask fallback
  ///
  /// Path clipping applies only when the content is exactly one visible
  /// shape with no clip of its own, and the resource itself is not
  /// clipped. Invisible shapes don't affect clipping and are ignored;
  /// more than one visible shape falls back because the fill-rule
  /// interaction between shapes is not equivalent to an additive path.
  pub fn select_strategy(&self) -> ClipStrategy<'_> {
    // A clip-path that gets clipped itself always renders via mask.
    if self.self_clip.is_some() {
      return ClipStrategy::Mask;
    }

    let mut candidate: Option<&ClipShape> = None;
    for child in &self.children {
      // Only shapes and paths are supported for direct clipping; texts
      // force the mask fallback.
      if child.kind == ShapeKind::Text {
        return ClipStrategy::Mask;
      }
      if child.kind != ShapeKind::Shape {
        continue;
      }
      if !child.visible {
        continue;
      }
      // A shape that is clipped itself cannot be expressed as one path.
      if child.clipped {
        return ClipStrategy::Mask;
      }
      if candidate.is_some() {
        return ClipStrategy::Mask;
      }
      candidate = Some(child);
    }

    match candidate {
      Some(shape) => ClipStrategy::Path(shape),
      None => ClipStrategy::Mask,
    }
  }

  // ==========================================================================
  // Application
  // ==========================================================================

  /// Clips the destination directly to a shape's path
  ///
  /// The path is taken in a space composed from the clip unit transform
  /// (bounding-box units translate and scale by the target's box), the
  /// resource's own transform and the shape's transform. A clip-path that
  /// is present but yields no geometry clips everything away.
  pub fn apply_path_clip(
    &self,
    canvas: &mut Canvas,
    target_bounding_box: Rect,
    shape: &ClipShape,
  ) {
    let mut clip_transform = content_transform(self.units, target_bounding_box);
    clip_transform = clip_transform.pre_concat(self.transform);
    clip_transform = clip_transform.pre_concat(shape.transform);

    match &shape.path {
      Some(path) => {
        let saved = canvas.transform();
        canvas.concat_transform(clip_transform);
        canvas.clip_path(path, shape.clip_rule);
        canvas.set_transform(saved);
      }
      None => {
        // Present but empty clips everything, rather than being ignored.
        canvas.clip_everything();
      }
    }
  }

  /// Applies the clip by rendering its content and masking with
  /// destination-in
  ///
  /// Content is rendered with [`PaintMode::ClipOrMaskContent`] constraints.
  /// When the resource itself is clipped, that clip applies recursively
  /// first; a reference cycle makes the nested clip behave as absent.
  /// `target_has_composited_mask` skips the transparency layer when the
  /// target already composites through a mask layer of its own.
  pub fn apply_mask_clip(
    &self,
    store: &ResourceStore,
    source: &mut dyn ContentSource,
    guard: &CycleGuard,
    canvas: &mut Canvas,
    target: &TargetGeometry,
    target_has_composited_mask: bool,
  ) {
    let Ok(_scope) = guard.enter(self.element) else {
      trace!(element = ?self.element, "clip mask skipped: reference cycle");
      return;
    };

    canvas.save();

    if let Some(nested_id) = self.self_clip {
      if let Some(nested) = store.clip(nested_id) {
        nested.apply_mask_clip(store, source, guard, canvas, target, target_has_composited_mask);
      }
    }

    let push_layer = !target_has_composited_mask;
    if push_layer {
      // Destination-in at layer composite time keys the destination's
      // survival on the rendered clip coverage.
      if canvas.push_layer(1.0, Some(BlendMode::DestinationIn)).is_err() {
        canvas.restore();
        return;
      }
    }

    canvas.concat_transform(content_transform(self.units, target.object_bounding_box));
    canvas.concat_transform(self.transform);
    source.paint_content(self.element, canvas, PaintMode::ClipOrMaskContent);

    if push_layer {
      canvas.pop_layer();
    }
    canvas.restore();
  }

  // ==========================================================================
  // Hit testing
  // ==========================================================================

  /// Whether a point in the target's user space falls inside the clip
  /// content
  ///
  /// Re-entrant resolution fails safe: a clip whose content transitively
  /// references the element currently being hit-tested reports "not hit"
  /// instead of recursing.
  pub fn hit_test(
    &self,
    source: &mut dyn ContentSource,
    guard: &CycleGuard,
    target_bounding_box: Rect,
    point: Point,
  ) -> bool {
    if guard.is_visiting(self.element) {
      return false;
    }
    let Ok(_scope) = guard.enter(self.element) else {
      return false;
    };

    let local = match self.units {
      UnitSpace::UserSpaceOnUse => point,
      UnitSpace::ObjectBoundingBox => {
        let transform = content_transform(self.units, target_bounding_box);
        let Some(inverse) = transform.invert() else {
          return false;
        };
        let mut p = tiny_skia::Point::from_xy(point.x, point.y);
        inverse.map_point(&mut p);
        Point::new(p.x, p.y)
      }
    };

    source.hit_test_content(self.element, local)
  }

  // ==========================================================================
  // Geometry
  // ==========================================================================

  /// The rectangle this clip restricts the target to
  pub fn resource_bounding_box(&self, target: &TargetGeometry) -> Rect {
    let mut clip_rect = self.stroke_bounding_box;
    clip_rect = clip_rect.map(self.transform);
    if self.units == UnitSpace::ObjectBoundingBox {
      clip_rect = clip_rect.map(content_transform(
        self.units,
        target.object_bounding_box,
      ));
    }
    clip_rect
  }
}
