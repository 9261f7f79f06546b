//! Narrow interfaces to the scene-graph collaborator
//!
//! The pipeline does not own layout, style resolution or the element tree.
//! Everything it needs from them arrives through the types in this module:
//! resolved geometry for a target element, style-declared effect flags, and
//! a single callback through which resource content is rasterized.

use crate::canvas::Canvas;
use crate::geometry::{Point, Rect};
use crate::resource::ElementId;
use tiny_skia::Transform;

/// Resolved geometry for a target element, produced by layout
///
/// All rectangles are in user units; `transform` maps the element's local
/// space to its nearest backing-store boundary.
#[derive(Debug, Clone, Copy)]
pub struct TargetGeometry {
  /// Bounding rectangle of the element's own rendered content, independent
  /// of stroke and filter effects
  pub object_bounding_box: Rect,
  /// Bounding rectangle including stroke
  pub stroke_bounding_box: Rect,
  /// Rectangle the element repaints, including effect outsets
  pub repaint_bounding_box: Rect,
  /// Current transform relative to the nearest backing-store boundary
  pub transform: Transform,
}

impl TargetGeometry {
  /// Geometry where every rectangle equals `bounds` and the transform is
  /// identity; convenient for tests and simple hosts
  pub fn from_bounds(bounds: Rect) -> Self {
    Self {
      object_bounding_box: bounds,
      stroke_bounding_box: bounds,
      repaint_bounding_box: bounds,
      transform: Transform::identity(),
    }
  }
}

/// Paint behavior threaded through content rendering calls
///
/// Replaces any process-wide "currently clipping/masking" flag: the mode is
/// a value passed down the call chain, so reentrancy is explicit at each
/// call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaintMode {
  /// Ordinary painting
  #[default]
  Normal,
  /// Constrained rendering of clip or mask content:
  /// - fill-opacity/stroke-opacity/opacity forced to 1
  /// - nested filters and masks suppressed
  /// - fill forced to solid black, stroke forced to none
  ClipOrMaskContent,
}

/// Color space used for effect math and mask compositing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorInterpolation {
  /// Standard sRGB
  #[default]
  Srgb,
  /// Linearized sRGB
  LinearRgb,
}

/// How a mask buffer is interpreted when compositing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskKind {
  /// Mask coverage is the luminance of the rendered content
  #[default]
  Luminance,
  /// Mask coverage is the alpha channel of the rendered content
  Alpha,
}

/// Fill rule for clip path geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipRule {
  #[default]
  NonZero,
  EvenOdd,
}

impl ClipRule {
  pub(crate) fn to_skia(self) -> tiny_skia::FillRule {
    match self {
      ClipRule::NonZero => tiny_skia::FillRule::Winding,
      ClipRule::EvenOdd => tiny_skia::FillRule::EvenOdd,
    }
  }
}

/// Rasterization callback into the host scene graph
///
/// The pipeline asks the host to draw an element's subtree — layer content
/// for filter capture, clip-path children for mask fallback, mask content —
/// into a [`Canvas`] it controls. The host must honor [`PaintMode`] and must
/// not re-enter the pipeline for suppressed effects.
pub trait ContentSource {
  /// Draws the subtree rooted at `element` into `canvas`
  ///
  /// The canvas already carries the content transform; implementations draw
  /// in the element's local coordinates.
  fn paint_content(&mut self, element: ElementId, canvas: &mut Canvas, mode: PaintMode);

  /// Hit-tests the subtree rooted at `element` against a point in the
  /// element's local coordinates
  fn hit_test_content(&mut self, element: ElementId, point: Point) -> bool {
    let _ = (element, point);
    false
  }
}
