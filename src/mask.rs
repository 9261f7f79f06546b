//! Mask resource
//!
//! A mask renders its content into an offscreen buffer sized to the
//! target's repaint bounding box in absolute coordinates, optionally
//! converts the buffer to a luminance-only mask, and composites it with the
//! target through a destination-in transparency layer. The buffer is
//! created in absolute space so the mask image is never scaled by the
//! ambient transform; the actual masking happens in absolute space too,
//! with the ambient transform inverted around the draw.

use crate::canvas::Canvas;
use crate::geometry::{Point, Rect, Size};
use crate::resource::{CycleGuard, ElementId};
use crate::scene::{ColorInterpolation, ContentSource, MaskKind, PaintMode, TargetGeometry};
use crate::surface::{clamped_size, convert_to_luminance_mask, transform_color_space};
use crate::units::{content_transform, resolve_rectangle, LengthContext, LengthValue, UnitSpace};
use tiny_skia::{BlendMode, Transform};
use tracing::trace;

/// A mask resource: declared unit spaces, region and rendering flags
#[derive(Debug)]
pub struct MaskResource {
  pub element: ElementId,
  /// Interpretation of the mask content's coordinates
  pub content_units: UnitSpace,
  /// Interpretation of the mask region rectangle
  pub mask_units: UnitSpace,
  /// Declared mask region; the default covers -10%..110% of the target
  pub x: LengthValue,
  pub y: LengthValue,
  pub width: LengthValue,
  pub height: LengthValue,
  /// Luminance or alpha interpretation of the rendered content
  pub kind: MaskKind,
  /// Color space the masking math runs in
  pub color_interpolation: ColorInterpolation,
  /// The mask element's own transform
  pub transform: Transform,
  /// Stroke bounding box of the content, in content units
  pub stroke_bounding_box: Rect,
}

impl MaskResource {
  pub fn new(element: ElementId, content_units: UnitSpace, mask_units: UnitSpace) -> Self {
    Self {
      element,
      content_units,
      mask_units,
      x: LengthValue::Percent(-10.0),
      y: LengthValue::Percent(-10.0),
      width: LengthValue::Percent(120.0),
      height: LengthValue::Percent(120.0),
      kind: MaskKind::Luminance,
      color_interpolation: ColorInterpolation::Srgb,
      transform: Transform::identity(),
      stroke_bounding_box: Rect::ZERO,
    }
  }

  /// The transform from mask-content space into the target's drawing space
  pub fn content_transform_for(&self, target_bounding_box: Rect) -> Transform {
    content_transform(self.content_units, target_bounding_box).pre_concat(self.transform)
  }

  /// Renders the mask content and composites it with the target
  ///
  /// `paint_offset` is where the target's content was painted relative to
  /// its bounding box origin. Degenerate geometry or an unallocatable
  /// buffer skips the mask — the target keeps painting unmasked per the
  /// fallback rules. A reference cycle (masks nesting masks back to this
  /// element) makes the mask behave as absent.
  pub fn apply_mask(
    &self,
    canvas: &mut Canvas,
    target: &TargetGeometry,
    paint_offset: Point,
    source: &mut dyn ContentSource,
    guard: &CycleGuard,
  ) {
    let Ok(_scope) = guard.enter(self.element) else {
      trace!(element = ?self.element, "mask skipped: reference cycle");
      return;
    };

    let bbox = target.object_bounding_box;
    canvas.save();

    // Line the coordinate system origin up with the target's painted
    // position.
    let corner = Point::new(bbox.x().floor(), bbox.y().floor());
    let origin_translation = Point::new(paint_offset.x - corner.x, paint_offset.y - corner.y);
    if origin_translation != Point::ZERO {
      canvas.translate(origin_translation.x, origin_translation.y);
    }

    let repaint = target.repaint_bounding_box;
    let absolute_transform = canvas.transform();
    let absolute_rect = repaint.map(absolute_transform).enclosing_int_rect();
    if absolute_rect.is_empty() || !absolute_rect.is_finite() {
      trace!("mask skipped: degenerate repaint rect");
      canvas.restore();
      return;
    }

    let (buffer_size, clamp) =
      clamped_size(Size::new(absolute_rect.width(), absolute_rect.height()));
    let Ok(mut mask_canvas) = Canvas::new(
      buffer_size.width.ceil().max(1.0) as u32,
      buffer_size.height.ceil().max(1.0) as u32,
    ) else {
      canvas.restore();
      return;
    };

    // The buffer lives in (clamped) absolute space: scale by the clamp,
    // shift to the buffer origin, then the ambient transform, then the
    // declared content units.
    let buffer_transform = absolute_transform
      .post_translate(-absolute_rect.x(), -absolute_rect.y())
      .post_scale(clamp, clamp);
    mask_canvas.set_transform(buffer_transform);
    mask_canvas.concat_transform(self.content_transform_for(bbox));
    source.paint_content(self.element, &mut mask_canvas, PaintMode::ClipOrMaskContent);

    let mut mask_pixmap = mask_canvas.into_pixmap();

    // Masking math happens in the declared interpolation space, applied to
    // the intermediate buffer before compositing, independent of the final
    // draw color space.
    if self.color_interpolation == ColorInterpolation::LinearRgb {
      transform_color_space(
        &mut mask_pixmap,
        ColorInterpolation::Srgb,
        ColorInterpolation::LinearRgb,
      );
    }
    if self.kind == MaskKind::Luminance {
      convert_to_luminance_mask(&mut mask_pixmap);
    }

    if canvas.push_layer(1.0, Some(BlendMode::DestinationIn)).is_err() {
      canvas.restore();
      return;
    }

    // The mask image was created in absolute coordinates, so composite in
    // absolute coordinates as well: invert the ambient transform around
    // the draw.
    let inverse = absolute_transform.invert().unwrap_or(Transform::identity());
    canvas.concat_transform(inverse);
    if clamp != 1.0 {
      canvas.scale(1.0 / clamp, 1.0 / clamp);
    }
    canvas.draw_pixmap(
      Point::new(absolute_rect.x() * clamp, absolute_rect.y() * clamp),
      &mask_pixmap,
      1.0,
    );
    canvas.pop_layer();
    canvas.restore();
    trace!(element = ?self.element, "mask composited");
  }

  /// The rectangle this mask limits the target to: the content's bounds
  /// intersected with the declared mask region
  pub fn resource_bounding_box(&self, target: &TargetGeometry, ambient: &LengthContext) -> Rect {
    let bbox = target.object_bounding_box;
    let mut mask_rect = self.stroke_bounding_box.map(self.transform);
    if self.content_units == UnitSpace::ObjectBoundingBox {
      mask_rect = mask_rect.map(content_transform(self.content_units, bbox));
    }

    let boundaries = resolve_rectangle(
      self.mask_units,
      ambient,
      bbox,
      self.x,
      self.y,
      self.width,
      self.height,
    );
    match boundaries {
      Ok(region) => mask_rect.intersection_or_empty(region),
      Err(_) => mask_rect,
    }
  }
}
