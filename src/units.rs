//! Coordinate resolver
//!
//! Effect resources declare their geometry in one of two unit spaces: plain
//! user units (`userSpaceOnUse`) or fractions of the target's object bounding
//! box (`objectBoundingBox`). On top of that, individual length values can be
//! percentages of the ambient viewport or font-relative. This module turns
//! those declared values into user-unit scalars and rectangles.
//!
//! Percentage resolution requires a known viewport; font-relative units
//! require resolvable font metrics. Both absences are reported as distinct
//! [`ResolveError`] variants rather than silently substituting zero, so the
//! caller decides whether to supply a fallback or skip the effect.

use crate::error::ResolveError;
use crate::geometry::{Point, Rect, Size};

/// CSS pixels per inch, used for absolute unit conversion
const PIXELS_PER_INCH: f32 = 96.0;

const SQRT_2: f32 = std::f32::consts::SQRT_2;

/// How a resource's content coordinates are interpreted
///
/// Immutable per resource instance; read from the resource's declared
/// attributes. The declared unit type is the single source of truth — the
/// two modes are never interchanged silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitSpace {
  /// Values are plain user-unit lengths, resolved against the viewport
  #[default]
  UserSpaceOnUse,
  /// Values are fractions 0..1 of the target's object bounding box
  ObjectBoundingBox,
}

/// Which viewport dimension a length resolves against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthMode {
  Width,
  Height,
  /// Diagonal-relative lengths (e.g. a circle radius): percentages resolve
  /// against `diagonal / sqrt(2)`
  Other,
}

/// A parsed length value
///
/// `Number` is a unitless value: a user-unit length in
/// [`UnitSpace::UserSpaceOnUse`], a bounding-box fraction in
/// [`UnitSpace::ObjectBoundingBox`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LengthValue {
  Number(f32),
  Px(f32),
  Percent(f32),
  Ems(f32),
  Exs(f32),
  Cm(f32),
  Mm(f32),
  In(f32),
  Pt(f32),
  Pc(f32),
}

/// Font metrics needed for em/ex resolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontMetrics {
  /// Computed font size in user units
  pub font_size: f32,
  /// x-height in user units
  pub x_height: f32,
}

/// Ambient context for length resolution
///
/// Carries the viewport a percentage resolves against and, optionally, the
/// computed font metrics for em/ex units.
///
/// # Examples
///
/// ```
/// use layerfx::units::{LengthContext, LengthMode, LengthValue};
/// use layerfx::Size;
///
/// let ctx = LengthContext::new(Size::new(200.0, 100.0));
/// let w = ctx.resolve(LengthValue::Percent(50.0), LengthMode::Width).unwrap();
/// assert_eq!(w, 100.0);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthContext {
  viewport: Option<Size>,
  font: Option<FontMetrics>,
}

impl LengthContext {
  /// Context with a known viewport and no font metrics
  pub fn new(viewport: Size) -> Self {
    Self {
      viewport: Some(viewport),
      font: None,
    }
  }

  /// Context with no viewport
  ///
  /// Percentage resolution against this context fails with
  /// [`ResolveError::UnresolvedViewport`].
  pub fn without_viewport() -> Self {
    Self::default()
  }

  /// Attaches font metrics for em/ex resolution
  pub fn with_font(mut self, font: FontMetrics) -> Self {
    self.font = Some(font);
    self
  }

  /// The viewport size, if one is known
  pub fn viewport(&self) -> Option<Size> {
    self.viewport
  }

  /// Resolves a length value to user units
  pub fn resolve(&self, value: LengthValue, mode: LengthMode) -> Result<f32, ResolveError> {
    match value {
      LengthValue::Number(v) | LengthValue::Px(v) => Ok(v),
      LengthValue::Percent(p) => self.percentage_to_user_units(p / 100.0, mode),
      LengthValue::Ems(v) => Ok(v * self.font_size()?),
      LengthValue::Exs(v) => Ok(v * self.x_height()?),
      LengthValue::Cm(v) => Ok(v * PIXELS_PER_INCH / 2.54),
      LengthValue::Mm(v) => Ok(v * PIXELS_PER_INCH / 25.4),
      LengthValue::In(v) => Ok(v * PIXELS_PER_INCH),
      LengthValue::Pt(v) => Ok(v * PIXELS_PER_INCH / 72.0),
      LengthValue::Pc(v) => Ok(v * PIXELS_PER_INCH / 6.0),
    }
  }

  /// Converts a user-unit value back into a percentage of the viewport
  pub fn user_units_to_percentage(&self, value: f32, mode: LengthMode) -> Result<f32, ResolveError> {
    let reference = self.reference_dimension(mode)?;
    if reference == 0.0 {
      return Err(ResolveError::ZeroReference { unit: "%" });
    }
    Ok(value / reference * 100.0)
  }

  /// Converts a user-unit value into em units
  pub fn user_units_to_ems(&self, value: f32) -> Result<f32, ResolveError> {
    let font_size = self.font_size()?;
    if font_size == 0.0 {
      return Err(ResolveError::ZeroReference { unit: "em" });
    }
    Ok(value / font_size)
  }

  /// Converts a user-unit value into ex units
  pub fn user_units_to_exs(&self, value: f32) -> Result<f32, ResolveError> {
    let x_height = self.x_height()?;
    if x_height == 0.0 {
      return Err(ResolveError::ZeroReference { unit: "ex" });
    }
    Ok(value / x_height)
  }

  fn percentage_to_user_units(&self, fraction: f32, mode: LengthMode) -> Result<f32, ResolveError> {
    Ok(fraction * self.reference_dimension(mode)?)
  }

  fn reference_dimension(&self, mode: LengthMode) -> Result<f32, ResolveError> {
    let viewport = self.viewport.ok_or(ResolveError::UnresolvedViewport)?;
    Ok(match mode {
      LengthMode::Width => viewport.width,
      LengthMode::Height => viewport.height,
      LengthMode::Other => viewport.diagonal_length() / SQRT_2,
    })
  }

  fn font_size(&self) -> Result<f32, ResolveError> {
    self
      .font
      .map(|f| f.font_size)
      .ok_or(ResolveError::MissingFontMetrics { unit: "em" })
  }

  fn x_height(&self) -> Result<f32, ResolveError> {
    self
      .font
      .map(|f| f.x_height)
      .ok_or(ResolveError::MissingFontMetrics { unit: "ex" })
  }
}

/// Resolves a length as a fraction of a reference dimension
///
/// In bounding-box space every value is fractional: a plain number or a
/// percentage both scale the reference dimension.
fn resolve_fraction(value: LengthValue, reference: f32) -> f32 {
  match value {
    LengthValue::Percent(p) => p / 100.0 * reference,
    LengthValue::Number(v) | LengthValue::Px(v) => v * reference,
    // Font-relative and absolute units have no defined meaning as a
    // bounding-box fraction; treat the raw value as the fraction.
    LengthValue::Ems(v)
    | LengthValue::Exs(v)
    | LengthValue::Cm(v)
    | LengthValue::Mm(v)
    | LengthValue::In(v)
    | LengthValue::Pt(v)
    | LengthValue::Pc(v) => v * reference,
  }
}

/// Resolves a declared rectangle into user units
///
/// [`UnitSpace::UserSpaceOnUse`]: each of x/y/width/height resolves
/// independently against the ambient viewport context.
///
/// [`UnitSpace::ObjectBoundingBox`]: each value resolves as a fraction of the
/// target's bounding box and the result is translated into the target's
/// coordinate frame.
///
/// # Examples
///
/// ```
/// use layerfx::units::{resolve_rectangle, LengthContext, LengthValue, UnitSpace};
/// use layerfx::Rect;
///
/// let bbox = Rect::from_xywh(50.0, 50.0, 200.0, 100.0);
/// let rect = resolve_rectangle(
///   UnitSpace::ObjectBoundingBox,
///   &LengthContext::without_viewport(),
///   bbox,
///   LengthValue::Number(-0.1),
///   LengthValue::Number(-0.1),
///   LengthValue::Number(1.2),
///   LengthValue::Number(1.2),
/// )
/// .unwrap();
/// assert_eq!(rect, Rect::from_xywh(30.0, 40.0, 240.0, 120.0));
/// ```
pub fn resolve_rectangle(
  space: UnitSpace,
  ambient: &LengthContext,
  target_bounding_box: Rect,
  x: LengthValue,
  y: LengthValue,
  width: LengthValue,
  height: LengthValue,
) -> Result<Rect, ResolveError> {
  match space {
    UnitSpace::UserSpaceOnUse => Ok(Rect::from_xywh(
      ambient.resolve(x, LengthMode::Width)?,
      ambient.resolve(y, LengthMode::Height)?,
      ambient.resolve(width, LengthMode::Width)?,
      ambient.resolve(height, LengthMode::Height)?,
    )),
    UnitSpace::ObjectBoundingBox => {
      let bbox = target_bounding_box;
      Ok(Rect::from_xywh(
        bbox.x() + resolve_fraction(x, bbox.width()),
        bbox.y() + resolve_fraction(y, bbox.height()),
        resolve_fraction(width, bbox.width()),
        resolve_fraction(height, bbox.height()),
      ))
    }
  }
}

/// Resolves a declared point
///
/// In bounding-box space the result is the bare fractional point; callers map
/// it into the target frame with the content transform.
pub fn resolve_point(
  space: UnitSpace,
  ambient: &LengthContext,
  x: LengthValue,
  y: LengthValue,
) -> Result<Point, ResolveError> {
  match space {
    UnitSpace::UserSpaceOnUse => Ok(Point::new(
      ambient.resolve(x, LengthMode::Width)?,
      ambient.resolve(y, LengthMode::Height)?,
    )),
    UnitSpace::ObjectBoundingBox => Ok(Point::new(
      resolve_fraction(x, 1.0),
      resolve_fraction(y, 1.0),
    )),
  }
}

/// Resolves a declared scalar length
pub fn resolve_length(
  space: UnitSpace,
  ambient: &LengthContext,
  value: LengthValue,
) -> Result<f32, ResolveError> {
  match space {
    UnitSpace::UserSpaceOnUse => ambient.resolve(value, LengthMode::Other),
    UnitSpace::ObjectBoundingBox => Ok(resolve_fraction(value, 1.0)),
  }
}

/// The transform from bounding-box fraction space into the target's frame
///
/// Translate by the box origin, scale by its size. Mask and clip content in
/// [`UnitSpace::ObjectBoundingBox`] space is drawn through this transform.
pub fn content_transform(space: UnitSpace, bounding_box: Rect) -> tiny_skia::Transform {
  match space {
    UnitSpace::UserSpaceOnUse => tiny_skia::Transform::identity(),
    UnitSpace::ObjectBoundingBox => tiny_skia::Transform::from_translate(
      bounding_box.x(),
      bounding_box.y(),
    )
    .pre_scale(bounding_box.width(), bounding_box.height()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn percentage_without_viewport_fails() {
    let ctx = LengthContext::without_viewport();
    assert_eq!(
      ctx.resolve(LengthValue::Percent(50.0), LengthMode::Width),
      Err(ResolveError::UnresolvedViewport)
    );
  }

  #[test]
  fn em_without_font_metrics_is_distinct_from_zero() {
    let ctx = LengthContext::new(Size::new(100.0, 100.0));
    assert_eq!(
      ctx.resolve(LengthValue::Ems(2.0), LengthMode::Width),
      Err(ResolveError::MissingFontMetrics { unit: "em" })
    );
    // A legitimately-zero em value still needs metrics to prove it.
    let ctx = ctx.with_font(FontMetrics {
      font_size: 16.0,
      x_height: 8.0,
    });
    assert_eq!(ctx.resolve(LengthValue::Ems(0.0), LengthMode::Width), Ok(0.0));
    assert_eq!(ctx.resolve(LengthValue::Exs(2.0), LengthMode::Width), Ok(16.0));
  }

  #[test]
  fn diagonal_mode_uses_normalized_diagonal() {
    let ctx = LengthContext::new(Size::new(300.0, 400.0));
    // diagonal = 500, reference = 500 / sqrt(2)
    let resolved = ctx
      .resolve(LengthValue::Percent(100.0), LengthMode::Other)
      .unwrap();
    assert!((resolved - 500.0 / SQRT_2).abs() < 1e-3);
  }

  #[test]
  fn absolute_units_convert_at_96dpi() {
    let ctx = LengthContext::without_viewport();
    assert_eq!(ctx.resolve(LengthValue::In(1.0), LengthMode::Width), Ok(96.0));
    assert_eq!(ctx.resolve(LengthValue::Pt(72.0), LengthMode::Width), Ok(96.0));
    assert_eq!(ctx.resolve(LengthValue::Pc(6.0), LengthMode::Width), Ok(96.0));
  }

  #[test]
  fn bounding_box_rect_resolution_translates_and_scales() {
    let bbox = Rect::from_xywh(10.0, 20.0, 100.0, 50.0);
    let rect = resolve_rectangle(
      UnitSpace::ObjectBoundingBox,
      &LengthContext::without_viewport(),
      bbox,
      LengthValue::Number(0.25),
      LengthValue::Percent(50.0),
      LengthValue::Number(0.5),
      LengthValue::Number(0.5),
    )
    .unwrap();
    assert_eq!(rect, Rect::from_xywh(35.0, 45.0, 50.0, 25.0));
  }

  #[test]
  fn user_space_rect_resolution_uses_viewport() {
    let ctx = LengthContext::new(Size::new(400.0, 200.0));
    let rect = resolve_rectangle(
      UnitSpace::UserSpaceOnUse,
      &ctx,
      Rect::ZERO,
      LengthValue::Percent(10.0),
      LengthValue::Percent(10.0),
      LengthValue::Percent(50.0),
      LengthValue::Percent(50.0),
    )
    .unwrap();
    assert_eq!(rect, Rect::from_xywh(40.0, 20.0, 200.0, 100.0));
  }

  #[test]
  fn fraction_round_trip_through_bounding_box() {
    // Resolving a fraction against box B, then mapping back through B's
    // inverse, reproduces the fraction.
    let bbox = Rect::from_xywh(50.0, 50.0, 200.0, 100.0);
    let fraction = (0.3_f32, 0.7_f32);
    let rect = resolve_rectangle(
      UnitSpace::ObjectBoundingBox,
      &LengthContext::without_viewport(),
      bbox,
      LengthValue::Number(fraction.0),
      LengthValue::Number(fraction.1),
      LengthValue::Number(0.1),
      LengthValue::Number(0.1),
    )
    .unwrap();
    let back_x = (rect.x() - bbox.x()) / bbox.width();
    let back_y = (rect.y() - bbox.y()) / bbox.height();
    assert!((back_x - fraction.0).abs() < 1e-6);
    assert!((back_y - fraction.1).abs() < 1e-6);
  }

  #[test]
  fn inverse_conversions_round_trip() {
    let ctx = LengthContext::new(Size::new(200.0, 100.0)).with_font(FontMetrics {
      font_size: 16.0,
      x_height: 8.0,
    });
    let user = ctx.resolve(LengthValue::Percent(25.0), LengthMode::Width).unwrap();
    assert_eq!(ctx.user_units_to_percentage(user, LengthMode::Width), Ok(25.0));

    let user = ctx.resolve(LengthValue::Ems(1.5), LengthMode::Width).unwrap();
    assert_eq!(ctx.user_units_to_ems(user), Ok(1.5));
    let user = ctx.resolve(LengthValue::Exs(3.0), LengthMode::Width).unwrap();
    assert_eq!(ctx.user_units_to_exs(user), Ok(3.0));
  }

  #[test]
  fn content_transform_for_bounding_box_space() {
    let bbox = Rect::from_xywh(50.0, 50.0, 200.0, 100.0);
    let t = content_transform(UnitSpace::ObjectBoundingBox, bbox);
    let mut p = tiny_skia::Point::from_xy(1.0, 1.0);
    t.map_point(&mut p);
    assert_eq!((p.x, p.y), (250.0, 150.0));
    assert_eq!(t.tx, 50.0);
    assert_eq!(t.ty, 50.0);
  }
}
