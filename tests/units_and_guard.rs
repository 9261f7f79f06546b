//! Coordinate resolution and cycle-guard properties against the public API.

use layerfx::units::{resolve_rectangle, FontMetrics, LengthMode};
use layerfx::{
  CycleGuard, EffectError, ElementId, LengthContext, LengthValue, Rect, ResolveError, Size,
  UnitSpace,
};

#[test]
fn bounding_box_resolution_round_trips_fractions() {
  // Resolving fractions against box B, then mapping back through B's
  // inverse, reproduces the original fractions within float tolerance.
  let bbox = Rect::from_xywh(37.5, 12.25, 310.0, 140.5);
  let fractions = [(0.0, 0.0), (0.25, 0.75), (1.0, 1.0), (0.333, 0.667)];

  for (fx, fy) in fractions {
    let rect = resolve_rectangle(
      UnitSpace::ObjectBoundingBox,
      &LengthContext::without_viewport(),
      bbox,
      LengthValue::Number(fx),
      LengthValue::Number(fy),
      LengthValue::Number(0.5),
      LengthValue::Number(0.5),
    )
    .unwrap();

    let back_x = (rect.x() - bbox.x()) / bbox.width();
    let back_y = (rect.y() - bbox.y()) / bbox.height();
    assert!((back_x - fx).abs() < 1e-5, "x fraction {fx} came back as {back_x}");
    assert!((back_y - fy).abs() < 1e-5, "y fraction {fy} came back as {back_y}");
  }
}

#[test]
fn unit_spaces_are_never_interchanged() {
  // The same declared values resolve to different rectangles depending on
  // the declared unit space, and the unit space alone decides which.
  let ctx = LengthContext::new(Size::new(400.0, 200.0));
  let bbox = Rect::from_xywh(100.0, 100.0, 40.0, 20.0);

  let user = resolve_rectangle(
    UnitSpace::UserSpaceOnUse,
    &ctx,
    bbox,
    LengthValue::Percent(50.0),
    LengthValue::Percent(50.0),
    LengthValue::Percent(25.0),
    LengthValue::Percent(25.0),
  )
  .unwrap();
  assert_eq!(user, Rect::from_xywh(200.0, 100.0, 100.0, 50.0));

  let object = resolve_rectangle(
    UnitSpace::ObjectBoundingBox,
    &ctx,
    bbox,
    LengthValue::Percent(50.0),
    LengthValue::Percent(50.0),
    LengthValue::Percent(25.0),
    LengthValue::Percent(25.0),
  )
  .unwrap();
  assert_eq!(object, Rect::from_xywh(120.0, 110.0, 10.0, 5.0));
}

#[test]
fn missing_context_is_reported_not_defaulted() {
  let no_viewport = LengthContext::without_viewport();
  assert_eq!(
    no_viewport.resolve(LengthValue::Percent(10.0), LengthMode::Width),
    Err(ResolveError::UnresolvedViewport)
  );

  let no_font = LengthContext::new(Size::new(100.0, 100.0));
  assert!(matches!(
    no_font.resolve(LengthValue::Ems(1.0), LengthMode::Width),
    Err(ResolveError::MissingFontMetrics { .. })
  ));

  // With metrics present, a zero value is a legitimate zero.
  let with_font = no_font.with_font(FontMetrics {
    font_size: 16.0,
    x_height: 8.0,
  });
  assert_eq!(
    with_font.resolve(LengthValue::Ems(0.0), LengthMode::Width),
    Ok(0.0)
  );
}

#[test]
fn cycle_guard_detects_reentry_and_recovers_after_exit() {
  let guard = CycleGuard::new();
  let element = ElementId(42);

  let scope = guard.enter(element).expect("first entry succeeds");
  assert_eq!(
    guard.enter(element).unwrap_err(),
    EffectError::CycleDetected { element }
  );

  drop(scope);
  let scope = guard.enter(element).expect("entry after exit succeeds");
  drop(scope);
  assert!(guard.is_empty());
}

#[test]
fn cycle_guard_releases_on_every_exit_path() {
  let guard = CycleGuard::new();

  fn resolve_with_failure(guard: &CycleGuard, element: ElementId) -> Result<(), EffectError> {
    let _scope = guard.enter(element)?;
    Err(EffectError::DegenerateGeometry { what: "test" })
  }

  assert!(resolve_with_failure(&guard, ElementId(7)).is_err());
  assert!(guard.is_empty());
  assert!(guard.enter(ElementId(7)).is_ok());
}
