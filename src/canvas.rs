//! Drawing surface over a tiny-skia pixmap
//!
//! The pipeline's view of the 2D drawing abstraction: a pixel buffer plus a
//! stack of graphics states (transform, clip mask, opacity, composite
//! operator) and offscreen transparency layers. Capture contexts handed to
//! the host during a filter pass, mask buffers and clip applications all go
//! through this type; rasterization itself is tiny-skia's job.

use crate::color::Rgba;
use crate::error::SurfaceError;
use crate::geometry::{Point, Rect};
use crate::scene::ClipRule;
use crate::surface::new_pixmap;
use tiny_skia::BlendMode;
use tiny_skia::FillRule;
use tiny_skia::Mask;
use tiny_skia::MaskType;
use tiny_skia::Paint;
use tiny_skia::Path;
use tiny_skia::Pixmap;
use tiny_skia::PixmapPaint;
use tiny_skia::Transform;

/// Graphics state captured by [`Canvas::save`]
#[derive(Debug, Clone)]
struct CanvasState {
  transform: Transform,
  opacity: f32,
  clip_mask: Option<Mask>,
  blend_mode: BlendMode,
}

impl CanvasState {
  fn new() -> Self {
    Self {
      transform: Transform::identity(),
      opacity: 1.0,
      clip_mask: None,
      blend_mode: BlendMode::SourceOver,
    }
  }
}

#[derive(Debug)]
struct LayerRecord {
  pixmap: Pixmap,
  state_stack: Vec<CanvasState>,
  current_state: CanvasState,
  opacity: f32,
  composite_blend: Option<BlendMode>,
}

/// A pixel buffer with a graphics-state stack and transparency layers
///
/// Not thread-safe; each paint traversal owns its canvases exclusively.
pub struct Canvas {
  pixmap: Pixmap,
  state_stack: Vec<CanvasState>,
  layer_stack: Vec<LayerRecord>,
  current_state: CanvasState,
}

impl Canvas {
  /// Creates a transparent canvas of the given size
  pub fn new(width: u32, height: u32) -> Result<Self, SurfaceError> {
    Ok(Self::from_pixmap(new_pixmap(width, height)?))
  }

  /// Wraps an existing pixmap without clearing it
  pub fn from_pixmap(pixmap: Pixmap) -> Self {
    Self {
      pixmap,
      state_stack: Vec::new(),
      layer_stack: Vec::new(),
      current_state: CanvasState::new(),
    }
  }

  pub fn width(&self) -> u32 {
    self.pixmap.width()
  }

  pub fn height(&self) -> u32 {
    self.pixmap.height()
  }

  /// Canvas bounds in device pixels
  pub fn bounds(&self) -> Rect {
    Rect::from_xywh(0.0, 0.0, self.width() as f32, self.height() as f32)
  }

  pub fn pixmap(&self) -> &Pixmap {
    &self.pixmap
  }

  pub fn pixmap_mut(&mut self) -> &mut Pixmap {
    &mut self.pixmap
  }

  pub fn into_pixmap(self) -> Pixmap {
    self.pixmap
  }

  // ==========================================================================
  // State stack
  // ==========================================================================

  /// Saves the current graphics state
  pub fn save(&mut self) {
    self.state_stack.push(self.current_state.clone());
  }

  /// Restores the most recently saved graphics state
  pub fn restore(&mut self) {
    if let Some(state) = self.state_stack.pop() {
      self.current_state = state;
    }
  }

  /// Depth of the saved-state stack
  pub fn state_depth(&self) -> usize {
    self.state_stack.len()
  }

  pub fn set_transform(&mut self, transform: Transform) {
    self.current_state.transform = transform;
  }

  pub fn transform(&self) -> Transform {
    self.current_state.transform
  }

  /// Appends a transform: subsequent drawing maps through `t` first, then
  /// the previous transform
  pub fn concat_transform(&mut self, t: Transform) {
    self.current_state.transform = self.current_state.transform.pre_concat(t);
  }

  pub fn translate(&mut self, dx: f32, dy: f32) {
    self.current_state.transform = self.current_state.transform.pre_translate(dx, dy);
  }

  pub fn scale(&mut self, sx: f32, sy: f32) {
    self.current_state.transform = self.current_state.transform.pre_scale(sx, sy);
  }

  pub fn set_opacity(&mut self, opacity: f32) {
    self.current_state.opacity = opacity.clamp(0.0, 1.0);
  }

  /// Sets the composite operator for subsequent drawing
  pub fn set_blend_mode(&mut self, mode: BlendMode) {
    self.current_state.blend_mode = mode;
  }

  // ==========================================================================
  // Clipping
  // ==========================================================================

  /// Intersects the clip with a rectangle in current user space
  pub fn clip_rect(&mut self, rect: Rect) {
    if let Some(path) = rect_path(rect) {
      self.clip_path(&path, ClipRule::NonZero);
    } else {
      self.clip_everything();
    }
  }

  /// Intersects the clip with a path in current user space
  pub fn clip_path(&mut self, path: &Path, rule: ClipRule) {
    let new_mask = self.build_clip_mask(path, rule);
    self.current_state.clip_mask = match (new_mask, self.current_state.clip_mask.take()) {
      (Some(mut next), Some(existing)) => {
        combine_masks(&mut next, &existing);
        Some(next)
      }
      (Some(mask), None) => Some(mask),
      // An unrepresentable clip admits nothing.
      (None, _) => Some(self.empty_mask()),
    };
  }

  /// Clips everything away: nothing drawn afterwards is visible
  ///
  /// Used when a clip-path is present but resolves to no geometry.
  pub fn clip_everything(&mut self) {
    self.current_state.clip_mask = Some(self.empty_mask());
  }

  /// The active clip mask, if any
  pub fn clip_mask(&self) -> Option<&Mask> {
    self.current_state.clip_mask.as_ref()
  }

  fn empty_mask(&self) -> Mask {
    Mask::new(self.width().max(1), self.height().max(1)).expect("mask dimensions already validated")
  }

  fn build_clip_mask(&self, path: &Path, rule: ClipRule) -> Option<Mask> {
    if self.width() == 0 || self.height() == 0 {
      return None;
    }
    let mut mask_pixmap = Pixmap::new(self.width(), self.height())?;
    let mut paint = Paint::default();
    paint.set_color_rgba8(255, 255, 255, 255);
    paint.anti_alias = true;
    mask_pixmap.fill_path(
      path,
      &paint,
      rule.to_skia(),
      self.current_state.transform,
      None,
    );
    Some(Mask::from_pixmap(mask_pixmap.as_ref(), MaskType::Alpha))
  }

  // ==========================================================================
  // Transparency layers
  // ==========================================================================

  /// Pushes an offscreen layer
  ///
  /// Drawing lands in a fresh transparent buffer until the matching
  /// [`Canvas::pop_layer`], which composites it into the parent with
  /// `composite_blend` (or the then-current blend mode when `None`).
  pub fn push_layer(
    &mut self,
    opacity: f32,
    composite_blend: Option<BlendMode>,
  ) -> Result<(), SurfaceError> {
    let fresh = new_pixmap(self.width(), self.height())?;
    let record = LayerRecord {
      pixmap: std::mem::replace(&mut self.pixmap, fresh),
      state_stack: self.state_stack.clone(),
      current_state: self.current_state.clone(),
      opacity: opacity.clamp(0.0, 1.0),
      composite_blend,
    };
    self.layer_stack.push(record);
    // Painting inside the layer starts from a neutral compositing state;
    // the transform and clip carry over.
    self.current_state.opacity = 1.0;
    self.current_state.blend_mode = BlendMode::SourceOver;
    Ok(())
  }

  /// Pops the most recent layer and composites it into the parent
  pub fn pop_layer(&mut self) {
    let Some(record) = self.layer_stack.pop() else {
      debug_assert!(false, "pop_layer without matching push");
      return;
    };
    let layer_pixmap = std::mem::replace(&mut self.pixmap, record.pixmap);
    self.state_stack = record.state_stack;
    self.current_state = record.current_state;

    let mut paint = PixmapPaint::default();
    paint.opacity = (record.opacity * self.current_state.opacity).clamp(0.0, 1.0);
    paint.blend_mode = record
      .composite_blend
      .unwrap_or(self.current_state.blend_mode);
    let clip = self.current_state.clip_mask.clone();
    self.pixmap.draw_pixmap(
      0,
      0,
      layer_pixmap.as_ref(),
      &paint,
      Transform::identity(),
      clip.as_ref(),
    );
  }

  /// Depth of the layer stack
  pub fn layer_depth(&self) -> usize {
    self.layer_stack.len()
  }

  // ==========================================================================
  // Drawing
  // ==========================================================================

  /// Fills the whole buffer with a color, ignoring state
  pub fn clear(&mut self, color: Rgba) {
    self.pixmap.fill(color.to_skia());
  }

  /// Clears a rectangle (in current user space) back to transparent
  pub fn clear_rect(&mut self, rect: Rect) {
    let Some(path) = rect_path(rect) else {
      return;
    };
    let mut paint = Paint::default();
    paint.set_color_rgba8(0, 0, 0, 255);
    paint.blend_mode = BlendMode::Clear;
    paint.anti_alias = false;
    self.pixmap.fill_path(
      &path,
      &paint,
      FillRule::Winding,
      self.current_state.transform,
      None,
    );
  }

  /// Fills a path with a solid color under the current state
  pub fn fill_path(&mut self, path: &Path, color: Rgba, rule: ClipRule) {
    let mut paint = Paint::default();
    let color = color.with_opacity(self.current_state.opacity);
    paint.set_color(color.to_skia());
    paint.anti_alias = true;
    paint.blend_mode = self.current_state.blend_mode;
    let clip = self.current_state.clip_mask.clone();
    self.pixmap.fill_path(
      path,
      &paint,
      rule.to_skia(),
      self.current_state.transform,
      clip.as_ref(),
    );
  }

  /// Fills a rectangle with a solid color under the current state
  pub fn fill_rect(&mut self, rect: Rect, color: Rgba) {
    if let Some(path) = rect_path(rect) {
      self.fill_path(&path, color, ClipRule::NonZero);
    }
  }

  /// Draws a pixel buffer at `origin` under the current state
  ///
  /// `origin` is mapped through the current transform; the buffer's pixels
  /// are not resampled beyond what the transform requires.
  pub fn draw_pixmap(&mut self, origin: Point, source: &Pixmap, opacity: f32) {
    let mut paint = PixmapPaint::default();
    paint.opacity = (opacity * self.current_state.opacity).clamp(0.0, 1.0);
    paint.blend_mode = self.current_state.blend_mode;
    paint.quality = tiny_skia::FilterQuality::Bilinear;
    let clip = self.current_state.clip_mask.clone();
    let transform = self
      .current_state
      .transform
      .pre_translate(origin.x, origin.y);
    self.pixmap.draw_pixmap(
      0,
      0,
      source.as_ref(),
      &paint,
      transform,
      clip.as_ref(),
    );
  }
}

impl std::fmt::Debug for Canvas {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Canvas")
      .field("width", &self.width())
      .field("height", &self.height())
      .field("state_depth", &self.state_depth())
      .field("layer_depth", &self.layer_depth())
      .finish()
  }
}

fn rect_path(rect: Rect) -> Option<Path> {
  let skia_rect = tiny_skia::Rect::from_xywh(rect.x(), rect.y(), rect.width(), rect.height())?;
  Some(tiny_skia::PathBuilder::from_rect(skia_rect))
}

/// Multiplies two coverage masks together (intersection)
fn combine_masks(into: &mut Mask, existing: &Mask) {
  if into.width() != existing.width() || into.height() != existing.height() {
    return;
  }
  for (dst, src) in into.data_mut().iter_mut().zip(existing.data().iter()) {
    let multiplied = (*dst as u16 * *src as u16 + 127) / 255;
    *dst = multiplied as u8;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn filled_canvas(width: u32, height: u32, color: Rgba) -> Canvas {
    let mut canvas = Canvas::new(width, height).unwrap();
    canvas.clear(color);
    canvas
  }

  #[test]
  fn save_restore_round_trips_transform() {
    let mut canvas = Canvas::new(8, 8).unwrap();
    canvas.save();
    canvas.translate(4.0, 4.0);
    assert_ne!(canvas.transform(), Transform::identity());
    canvas.restore();
    assert_eq!(canvas.transform(), Transform::identity());
  }

  #[test]
  fn clip_everything_hides_subsequent_fills() {
    let mut canvas = Canvas::new(4, 4).unwrap();
    canvas.clip_everything();
    canvas.fill_rect(Rect::from_xywh(0.0, 0.0, 4.0, 4.0), Rgba::WHITE);
    assert!(canvas.pixmap().pixels().iter().all(|px| px.alpha() == 0));
  }

  #[test]
  fn clip_path_restricts_fill_coverage() {
    let mut canvas = Canvas::new(4, 4).unwrap();
    let left_half = tiny_skia::PathBuilder::from_rect(
      tiny_skia::Rect::from_xywh(0.0, 0.0, 2.0, 4.0).unwrap(),
    );
    canvas.clip_path(&left_half, ClipRule::NonZero);
    canvas.fill_rect(Rect::from_xywh(0.0, 0.0, 4.0, 4.0), Rgba::WHITE);

    let pixels = canvas.pixmap().pixels();
    assert!(pixels[0].alpha() > 0);
    assert_eq!(pixels[3].alpha(), 0);
  }

  #[test]
  fn nested_clips_intersect() {
    let mut canvas = Canvas::new(4, 1).unwrap();
    let left = tiny_skia::PathBuilder::from_rect(
      tiny_skia::Rect::from_xywh(0.0, 0.0, 3.0, 1.0).unwrap(),
    );
    let right = tiny_skia::PathBuilder::from_rect(
      tiny_skia::Rect::from_xywh(1.0, 0.0, 3.0, 1.0).unwrap(),
    );
    canvas.clip_path(&left, ClipRule::NonZero);
    canvas.clip_path(&right, ClipRule::NonZero);
    canvas.fill_rect(Rect::from_xywh(0.0, 0.0, 4.0, 1.0), Rgba::WHITE);

    let pixels = canvas.pixmap().pixels();
    assert_eq!(pixels[0].alpha(), 0);
    assert!(pixels[1].alpha() > 0);
    assert!(pixels[2].alpha() > 0);
    assert_eq!(pixels[3].alpha(), 0);
  }

  #[test]
  fn destination_in_layer_masks_parent() {
    let mut canvas = filled_canvas(2, 1, Rgba::new(255, 0, 0, 1.0));
    canvas.push_layer(1.0, Some(BlendMode::DestinationIn)).unwrap();
    // Cover only the left pixel inside the layer.
    canvas.fill_rect(Rect::from_xywh(0.0, 0.0, 1.0, 1.0), Rgba::WHITE);
    canvas.pop_layer();

    let pixels = canvas.pixmap().pixels();
    assert_eq!(pixels[0].alpha(), 255);
    assert_eq!(pixels[1].alpha(), 0);
  }

  #[test]
  fn clear_rect_respects_transform() {
    let mut canvas = filled_canvas(4, 1, Rgba::WHITE);
    canvas.translate(2.0, 0.0);
    canvas.clear_rect(Rect::from_xywh(0.0, 0.0, 2.0, 1.0));
    let pixels = canvas.pixmap().pixels();
    assert!(pixels[0].alpha() > 0);
    assert!(pixels[1].alpha() > 0);
    assert_eq!(pixels[2].alpha(), 0);
    assert_eq!(pixels[3].alpha(), 0);
  }

  #[test]
  fn layer_depth_tracks_push_pop() {
    let mut canvas = Canvas::new(2, 2).unwrap();
    canvas.push_layer(1.0, None).unwrap();
    assert_eq!(canvas.layer_depth(), 1);
    canvas.pop_layer();
    assert_eq!(canvas.layer_depth(), 0);
  }
}
