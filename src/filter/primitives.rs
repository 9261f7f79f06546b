//! Filter primitive leaf operations
//!
//! Each primitive is a replaceable leaf operation on premultiplied pixel
//! buffers: it consumes zero or more input buffers and produces one output
//! buffer plus the device-space region that actually carries content.
//! Graph wiring, subregions and buffer lifetime are the chain's concern
//! ([`crate::filter::EffectChain`]); nothing here allocates beyond its own
//! output.

use crate::color::Rgba;
use crate::filter::blur::apply_gaussian_blur_anisotropic;
use crate::geometry::Rect;
use crate::scene::ColorInterpolation;
use crate::surface::{linear_to_srgb, new_pixmap, srgb_to_linear};
use tiny_skia::{BlendMode, Pixmap, PixmapPaint, PremultipliedColorU8, Transform};

/// One filter primitive's parameters
///
/// Inputs are declared separately on the effect operation; the variants here
/// only carry the knobs of the pixel operation itself. Scalar parameters are
/// in user units and are scaled into device space by the chain before the
/// leaf op runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
  /// Gaussian blur with independent axis deviations
  Blur { std_dev: (f32, f32) },
  /// Translation of the input
  Offset { dx: f32, dy: f32 },
  /// Solid color fill of the subregion
  Flood { color: Rgba, opacity: f32 },
  /// 5x4 color matrix and its common shorthands
  ColorMatrix { kind: ColorMatrixKind },
  /// Porter-Duff or arithmetic combination of two inputs
  Composite { operator: CompositeOperator },
  /// Source-over stack of all inputs
  Merge,
  /// Second-input blend over the first
  Blend { mode: BlendMode },
  /// Repeats the input's subregion across the output subregion
  Tile,
  /// Blurred, offset, recolored copy underneath the input
  DropShadow {
    dx: f32,
    dy: f32,
    std_dev: (f32, f32),
    color: Rgba,
    opacity: f32,
  },
  /// Displaces the first input by the second input's channel values
  DisplacementMap {
    scale: f32,
    x_channel: ChannelSelector,
    y_channel: ChannelSelector,
  },
  /// Per-channel transfer functions
  ComponentTransfer {
    r: TransferFn,
    g: TransferFn,
    b: TransferFn,
    a: TransferFn,
  },
}

impl Primitive {
  /// True when the primitive can sample outside its input's bounds
  ///
  /// A chain containing any such primitive must capture the full source
  /// rect rather than just the dirty rect.
  pub fn moves_pixels(&self) -> bool {
    matches!(
      self,
      Primitive::Blur { .. }
        | Primitive::Offset { .. }
        | Primitive::DropShadow { .. }
        | Primitive::DisplacementMap { .. }
        | Primitive::Tile
    )
  }

  /// Number of inputs the primitive consumes
  pub fn input_arity(&self) -> InputArity {
    match self {
      Primitive::Flood { .. } => InputArity::None,
      Primitive::Composite { .. } | Primitive::Blend { .. } | Primitive::DisplacementMap { .. } => {
        InputArity::Two
      }
      Primitive::Merge => InputArity::Variadic,
      _ => InputArity::One,
    }
  }
}

/// Input arity classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputArity {
  None,
  One,
  Two,
  Variadic,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColorMatrixKind {
  Matrix(Box<[f32; 20]>),
  Saturate(f32),
  HueRotate(f32),
  LuminanceToAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompositeOperator {
  Over,
  In,
  Out,
  Atop,
  Xor,
  Arithmetic { k1: f32, k2: f32, k3: f32, k4: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSelector {
  R,
  G,
  B,
  A,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferFn {
  Identity,
  Linear { slope: f32, intercept: f32 },
  Gamma { amplitude: f32, exponent: f32, offset: f32 },
  Table { values: Vec<f32> },
  Discrete { values: Vec<f32> },
}

impl TransferFn {
  fn evaluate(&self, c: f32) -> f32 {
    match self {
      TransferFn::Identity => c,
      TransferFn::Linear { slope, intercept } => slope * c + intercept,
      TransferFn::Gamma {
        amplitude,
        exponent,
        offset,
      } => amplitude * c.powf(*exponent) + offset,
      TransferFn::Table { values } => {
        if values.is_empty() {
          return c;
        }
        if values.len() == 1 {
          return values[0];
        }
        let n = values.len() - 1;
        let scaled = c.clamp(0.0, 1.0) * n as f32;
        let k = (scaled.floor() as usize).min(n - 1);
        let frac = scaled - k as f32;
        values[k] + frac * (values[k + 1] - values[k])
      }
      TransferFn::Discrete { values } => {
        if values.is_empty() {
          return c;
        }
        let n = values.len();
        let k = ((c.clamp(0.0, 1.0) * n as f32).floor() as usize).min(n - 1);
        values[k]
      }
    }
  }
}

/// One buffer flowing between primitives
///
/// All buffers in a chain share the backing store's dimensions; `region` is
/// the sub-rectangle (buffer coordinates) that actually carries content.
#[derive(Debug, Clone)]
pub struct NodeOutput {
  pub pixmap: Pixmap,
  pub region: Rect,
}

impl NodeOutput {
  pub fn new(pixmap: Pixmap, region: Rect) -> Self {
    Self { pixmap, region }
  }
}

/// Zeroes every pixel outside `region`
pub(crate) fn clip_pixmap_to_region(pixmap: &mut Pixmap, region: Rect) {
  let width = pixmap.width() as i32;
  let height = pixmap.height() as i32;
  if width == 0 || height == 0 {
    return;
  }

  let min_x = (region.min_x().floor() as i32).clamp(0, width);
  let min_y = (region.min_y().floor() as i32).clamp(0, height);
  let max_x = (region.max_x().ceil() as i32).clamp(0, width);
  let max_y = (region.max_y().ceil() as i32).clamp(0, height);

  if min_x == 0 && min_y == 0 && max_x == width && max_y == height {
    return;
  }

  let row_stride = pixmap.width() as usize;
  for (y, row) in pixmap.pixels_mut().chunks_mut(row_stride).enumerate() {
    let y = y as i32;
    if y < min_y || y >= max_y {
      for px in row {
        *px = PremultipliedColorU8::TRANSPARENT;
      }
      continue;
    }
    for (x, px) in row.iter_mut().enumerate() {
      let x = x as i32;
      if x < min_x || x >= max_x {
        *px = PremultipliedColorU8::TRANSPARENT;
      }
    }
  }
}

fn blank_like(reference: &Pixmap) -> Option<Pixmap> {
  new_pixmap(reference.width(), reference.height()).ok()
}

fn draw_over(dst: &mut Pixmap, src: &Pixmap, blend: BlendMode, dx: f32, dy: f32) {
  let mut paint = PixmapPaint::default();
  paint.blend_mode = blend;
  dst.draw_pixmap(
    0,
    0,
    src.as_ref(),
    &paint,
    Transform::from_translate(dx, dy),
    None,
  );
}

// ============================================================================
// Leaf operations
// ============================================================================

pub(crate) fn flood(width: u32, height: u32, color: Rgba, opacity: f32, region: Rect) -> Option<NodeOutput> {
  let mut pixmap = new_pixmap(width, height).ok()?;
  pixmap.fill(color.with_opacity(opacity).to_skia());
  clip_pixmap_to_region(&mut pixmap, region);
  Some(NodeOutput::new(pixmap, region))
}

pub(crate) fn blur(mut input: NodeOutput, sigma_x: f32, sigma_y: f32) -> NodeOutput {
  if sigma_x != 0.0 || sigma_y != 0.0 {
    apply_gaussian_blur_anisotropic(&mut input.pixmap, sigma_x, sigma_y);
    input.region = input.region.inflate(sigma_x.abs() * 3.0, sigma_y.abs() * 3.0);
  }
  input
}

pub(crate) fn offset(input: NodeOutput, dx: f32, dy: f32) -> Option<NodeOutput> {
  let mut out = blank_like(&input.pixmap)?;
  draw_over(&mut out, &input.pixmap, BlendMode::SourceOver, dx, dy);
  Some(NodeOutput::new(
    out,
    input.region.translate(crate::geometry::Point::new(dx, dy)),
  ))
}

pub(crate) fn color_matrix(
  mut input: NodeOutput,
  kind: &ColorMatrixKind,
  color_space: ColorInterpolation,
) -> NodeOutput {
  let matrix: [f32; 20] = match kind {
    ColorMatrixKind::Matrix(values) => **values,
    ColorMatrixKind::Saturate(amount) => saturate_matrix(*amount),
    ColorMatrixKind::HueRotate(degrees) => hue_rotate_matrix(*degrees),
    ColorMatrixKind::LuminanceToAlpha => [
      0.0, 0.0, 0.0, 0.0, 0.0, //
      0.0, 0.0, 0.0, 0.0, 0.0, //
      0.0, 0.0, 0.0, 0.0, 0.0, //
      0.2125, 0.7154, 0.0721, 0.0, 0.0,
    ],
  };

  for px in input.pixmap.pixels_mut() {
    let [r, g, b, a] = unpack(*px, color_space);
    let apply_row = |row: &[f32]| row[0] * r + row[1] * g + row[2] * b + row[3] * a + row[4];
    let out = [
      apply_row(&matrix[0..5]),
      apply_row(&matrix[5..10]),
      apply_row(&matrix[10..15]),
      apply_row(&matrix[15..20]),
    ];
    *px = pack(out, color_space);
  }
  input
}

pub(crate) fn composite(
  in1: NodeOutput,
  in2: NodeOutput,
  operator: CompositeOperator,
) -> Option<NodeOutput> {
  if let CompositeOperator::Arithmetic { k1, k2, k3, k4 } = operator {
    return arithmetic_composite(in1, in2, k1, k2, k3, k4);
  }
  let (blend, region) = match operator {
    CompositeOperator::Over => (BlendMode::SourceOver, in1.region.union(in2.region)),
    CompositeOperator::In => (
      BlendMode::SourceIn,
      in1.region.intersection_or_empty(in2.region),
    ),
    CompositeOperator::Out => (BlendMode::SourceOut, in1.region),
    CompositeOperator::Atop => (BlendMode::SourceAtop, in2.region),
    CompositeOperator::Xor => (BlendMode::Xor, in1.region.union(in2.region)),
    CompositeOperator::Arithmetic { .. } => unreachable!(),
  };
  let mut out = in2.pixmap;
  draw_over(&mut out, &in1.pixmap, blend, 0.0, 0.0);
  Some(NodeOutput::new(out, region))
}

fn arithmetic_composite(
  in1: NodeOutput,
  in2: NodeOutput,
  k1: f32,
  k2: f32,
  k3: f32,
  k4: f32,
) -> Option<NodeOutput> {
  let mut out = blank_like(&in1.pixmap)?;
  let a_px = in1.pixmap.pixels();
  let b_px = in2.pixmap.pixels();
  for ((dst, a), b) in out.pixels_mut().iter_mut().zip(a_px).zip(b_px) {
    let channel = |i: f32, j: f32| (k1 * i * j + k2 * i + k3 * j + k4).clamp(0.0, 1.0);
    let alpha = channel(a.alpha() as f32 / 255.0, b.alpha() as f32 / 255.0);
    let map = |ac: u8, bc: u8| {
      let v = channel(ac as f32 / 255.0, bc as f32 / 255.0).min(alpha);
      (v * 255.0).round() as u8
    };
    *dst = PremultipliedColorU8::from_rgba(
      map(a.red(), b.red()),
      map(a.green(), b.green()),
      map(a.blue(), b.blue()),
      (alpha * 255.0).round() as u8,
    )
    .unwrap_or(PremultipliedColorU8::TRANSPARENT);
  }
  let region = in1.region.union(in2.region);
  Some(NodeOutput::new(out, region))
}

pub(crate) fn merge(inputs: Vec<NodeOutput>) -> Option<NodeOutput> {
  let first = inputs.first()?;
  let mut out = blank_like(&first.pixmap)?;
  let mut region = Rect::ZERO;
  for input in &inputs {
    draw_over(&mut out, &input.pixmap, BlendMode::SourceOver, 0.0, 0.0);
    region = region.union(input.region);
  }
  Some(NodeOutput::new(out, region))
}

pub(crate) fn blend(in1: NodeOutput, in2: NodeOutput, mode: BlendMode) -> NodeOutput {
  let region = in1.region.union(in2.region);
  let mut out = in2.pixmap;
  draw_over(&mut out, &in1.pixmap, mode, 0.0, 0.0);
  NodeOutput::new(out, region)
}

pub(crate) fn tile(input: NodeOutput, target_region: Rect) -> Option<NodeOutput> {
  let tile_rect = input.region;
  if tile_rect.width() < 1.0 || tile_rect.height() < 1.0 || target_region.is_empty() {
    return Some(NodeOutput::new(input.pixmap, Rect::ZERO));
  }
  let mut out = blank_like(&input.pixmap)?;
  let tile_w = tile_rect.width();
  let tile_h = tile_rect.height();
  let start_x = tile_rect.x() - (((tile_rect.x() - target_region.x()) / tile_w).ceil() * tile_w);
  let start_y = tile_rect.y() - (((tile_rect.y() - target_region.y()) / tile_h).ceil() * tile_h);

  let mut y = start_y;
  while y < target_region.max_y() {
    let mut x = start_x;
    while x < target_region.max_x() {
      draw_over(
        &mut out,
        &input.pixmap,
        BlendMode::SourceOver,
        x - tile_rect.x(),
        y - tile_rect.y(),
      );
      x += tile_w;
    }
    y += tile_h;
  }
  Some(NodeOutput::new(out, target_region))
}

pub(crate) fn drop_shadow(
  input: NodeOutput,
  dx: f32,
  dy: f32,
  sigma: (f32, f32),
  color: Rgba,
  opacity: f32,
) -> Option<NodeOutput> {
  let mut shadow = input.pixmap.clone();
  let tint = color.with_opacity(opacity);
  for px in shadow.pixels_mut() {
    let coverage = px.alpha() as f32 / 255.0 * tint.a;
    let premul = |c: u8| ((c as f32 / 255.0 * coverage) * 255.0).round() as u8;
    *px = PremultipliedColorU8::from_rgba(
      premul(tint.r),
      premul(tint.g),
      premul(tint.b),
      (coverage * 255.0).round() as u8,
    )
    .unwrap_or(PremultipliedColorU8::TRANSPARENT);
  }
  apply_gaussian_blur_anisotropic(&mut shadow, sigma.0, sigma.1);

  let mut out = blank_like(&input.pixmap)?;
  draw_over(&mut out, &shadow, BlendMode::SourceOver, dx, dy);
  draw_over(&mut out, &input.pixmap, BlendMode::SourceOver, 0.0, 0.0);

  let shadow_region = input
    .region
    .inflate(sigma.0.abs() * 3.0, sigma.1.abs() * 3.0)
    .translate(crate::geometry::Point::new(dx, dy));
  Some(NodeOutput::new(out, input.region.union(shadow_region)))
}

pub(crate) fn displacement_map(
  in1: NodeOutput,
  in2: NodeOutput,
  scale: f32,
  x_channel: ChannelSelector,
  y_channel: ChannelSelector,
) -> Option<NodeOutput> {
  let mut out = blank_like(&in1.pixmap)?;
  let width = in1.pixmap.width() as i32;
  let height = in1.pixmap.height() as i32;
  let src = in1.pixmap.pixels();
  let map = in2.pixmap.pixels();

  let channel_value = |px: PremultipliedColorU8, selector: ChannelSelector| -> f32 {
    let alpha = px.alpha() as f32;
    match selector {
      ChannelSelector::A => alpha / 255.0,
      // Color channels are premultiplied; unpremultiply for the lookup.
      ChannelSelector::R | ChannelSelector::G | ChannelSelector::B if alpha > 0.0 => {
        let c = match selector {
          ChannelSelector::R => px.red(),
          ChannelSelector::G => px.green(),
          _ => px.blue(),
        };
        (c as f32 / alpha).clamp(0.0, 1.0)
      }
      _ => 0.0,
    }
  };

  for y in 0..height {
    for x in 0..width {
      let idx = (y * width + x) as usize;
      let displacement = map[idx];
      let dx = scale * (channel_value(displacement, x_channel) - 0.5);
      let dy = scale * (channel_value(displacement, y_channel) - 0.5);
      let sx = x + dx.round() as i32;
      let sy = y + dy.round() as i32;
      if sx < 0 || sy < 0 || sx >= width || sy >= height {
        continue;
      }
      out.pixels_mut()[idx] = src[(sy * width + sx) as usize];
    }
  }

  let region = in1.region.inflate(scale.abs() * 0.5, scale.abs() * 0.5);
  Some(NodeOutput::new(out, region))
}

pub(crate) fn component_transfer(
  mut input: NodeOutput,
  r: &TransferFn,
  g: &TransferFn,
  b: &TransferFn,
  a: &TransferFn,
  color_space: ColorInterpolation,
) -> NodeOutput {
  for px in input.pixmap.pixels_mut() {
    let [cr, cg, cb, ca] = unpack(*px, color_space);
    *px = pack(
      [
        r.evaluate(cr),
        g.evaluate(cg),
        b.evaluate(cb),
        a.evaluate(ca),
      ],
      color_space,
    );
  }
  input
}

// ============================================================================
// Pixel packing
// ============================================================================

/// Premultiplied u8 pixel → unpremultiplied [r, g, b, a] in the filter's
/// working color space
fn unpack(px: PremultipliedColorU8, color_space: ColorInterpolation) -> [f32; 4] {
  let a = px.alpha() as f32 / 255.0;
  if a <= 0.0 {
    return [0.0, 0.0, 0.0, 0.0];
  }
  let inv_a = 1.0 / a;
  let channel = |c: u8| {
    let v = (c as f32 / 255.0 * inv_a).clamp(0.0, 1.0);
    match color_space {
      ColorInterpolation::Srgb => v,
      ColorInterpolation::LinearRgb => srgb_to_linear(v),
    }
  };
  [channel(px.red()), channel(px.green()), channel(px.blue()), a]
}

fn pack(channels: [f32; 4], color_space: ColorInterpolation) -> PremultipliedColorU8 {
  let a = channels[3].clamp(0.0, 1.0);
  let a_byte = (a * 255.0).round().clamp(0.0, 255.0) as u8;
  let channel = |v: f32| {
    let v = match color_space {
      ColorInterpolation::Srgb => v.clamp(0.0, 1.0),
      ColorInterpolation::LinearRgb => linear_to_srgb(v.clamp(0.0, 1.0)),
    };
    let byte = (v * a * 255.0).round().clamp(0.0, 255.0) as u8;
    byte.min(a_byte)
  };
  PremultipliedColorU8::from_rgba(
    channel(channels[0]),
    channel(channels[1]),
    channel(channels[2]),
    a_byte,
  )
  .unwrap_or(PremultipliedColorU8::TRANSPARENT)
}

fn saturate_matrix(amount: f32) -> [f32; 20] {
  let s = amount;
  [
    0.213 + 0.787 * s,
    0.715 - 0.715 * s,
    0.072 - 0.072 * s,
    0.0,
    0.0,
    0.213 - 0.213 * s,
    0.715 + 0.285 * s,
    0.072 - 0.072 * s,
    0.0,
    0.0,
    0.213 - 0.213 * s,
    0.715 - 0.715 * s,
    0.072 + 0.928 * s,
    0.0,
    0.0,
    0.0,
    0.0,
    0.0,
    1.0,
    0.0,
  ]
}

fn hue_rotate_matrix(degrees: f32) -> [f32; 20] {
  let angle = degrees.to_radians();
  let cos = angle.cos();
  let sin = angle.sin();
  [
    0.213 + cos * 0.787 - sin * 0.213,
    0.715 - cos * 0.715 - sin * 0.715,
    0.072 - cos * 0.072 + sin * 0.928,
    0.0,
    0.0,
    0.213 - cos * 0.213 + sin * 0.143,
    0.715 + cos * 0.285 + sin * 0.140,
    0.072 - cos * 0.072 - sin * 0.283,
    0.0,
    0.0,
    0.213 - cos * 0.213 - sin * 0.787,
    0.715 - cos * 0.715 + sin * 0.715,
    0.072 + cos * 0.928 + sin * 0.072,
    0.0,
    0.0,
    0.0,
    0.0,
    0.0,
    1.0,
    0.0,
  ]
}

#[cfg(test)]
mod tests {
  use super::*;

  fn solid(width: u32, height: u32, color: Rgba) -> NodeOutput {
    let mut pixmap = new_pixmap(width, height).unwrap();
    pixmap.fill(color.to_skia());
    NodeOutput::new(
      pixmap,
      Rect::from_xywh(0.0, 0.0, width as f32, height as f32),
    )
  }

  #[test]
  fn pixel_movers_are_flagged() {
    assert!(Primitive::Blur { std_dev: (1.0, 1.0) }.moves_pixels());
    assert!(Primitive::Offset { dx: 1.0, dy: 0.0 }.moves_pixels());
    assert!(Primitive::Tile.moves_pixels());
    assert!(!Primitive::Merge.moves_pixels());
    assert!(
      !Primitive::ColorMatrix {
        kind: ColorMatrixKind::Saturate(0.5)
      }
      .moves_pixels()
    );
  }

  #[test]
  fn offset_translates_region_and_pixels() {
    let input = solid(4, 4, Rgba::WHITE);
    let out = offset(input, 2.0, 0.0).unwrap();
    assert_eq!(out.region, Rect::from_xywh(2.0, 0.0, 4.0, 4.0));
    let pixels = out.pixmap.pixels();
    assert_eq!(pixels[0].alpha(), 0);
    assert_eq!(pixels[2].alpha(), 255);
  }

  #[test]
  fn composite_in_keeps_intersection() {
    let a = solid(4, 1, Rgba::WHITE);
    let mut b = solid(4, 1, Rgba::WHITE);
    clip_pixmap_to_region(&mut b.pixmap, Rect::from_xywh(2.0, 0.0, 2.0, 1.0));
    b.region = Rect::from_xywh(2.0, 0.0, 2.0, 1.0);

    let out = composite(a, b, CompositeOperator::In).unwrap();
    assert_eq!(out.region, Rect::from_xywh(2.0, 0.0, 2.0, 1.0));
    let pixels = out.pixmap.pixels();
    assert_eq!(pixels[0].alpha(), 0);
    assert_eq!(pixels[2].alpha(), 255);
  }

  #[test]
  fn arithmetic_composite_applies_coefficients() {
    let a = solid(1, 1, Rgba::WHITE);
    let b = solid(1, 1, Rgba::TRANSPARENT);
    // k2=0.5: result = 0.5 * in1
    let out = composite(
      a,
      b,
      CompositeOperator::Arithmetic {
        k1: 0.0,
        k2: 0.5,
        k3: 0.0,
        k4: 0.0,
      },
    )
    .unwrap();
    let px = out.pixmap.pixels()[0];
    assert!((px.alpha() as i32 - 128).abs() <= 1);
  }

  #[test]
  fn luminance_to_alpha_clears_color() {
    let input = solid(1, 1, Rgba::WHITE);
    let out = color_matrix(
      input,
      &ColorMatrixKind::LuminanceToAlpha,
      ColorInterpolation::Srgb,
    );
    let px = out.pixmap.pixels()[0];
    assert_eq!(px.red(), 0);
    assert!(px.alpha() > 250);
  }

  #[test]
  fn merge_unions_regions() {
    let mut a = solid(4, 1, Rgba::WHITE);
    a.region = Rect::from_xywh(0.0, 0.0, 1.0, 1.0);
    let mut b = solid(4, 1, Rgba::WHITE);
    b.region = Rect::from_xywh(3.0, 0.0, 1.0, 1.0);
    let out = merge(vec![a, b]).unwrap();
    assert_eq!(out.region, Rect::from_xywh(0.0, 0.0, 4.0, 1.0));
  }

  #[test]
  fn component_transfer_table_interpolates() {
    let f = TransferFn::Table {
      values: vec![0.0, 1.0],
    };
    assert!((f.evaluate(0.5) - 0.5).abs() < 1e-6);
    let f = TransferFn::Discrete {
      values: vec![0.0, 1.0],
    };
    assert_eq!(f.evaluate(0.25), 0.0);
    assert_eq!(f.evaluate(0.75), 1.0);
  }

  #[test]
  fn displacement_map_shifts_pixels() {
    let mut src = solid(3, 1, Rgba::TRANSPARENT);
    src.pixmap.pixels_mut()[0] = PremultipliedColorU8::from_rgba(255, 255, 255, 255).unwrap();
    // Alpha channel = 1.0 everywhere → displacement of scale * 0.5.
    let map = solid(3, 1, Rgba::new(0, 0, 0, 1.0));
    let out = displacement_map(src, map, -2.0, ChannelSelector::A, ChannelSelector::A).unwrap();
    // dx = -2 * (1.0 - 0.5) = -1: output pixel 1 samples source pixel 0.
    let pixels = out.pixmap.pixels();
    assert_eq!(pixels[1].alpha(), 255);
  }

  #[test]
  fn clip_to_region_zeroes_outside() {
    let mut pixmap = new_pixmap(4, 4).unwrap();
    pixmap.fill(Rgba::WHITE.to_skia());
    clip_pixmap_to_region(&mut pixmap, Rect::from_xywh(1.0, 1.0, 2.0, 2.0));
    let pixels = pixmap.pixels();
    assert_eq!(pixels[0].alpha(), 0);
    assert_eq!(pixels[5].alpha(), 255);
    assert_eq!(pixels[15].alpha(), 0);
  }
}
