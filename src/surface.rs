//! Offscreen surface helpers
//!
//! Every offscreen buffer in the pipeline — filter backing stores, mask
//! buffers, clip masks — goes through the guarded allocation and clamping
//! helpers here. Oversized requests are clamped to a maximum dimension with
//! a uniform scale factor rather than rejected, and allocations that would
//! still exceed the byte limit fail with a recoverable error instead of
//! aborting the process.
//!
//! Whole-buffer conversions (luminance masks, linear-sRGB round trips) also
//! live here; they parallelize over rows above a size threshold.

use crate::error::SurfaceError;
use crate::geometry::Size;
use crate::scene::ColorInterpolation;
use rayon::prelude::*;
use std::sync::OnceLock;
use tiny_skia::{IntSize, Pixmap, PixmapPaint, PremultipliedColorU8, Transform};

const BYTES_PER_PIXEL: u64 = 4;

/// Upper bound on a single surface allocation to avoid process aborts on OOM
pub const MAX_SURFACE_BYTES: u64 = 512 * 1024 * 1024;

/// Maximum edge length of any backing store, in device pixels
///
/// Requests beyond this are clamped with a uniform scale factor; the clamp
/// is reflected in the owning chain's filter resolution so geometry stays
/// consistent.
pub const MAX_SURFACE_DIMENSION: u32 = 4096;

/// Row count above which whole-buffer conversions run on the rayon pool
const PARALLEL_ROW_THRESHOLD: usize = 64;

/// Pixel buffer plus the metadata needed to composite it back correctly
#[derive(Debug)]
pub struct BackingStore {
  pub pixmap: Pixmap,
  pub color_space: ColorInterpolation,
  pub device_pixel_ratio: f32,
}

impl BackingStore {
  pub fn width(&self) -> u32 {
    self.pixmap.width()
  }

  pub fn height(&self) -> u32 {
    self.pixmap.height()
  }
}

/// Returns true when `size` exceeds the maximum backing-store dimension
pub fn size_needs_clamping(size: Size) -> bool {
  size.width.ceil() > MAX_SURFACE_DIMENSION as f32 || size.height.ceil() > MAX_SURFACE_DIMENSION as f32
}

/// Clamps a requested size to the maximum dimension
///
/// Returns the clamped size and the uniform scale (≤ 1) that was applied.
/// The single-step factor is `min(1, max/width, max/height)`, so the longer
/// side lands exactly on the limit and the aspect ratio is preserved.
///
/// # Examples
///
/// ```
/// use layerfx::surface::{clamped_size, MAX_SURFACE_DIMENSION};
/// use layerfx::Size;
///
/// let (clamped, scale) = clamped_size(Size::new(8192.0, 4096.0));
/// assert_eq!(scale, 0.5);
/// assert!(clamped.width <= MAX_SURFACE_DIMENSION as f32);
/// ```
pub fn clamped_size(size: Size) -> (Size, f32) {
  let max = MAX_SURFACE_DIMENSION as f32;
  let mut scale: f32 = 1.0;
  if size.width > max {
    scale = scale.min(max / size.width);
  }
  if size.height > max {
    scale = scale.min(max / size.height);
  }
  if scale >= 1.0 {
    return (size, 1.0);
  }
  (size.scale(scale), scale)
}

fn guard_dimensions(width: u32, height: u32) -> Result<usize, SurfaceError> {
  if width == 0 || height == 0 {
    return Err(SurfaceError::InvalidDimensions { width, height });
  }
  let pixels = (width as u64)
    .checked_mul(height as u64)
    .ok_or(SurfaceError::InvalidDimensions { width, height })?;
  let bytes = pixels
    .checked_mul(BYTES_PER_PIXEL)
    .ok_or(SurfaceError::InvalidDimensions { width, height })?;
  if bytes > MAX_SURFACE_BYTES {
    return Err(SurfaceError::AllocationTooLarge {
      bytes,
      limit: MAX_SURFACE_BYTES,
    });
  }
  Ok(bytes as usize)
}

/// Allocates a transparent pixmap with explicit failure reporting
pub fn new_pixmap(width: u32, height: u32) -> Result<Pixmap, SurfaceError> {
  let bytes = guard_dimensions(width, height)?;
  let mut buffer = Vec::new();
  buffer
    .try_reserve_exact(bytes)
    .map_err(|_| SurfaceError::AllocationFailed { width, height })?;
  buffer.resize(bytes, 0);
  let size =
    IntSize::from_wh(width, height).ok_or(SurfaceError::InvalidDimensions { width, height })?;
  Pixmap::from_vec(buffer, size).ok_or(SurfaceError::AllocationFailed { width, height })
}

/// Composites `src` into `dst` with the destination-in operator
///
/// Keeps only the parts of the destination that overlap an opaque source —
/// the masking composite.
pub fn composite_destination_in(dst: &mut Pixmap, src: &Pixmap) {
  let mut paint = PixmapPaint::default();
  paint.blend_mode = tiny_skia::BlendMode::DestinationIn;
  dst.draw_pixmap(0, 0, src.as_ref(), &paint, Transform::identity(), None);
}

/// Converts a rendered buffer into a luminance mask in place
///
/// Each pixel's alpha becomes `luminance(rgb) * alpha` and the color
/// channels are cleared, so a later destination-in composite keys on
/// brightness rather than coverage.
pub fn convert_to_luminance_mask(pixmap: &mut Pixmap) {
  let convert_row = |row: &mut [PremultipliedColorU8]| {
    for px in row {
      let alpha = px.alpha() as f32 / 255.0;
      if alpha <= 0.0 {
        *px = PremultipliedColorU8::TRANSPARENT;
        continue;
      }
      // Channels are premultiplied; luminance of the unpremultiplied color
      // times alpha equals luminance of the premultiplied channels.
      let luminance = px.red() as f32 * 0.2125 + px.green() as f32 * 0.7154 + px.blue() as f32 * 0.0721;
      let a = luminance.round().clamp(0.0, 255.0) as u8;
      *px = PremultipliedColorU8::from_rgba(0, 0, 0, a)
        .unwrap_or(PremultipliedColorU8::TRANSPARENT);
    }
  };
  for_each_row(pixmap, convert_row);
}

const COLOR_LUT_SIZE: usize = 256;

static SRGB_TO_LINEAR_LUT: OnceLock<[f32; COLOR_LUT_SIZE + 1]> = OnceLock::new();
static LINEAR_TO_SRGB_LUT: OnceLock<[f32; COLOR_LUT_SIZE + 1]> = OnceLock::new();

fn build_lut<F>(f: F) -> [f32; COLOR_LUT_SIZE + 1]
where
  F: Fn(f32) -> f32,
{
  let mut lut = [0.0; COLOR_LUT_SIZE + 1];
  for (idx, slot) in lut.iter_mut().enumerate() {
    *slot = f(idx as f32 / COLOR_LUT_SIZE as f32);
  }
  lut
}

fn sample_lut(value: f32, lut: &[f32; COLOR_LUT_SIZE + 1]) -> f32 {
  let v = value.clamp(0.0, 1.0);
  let scaled = v * COLOR_LUT_SIZE as f32;
  let idx = scaled.floor() as usize;
  let frac = scaled - idx as f32;
  let next = (idx + 1).min(COLOR_LUT_SIZE);
  lut[idx] + (lut[next] - lut[idx]) * frac
}

/// sRGB electro-optical transfer, channel in [0, 1]
pub(crate) fn srgb_to_linear(value: f32) -> f32 {
  sample_lut(
    value,
    SRGB_TO_LINEAR_LUT.get_or_init(|| {
      build_lut(|x| {
        if x <= 0.04045 {
          x / 12.92
        } else {
          ((x + 0.055) / 1.055).powf(2.4)
        }
      })
    }),
  )
}

/// Inverse sRGB transfer, channel in [0, 1]
pub(crate) fn linear_to_srgb(value: f32) -> f32 {
  sample_lut(
    value,
    LINEAR_TO_SRGB_LUT.get_or_init(|| {
      build_lut(|x| {
        if x <= 0.0031308 {
          12.92 * x
        } else {
          1.055 * x.powf(1.0 / 2.4) - 0.055
        }
      })
    }),
  )
}

/// Converts a buffer between color-interpolation spaces in place
///
/// No-op when the spaces match. Operates on unpremultiplied channel values
/// to avoid precision loss on semi-transparent pixels.
pub fn transform_color_space(
  pixmap: &mut Pixmap,
  from: ColorInterpolation,
  to: ColorInterpolation,
) {
  if from == to {
    return;
  }
  let convert: fn(f32) -> f32 = match (from, to) {
    (ColorInterpolation::Srgb, ColorInterpolation::LinearRgb) => srgb_to_linear,
    (ColorInterpolation::LinearRgb, ColorInterpolation::Srgb) => linear_to_srgb,
    _ => unreachable!(),
  };
  let convert_row = move |row: &mut [PremultipliedColorU8]| {
    for px in row {
      let alpha = px.alpha() as f32 / 255.0;
      if alpha <= 0.0 {
        continue;
      }
      let inv_a = 1.0 / alpha;
      let map = |c: u8| {
        let unpremultiplied = (c as f32 / 255.0 * inv_a).clamp(0.0, 1.0);
        let converted = convert(unpremultiplied);
        (converted * alpha * 255.0).round().clamp(0.0, 255.0) as u8
      };
      *px = PremultipliedColorU8::from_rgba(map(px.red()), map(px.green()), map(px.blue()), px.alpha())
        .unwrap_or(*px);
    }
  };
  for_each_row(pixmap, convert_row);
}

fn for_each_row<F>(pixmap: &mut Pixmap, f: F)
where
  F: Fn(&mut [PremultipliedColorU8]) + Send + Sync,
{
  let width = pixmap.width() as usize;
  if width == 0 {
    return;
  }
  let pixels = pixmap.pixels_mut();
  let rows = pixels.len() / width;
  if rows > PARALLEL_ROW_THRESHOLD {
    pixels.par_chunks_mut(width).for_each(f);
  } else {
    pixels.chunks_mut(width).for_each(f);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_zero_dimensions() {
    assert!(matches!(
      new_pixmap(0, 10),
      Err(SurfaceError::InvalidDimensions { .. })
    ));
    assert!(matches!(
      new_pixmap(10, 0),
      Err(SurfaceError::InvalidDimensions { .. })
    ));
  }

  #[test]
  fn rejects_overflow_and_limit() {
    assert!(new_pixmap(u32::MAX, 2).is_err());
    let over_limit = (MAX_SURFACE_BYTES / BYTES_PER_PIXEL + 1) as u32;
    assert!(matches!(
      new_pixmap(over_limit, 1),
      Err(SurfaceError::AllocationTooLarge { .. })
    ));
  }

  #[test]
  fn allocates_small_pixmaps() {
    let pixmap = new_pixmap(4, 4).expect("small pixmap");
    assert_eq!(pixmap.width(), 4);
    assert_eq!(pixmap.height(), 4);
  }

  #[test]
  fn clamp_preserves_aspect_ratio() {
    let (clamped, scale) = clamped_size(Size::new(8000.0, 8000.0));
    assert_eq!(scale, 4096.0 / 8000.0);
    assert!((clamped.width - 4096.0).abs() < 0.01);
    assert!((clamped.height - 4096.0).abs() < 0.01);

    let (clamped, scale) = clamped_size(Size::new(8192.0, 2048.0));
    assert_eq!(scale, 0.5);
    assert_eq!(clamped.width, 4096.0);
    assert_eq!(clamped.height, 1024.0);
  }

  #[test]
  fn small_sizes_pass_through_unclamped() {
    let (clamped, scale) = clamped_size(Size::new(100.0, 50.0));
    assert_eq!(scale, 1.0);
    assert_eq!(clamped, Size::new(100.0, 50.0));
    assert!(!size_needs_clamping(Size::new(100.0, 50.0)));
    assert!(size_needs_clamping(Size::new(5000.0, 10.0)));
  }

  #[test]
  fn luminance_mask_keys_on_brightness() {
    let mut pixmap = new_pixmap(2, 1).unwrap();
    {
      let pixels = pixmap.pixels_mut();
      pixels[0] = PremultipliedColorU8::from_rgba(255, 255, 255, 255).unwrap();
      pixels[1] = PremultipliedColorU8::from_rgba(0, 0, 0, 255).unwrap();
    }
    convert_to_luminance_mask(&mut pixmap);
    let pixels = pixmap.pixels();
    assert_eq!(pixels[0].alpha(), 255);
    assert_eq!(pixels[1].alpha(), 0);
  }

  #[test]
  fn color_space_round_trip_is_stable() {
    let mut pixmap = new_pixmap(1, 1).unwrap();
    pixmap.pixels_mut()[0] = PremultipliedColorU8::from_rgba(100, 150, 200, 255).unwrap();
    transform_color_space(
      &mut pixmap,
      ColorInterpolation::Srgb,
      ColorInterpolation::LinearRgb,
    );
    transform_color_space(
      &mut pixmap,
      ColorInterpolation::LinearRgb,
      ColorInterpolation::Srgb,
    );
    let px = pixmap.pixels()[0];
    assert!((px.red() as i32 - 100).abs() <= 2);
    assert!((px.green() as i32 - 150).abs() <= 2);
    assert!((px.blue() as i32 - 200).abs() <= 2);
  }

  #[test]
  fn destination_in_keeps_overlap_only() {
    let mut dst = new_pixmap(2, 1).unwrap();
    for px in dst.pixels_mut() {
      *px = PremultipliedColorU8::from_rgba(255, 0, 0, 255).unwrap();
    }
    let mut src = new_pixmap(2, 1).unwrap();
    src.pixels_mut()[0] = PremultipliedColorU8::from_rgba(255, 255, 255, 255).unwrap();

    composite_destination_in(&mut dst, &src);
    assert_eq!(dst.pixels()[0].alpha(), 255);
    assert_eq!(dst.pixels()[1].alpha(), 0);
  }
}
