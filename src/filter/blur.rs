//! Gaussian blur over premultiplied pixel buffers
//!
//! Separable two-pass convolution with a truncated kernel (3 sigma per
//! side), clamping samples at the buffer edge. The horizontal and vertical
//! sigmas are independent because primitive std-deviations resolve per axis
//! in bounding-box units.

use tiny_skia::Pixmap;

pub(crate) fn gaussian_kernel(sigma: f32) -> (Vec<f32>, usize) {
  let radius = (sigma.abs() * 3.0).ceil() as usize;
  if radius == 0 {
    return (Vec::new(), 0);
  }

  let mut kernel = Vec::with_capacity(radius * 2 + 1);
  let sigma_sq = sigma * sigma;
  let factor = 1.0 / (2.0 * std::f32::consts::PI * sigma_sq);
  let mut sum = 0.0;

  for i in 0..=radius * 2 {
    let x = i as f32 - radius as f32;
    let value = factor * (-x * x / (2.0 * sigma_sq)).exp();
    kernel.push(value);
    sum += value;
  }

  // Normalize kernel
  if sum != 0.0 {
    for k in &mut kernel {
      *k /= sum;
    }
  }
  (kernel, radius)
}

/// Blurs a pixmap in place with independent horizontal and vertical sigmas
pub(crate) fn apply_gaussian_blur_anisotropic(pixmap: &mut Pixmap, sigma_x: f32, sigma_y: f32) {
  let width = pixmap.width() as usize;
  let height = pixmap.height() as usize;
  if width == 0 || height == 0 {
    return;
  }

  let mut channels: Vec<[f32; 4]> = pixmap
    .pixels()
    .iter()
    .map(|p| {
      [
        p.red() as f32 / 255.0,
        p.green() as f32 / 255.0,
        p.blue() as f32 / 255.0,
        p.alpha() as f32 / 255.0,
      ]
    })
    .collect();

  let (kernel_x, radius_x) = gaussian_kernel(sigma_x);
  if !kernel_x.is_empty() {
    let mut pass = vec![[0.0; 4]; channels.len()];
    for y in 0..height {
      for x in 0..width {
        let mut accum = [0.0; 4];
        for (i, weight) in kernel_x.iter().enumerate() {
          let offset = i as isize - radius_x as isize;
          let cx = (x as isize + offset).clamp(0, width as isize - 1) as usize;
          let sample = channels[y * width + cx];
          for c in 0..4 {
            accum[c] += sample[c] * weight;
          }
        }
        pass[y * width + x] = accum;
      }
    }
    channels = pass;
  }

  let (kernel_y, radius_y) = gaussian_kernel(sigma_y);
  if !kernel_y.is_empty() {
    let mut pass = vec![[0.0; 4]; channels.len()];
    for y in 0..height {
      for x in 0..width {
        let mut accum = [0.0; 4];
        for (i, weight) in kernel_y.iter().enumerate() {
          let offset = i as isize - radius_y as isize;
          let cy = (y as isize + offset).clamp(0, height as isize - 1) as usize;
          let sample = channels[cy * width + x];
          for c in 0..4 {
            accum[c] += sample[c] * weight;
          }
        }
        pass[y * width + x] = accum;
      }
    }
    channels = pass;
  }

  for (px, vals) in pixmap.pixels_mut().iter_mut().zip(channels.iter()) {
    let a = (vals[3] * 255.0).round().clamp(0.0, 255.0) as u8;
    let clamp_to_alpha = |v: f32| {
      let byte = (v * 255.0).round().clamp(0.0, 255.0) as u8;
      byte.min(a)
    };
    *px = tiny_skia::PremultipliedColorU8::from_rgba(
      clamp_to_alpha(vals[0]),
      clamp_to_alpha(vals[1]),
      clamp_to_alpha(vals[2]),
      a,
    )
    .unwrap_or(tiny_skia::PremultipliedColorU8::TRANSPARENT);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::surface::new_pixmap;

  #[test]
  fn kernel_is_normalized() {
    let (kernel, radius) = gaussian_kernel(2.0);
    assert_eq!(kernel.len(), radius * 2 + 1);
    let sum: f32 = kernel.iter().sum();
    assert!((sum - 1.0).abs() < 1e-4);
  }

  #[test]
  fn zero_sigma_is_a_no_op() {
    let (kernel, radius) = gaussian_kernel(0.0);
    assert!(kernel.is_empty());
    assert_eq!(radius, 0);
  }

  #[test]
  fn blur_spreads_energy_outward() {
    let mut pixmap = new_pixmap(9, 9).unwrap();
    let center = 4 * 9 + 4;
    pixmap.pixels_mut()[center] =
      tiny_skia::PremultipliedColorU8::from_rgba(255, 255, 255, 255).unwrap();

    apply_gaussian_blur_anisotropic(&mut pixmap, 1.5, 1.5);

    let pixels = pixmap.pixels();
    assert!(pixels[center].alpha() < 255);
    assert!(pixels[center - 1].alpha() > 0);
    assert!(pixels[center + 9].alpha() > 0);
  }

  #[test]
  fn anisotropic_blur_respects_axes() {
    let mut pixmap = new_pixmap(9, 9).unwrap();
    let center = 4 * 9 + 4;
    pixmap.pixels_mut()[center] =
      tiny_skia::PremultipliedColorU8::from_rgba(255, 255, 255, 255).unwrap();

    // Horizontal-only blur leaves the vertical neighbors untouched.
    apply_gaussian_blur_anisotropic(&mut pixmap, 1.5, 0.0);

    let pixels = pixmap.pixels();
    assert!(pixels[center - 1].alpha() > 0);
    assert_eq!(pixels[center - 9].alpha(), 0);
  }
}
