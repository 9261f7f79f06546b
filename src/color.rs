//! Color values used by effect parameters
//!
//! Effect parameters (flood colors, drop-shadow colors) carry plain sRGB
//! values; color-space conversion for filter math happens at the buffer
//! level in [`crate::surface`].

/// An RGBA color with 8-bit channels and floating-point alpha
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
  /// Red component (0-255)
  pub r: u8,
  /// Green component (0-255)
  pub g: u8,
  /// Blue component (0-255)
  pub b: u8,
  /// Alpha component (0.0-1.0)
  pub a: f32,
}

impl Rgba {
  /// Fully transparent black
  pub const TRANSPARENT: Self = Self {
    r: 0,
    g: 0,
    b: 0,
    a: 0.0,
  };

  /// Opaque black
  pub const BLACK: Self = Self {
    r: 0,
    g: 0,
    b: 0,
    a: 1.0,
  };

  /// Opaque white
  pub const WHITE: Self = Self {
    r: 255,
    g: 255,
    b: 255,
    a: 1.0,
  };

  /// Creates a color from channel values
  pub const fn new(r: u8, g: u8, b: u8, a: f32) -> Self {
    Self { r, g, b, a }
  }

  /// Returns this color with its alpha multiplied by `opacity`
  pub fn with_opacity(self, opacity: f32) -> Self {
    Self {
      a: (self.a * opacity).clamp(0.0, 1.0),
      ..self
    }
  }

  /// Converts to a premultiplied tiny-skia pixel
  pub(crate) fn to_premultiplied(self) -> tiny_skia::PremultipliedColorU8 {
    let a = self.a.clamp(0.0, 1.0);
    let premul = |v: u8| ((v as f32 * a).round().clamp(0.0, 255.0)) as u8;
    tiny_skia::PremultipliedColorU8::from_rgba(
      premul(self.r),
      premul(self.g),
      premul(self.b),
      (a * 255.0).round() as u8,
    )
    .unwrap_or(tiny_skia::PremultipliedColorU8::TRANSPARENT)
  }

  /// Converts to a tiny-skia color
  pub(crate) fn to_skia(self) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba8(self.r, self.g, self.b, (self.a.clamp(0.0, 1.0) * 255.0) as u8)
  }
}
