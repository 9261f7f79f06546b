//! Error types for the compositing pipeline
//!
//! The pipeline's failure policy is that nothing here is fatal to a paint:
//! every error is recovered at the boundary of the single paint call that
//! triggered it, and manifests as "effect not applied". The types below exist
//! so that callers can tell the recovery cases apart — a percentage length
//! that could not be resolved is a different situation from a filter graph
//! that was rejected for being too large.
//!
//! All errors use the `thiserror` crate for minimal boilerplate and proper
//! error trait implementations.

use crate::resource::ElementId;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
///
/// Each variant wraps a more specific error type for that subsystem.
#[derive(Error, Debug)]
pub enum Error {
  /// Length or rectangle resolution error
  #[error("Resolve error: {0}")]
  Resolve(#[from] ResolveError),

  /// Effect construction or application error
  #[error("Effect error: {0}")]
  Effect(#[from] EffectError),

  /// Offscreen surface allocation error
  #[error("Surface error: {0}")]
  Surface(#[from] SurfaceError),
}

/// Errors from the coordinate resolver
///
/// Percentage and font-relative lengths need ambient context to resolve.
/// A missing context is reported rather than silently substituted, so a
/// caller can distinguish "legitimately zero" from "could not be resolved".
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
  /// Percentage resolution was attempted without a known viewport
  #[error("percentage length cannot be resolved without a viewport")]
  UnresolvedViewport,

  /// An em/ex length was resolved without computed font metrics
  #[error("font-relative length '{unit}' requires resolvable font metrics")]
  MissingFontMetrics { unit: &'static str },

  /// The reference dimension for an inverse conversion is zero
  #[error("cannot convert to '{unit}' units: reference dimension is zero")]
  ZeroReference { unit: &'static str },
}

/// Errors from effect-chain construction and per-pass application
///
/// All of these are recovered by skipping the effect for the current paint;
/// the underlying content still paints per the relevant fallback.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EffectError {
  /// The effect graph's total input count exceeds the fan-in bound
  ///
  /// The whole filter is disabled for the element rather than partially
  /// applied.
  #[error("effect graph too large: {total_inputs} total inputs (limit {limit})")]
  GraphTooLarge { total_inputs: usize, limit: usize },

  /// A source, filter or mask rectangle was empty
  #[error("degenerate geometry: {what}")]
  DegenerateGeometry { what: &'static str },

  /// A resource reference chain re-entered an element already being resolved
  #[error("reference cycle detected while resolving element {element:?}")]
  CycleDetected { element: ElementId },
}

/// Errors from offscreen buffer allocation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
  /// Requested dimensions are zero or overflow the pixel count
  #[error("invalid surface dimensions: {width}x{height}")]
  InvalidDimensions { width: u32, height: u32 },

  /// The backing store would exceed the platform size limit even
  /// after clamping
  #[error("surface allocation of {bytes} bytes exceeds limit ({limit})")]
  AllocationTooLarge { bytes: u64, limit: u64 },

  /// The underlying buffer allocation failed
  #[error("surface allocation failed for {width}x{height}")]
  AllocationFailed { width: u32, height: u32 },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resolve_errors_are_distinct() {
    assert_ne!(
      ResolveError::UnresolvedViewport,
      ResolveError::MissingFontMetrics { unit: "em" }
    );
  }

  #[test]
  fn error_display_includes_context() {
    let err = EffectError::GraphTooLarge {
      total_inputs: 128,
      limit: 100,
    };
    let text = format!("{}", err);
    assert!(text.contains("128"));
    assert!(text.contains("100"));

    let err = SurfaceError::AllocationTooLarge {
      bytes: 1024,
      limit: 512,
    };
    assert!(format!("{}", err).contains("1024"));
  }

  #[test]
  fn subsystem_errors_convert_to_top_level() {
    let err: Error = ResolveError::UnresolvedViewport.into();
    assert!(matches!(err, Error::Resolve(_)));
  }
}
