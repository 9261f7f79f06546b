//! Per-layer filter pass orchestration
//!
//! One controller lives on each paintable layer that carries a filter. It
//! owns the layer's [`EffectChain`], decides how much source content a pass
//! must capture, redirects drawing into the chain's backing store, and
//! composites the filtered output back into the destination.
//!
//! A pass walks `Idle → Capturing → Applying → Composited → Idle`; the
//! intermediate buffers are always released at pass end to bound peak
//! memory — filters do not retain pixel state between paints.

use crate::canvas::Canvas;
use crate::error::Error;
use crate::filter::{ConsumerKind, EffectChain, FilterDefinition, MAX_TOTAL_EFFECT_INPUTS};
use crate::geometry::{Point, Rect};
use crate::scene::{ColorInterpolation, TargetGeometry};
use crate::units::LengthContext;
use tiny_skia::Transform;
use tracing::{debug, trace};

/// Which geometry regime the layer paints in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterRegime {
  /// Ordinary 2-D box layers: capture rects are pixel-snapped and the
  /// filter scale tracks the device scale factor
  DeviceSnapped,
  /// Nested vector content whose coordinate system is independent of the
  /// device transform: the chain scale stays 1 and the ambient transform
  /// is folded in per pass
  Unsnapped,
}

/// Pass state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassState {
  #[default]
  Idle,
  Capturing,
  Applying,
  Composited,
}

/// Controller for one paintable layer's filter passes
pub struct LayerFilterController {
  chain: Option<EffectChain>,
  regime: FilterRegime,
  state: PassState,
  repaint_rect: Rect,
  paint_offset: Point,
  /// Set when a reference-consumer build failed: the target is hidden
  /// rather than painted unfiltered
  hides_target: bool,
}

impl LayerFilterController {
  pub fn new(regime: FilterRegime) -> Self {
    Self {
      chain: None,
      regime,
      state: PassState::Idle,
      repaint_rect: Rect::ZERO,
      paint_offset: Point::ZERO,
      hides_target: false,
    }
  }

  pub fn regime(&self) -> FilterRegime {
    self.regime
  }

  pub fn state(&self) -> PassState {
    self.state
  }

  pub fn has_filter(&self) -> bool {
    self.chain.as_ref().is_some_and(|c| c.has_effects())
  }

  pub fn has_filter_that_moves_pixels(&self) -> bool {
    self.chain.as_ref().is_some_and(|c| c.moves_pixels())
  }

  /// True when a failed reference build should suppress the target's own
  /// painting instead of letting it through unfiltered
  pub fn hides_target(&self) -> bool {
    self.hides_target
  }

  /// The rect cleared and captured by the current pass
  pub fn repaint_rect(&self) -> Rect {
    self.repaint_rect
  }

  /// Device-space origin the captured content was translated by
  pub fn paint_offset(&self) -> Point {
    self.paint_offset
  }

  pub fn chain(&self) -> Option<&EffectChain> {
    self.chain.as_ref()
  }

  // ==========================================================================
  // Build
  // ==========================================================================

  /// Builds or refreshes the chain for the current effect list
  ///
  /// Rebuild is driven by the style system; scale-only changes keep the
  /// node graph and drop just the intermediate buffers. A failed build
  /// removes the filter in the device-snapped regime, but for a referenced
  /// resource the filter stays "present and empty" and hides the target.
  pub fn build_filter(
    &mut self,
    geometry: &TargetGeometry,
    definition: &FilterDefinition,
    ambient: &LengthContext,
    mut scale: f32,
  ) -> Result<(), Error> {
    let consumer = match self.regime {
      FilterRegime::DeviceSnapped => ConsumerKind::LayerStyle,
      FilterRegime::Unsnapped => ConsumerKind::ResourceReference,
    };
    if self.regime == FilterRegime::Unsnapped {
      // Device scaling is folded in via the absolute transform per pass.
      scale = 1.0;
    }

    if let Some(chain) = &mut self.chain {
      // Transform-only churn keeps the topology; the unsnapped regime
      // cannot compare ambient transforms until the pass starts, so it
      // always drops intermediates here.
      let scale_changed = chain.set_filter_scale(scale);
      if !scale_changed && self.regime == FilterRegime::Unsnapped {
        chain.clear_intermediate_results();
      }
    }

    match EffectChain::build(geometry, definition, ambient, consumer, scale) {
      Ok(chain) => {
        self.chain = Some(chain);
        self.hides_target = false;
        Ok(())
      }
      Err(err) => {
        debug!(%err, "filter build failed");
        self.chain = None;
        self.hides_target = self.regime == FilterRegime::Unsnapped;
        Err(err)
      }
    }
  }

  // ==========================================================================
  // Pass
  // ==========================================================================

  /// Starts a filter pass and returns the capture canvas
  ///
  /// `box_rect` is the filter box in user units, `target_rect` the full
  /// source rect, `dirty_rect` the invalidated area and
  /// `layer_repaint_rect` the layer's accumulated repaint area. Returns
  /// `None` — cannot composite — for an empty graph, degenerate geometry,
  /// or a backing store that cannot be allocated even after clamping; the
  /// caller paints the layer unfiltered (or not at all when
  /// [`Self::hides_target`] says so).
  ///
  /// On success the returned canvas is translated, scaled and cleared so
  /// that the layer paints itself in ordinary user units.
  pub fn begin_pass(
    &mut self,
    destination: &Canvas,
    box_rect: Rect,
    target_rect: Rect,
    dirty_rect: Rect,
    layer_repaint_rect: Rect,
  ) -> Option<&mut Canvas> {
    debug_assert_eq!(self.state, PassState::Idle, "begin_pass while mid-pass");
    let regime = self.regime;
    let chain = self.chain.as_mut()?;
    if !chain.has_effects() {
      return None;
    }
    if chain.last_total_input_count() > MAX_TOTAL_EFFECT_INPUTS {
      return None;
    }

    let source_rect = chain.source_image_rect_for_dirty_rect(target_rect, dirty_rect);
    if source_rect.is_empty() {
      trace!("skipping filter pass: empty source rect");
      return None;
    }

    if regime == FilterRegime::Unsnapped {
      // Track the ambient transform's scale so the backing store matches
      // the device resolution of the destination.
      let ctm = destination.transform();
      let absolute = Transform::from_scale(scale_component(ctm.sx, ctm.ky), scale_component(ctm.sy, ctm.kx));
      chain.set_absolute_transform(absolute);
    }

    let updated_backing = chain.update_backing_store_rect(source_rect);
    chain.prepare_absolute_geometry().ok()?;
    chain.set_filter_region(match regime {
      FilterRegime::Unsnapped => box_rect,
      FilterRegime::DeviceSnapped => source_rect,
    });

    self.repaint_rect = if !chain.moves_pixels() {
      dirty_rect
    } else if updated_backing {
      source_rect
    } else {
      dirty_rect
        .union(layer_repaint_rect)
        .intersection_or_empty(source_rect)
    };
    self.paint_offset = chain.paint_origin();

    chain.determine_primitive_subregions();

    if chain.filter_region().is_empty() {
      return None;
    }

    let color_space = match regime {
      FilterRegime::Unsnapped => ColorInterpolation::LinearRgb,
      FilterRegime::DeviceSnapped => ColorInterpolation::Srgb,
    };
    chain.allocate_backing_store_if_needed(color_space).ok()?;

    let buffer_transform = chain.buffer_transform();
    let repaint_rect = self.repaint_rect;
    let capture = chain.input_canvas()?;

    // Redirect drawing into the offscreen buffer: the layer keeps painting
    // in user units while pixels land in clamped device space.
    capture.save();
    capture.set_transform(buffer_transform);
    capture.clear_rect(repaint_rect);
    if regime == FilterRegime::DeviceSnapped {
      capture.clip_rect(repaint_rect);
    }

    self.state = PassState::Capturing;
    trace!(?repaint_rect, "filter pass capturing");
    Some(capture)
  }

  /// Finishes the pass: applies the chain and composites the output
  ///
  /// Restores the capture canvas state, runs the graph, draws the result
  /// into `destination` at the inverse of the capture transform, and
  /// releases the intermediate buffers.
  pub fn end_pass(&mut self, destination: &mut Canvas) {
    debug_assert_eq!(self.state, PassState::Capturing, "end_pass without begin");
    let Some(chain) = self.chain.as_mut() else {
      self.state = PassState::Idle;
      return;
    };
    self.state = PassState::Applying;

    if let Some(capture) = chain.input_canvas() {
      capture.restore();
    }
    chain.apply();
    self.state = PassState::Composited;

    if let Some(output) = chain.output() {
      let output_pixmap = output.pixmap.clone();
      let origin = chain.paint_origin();
      let resolution = chain.filter_resolution();
      let absolute = chain.absolute_transform();

      destination.save();
      // The output buffer lives in clamped device space; undo the capture
      // mapping so it lands back under the layer's own transform.
      match self.regime {
        FilterRegime::Unsnapped => {
          let inverse = absolute.invert().unwrap_or(Transform::identity());
          destination.concat_transform(inverse);
          destination.scale(1.0 / resolution.0, 1.0 / resolution.1);
          destination.draw_pixmap(origin, &output_pixmap, 1.0);
        }
        FilterRegime::DeviceSnapped => {
          let scale = chain.filter_scale() * resolution.0;
          if scale != 0.0 {
            destination.scale(1.0 / scale, 1.0 / scale);
          }
          destination.draw_pixmap(origin, &output_pixmap, 1.0);
        }
      }
      destination.restore();
    }

    // Peak memory is bounded by dropping node buffers every pass.
    chain.clear_intermediate_results();
    self.state = PassState::Idle;
    trace!("filter pass composited");
  }
}

impl std::fmt::Debug for LayerFilterController {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LayerFilterController")
      .field("regime", &self.regime)
      .field("state", &self.state)
      .field("has_filter", &self.has_filter())
      .finish()
  }
}

fn scale_component(scale: f32, skew: f32) -> f32 {
  (scale * scale + skew * skew).sqrt()
}
