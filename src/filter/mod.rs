//! Effect-chain construction and execution
//!
//! A style-declared list of effect operations becomes a directed acyclic
//! graph of [`EffectNode`]s: inputs are resolved by name or implicit
//! chaining at build time, so node indices are topological by construction.
//! The chain owns the shared backing store the source content is captured
//! into, sizes it under the device limits in [`crate::surface`], and runs
//! the primitive leaf operations in dependency order.
//!
//! Chains are created lazily on first filter application for a layer,
//! rebuilt when the operation list changes, and keep their node topology
//! (dropping only the intermediate buffers) on transform-only changes.

mod blur;
mod primitives;

pub mod layer;

pub use primitives::{
  ChannelSelector, ColorMatrixKind, CompositeOperator, InputArity, NodeOutput, Primitive,
  TransferFn,
};

use crate::canvas::Canvas;
use crate::error::{EffectError, Error, ResolveError, SurfaceError};
use crate::geometry::{Point, Rect, Size};
use crate::scene::{ColorInterpolation, TargetGeometry};
use crate::surface::{clamped_size, size_needs_clamping};
use crate::units::{resolve_rectangle, LengthContext, LengthMode, LengthValue, UnitSpace};
use primitives::clip_pixmap_to_region;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tiny_skia::Transform;
use tracing::{debug, trace};

/// Fan-in bound on the whole graph
///
/// Total input counts grow combinatorially through merge/tile diamonds;
/// a graph past this bound is rejected outright and the filter disabled
/// for the element, capping worst-case recompute cost.
pub const MAX_TOTAL_EFFECT_INPUTS: usize = 100;

/// A style-declared input to an effect operation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InputRef {
  /// The captured source content
  SourceGraphic,
  /// The alpha channel of the captured source content
  SourceAlpha,
  /// The previous operation's output (or the source for the first one)
  #[default]
  Previous,
  /// A named result of an earlier operation; unresolved names fall back
  /// to the source graphic
  Reference(String),
}

/// Per-component subregion override declared on an operation
///
/// `None` components keep the default (the union of the inputs' regions).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RegionSpec {
  pub x: Option<LengthValue>,
  pub y: Option<LengthValue>,
  pub width: Option<LengthValue>,
  pub height: Option<LengthValue>,
}

/// Declared filter region: all four components plus their unit space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterRegion {
  pub x: LengthValue,
  pub y: LengthValue,
  pub width: LengthValue,
  pub height: LengthValue,
  pub units: UnitSpace,
}

impl FilterRegion {
  /// The specification default: -10%/-10%/120%/120% of the target
  pub fn default_for(units: UnitSpace) -> Self {
    Self {
      x: LengthValue::Percent(-10.0),
      y: LengthValue::Percent(-10.0),
      width: LengthValue::Percent(120.0),
      height: LengthValue::Percent(120.0),
      units,
    }
  }

  /// Resolves the region against the target's bounding box or the ambient
  /// viewport, per the declared unit space
  pub fn resolve(
    &self,
    ambient: &LengthContext,
    target_bounding_box: Rect,
  ) -> Result<Rect, ResolveError> {
    resolve_rectangle(
      self.units,
      ambient,
      target_bounding_box,
      self.x,
      self.y,
      self.width,
      self.height,
    )
  }
}

/// One entry in a style-declared effect-operation list
#[derive(Debug, Clone, PartialEq)]
pub struct EffectOperation {
  pub primitive: Primitive,
  pub inputs: SmallVec<[InputRef; 2]>,
  /// Name later operations can reference this output by
  pub result: Option<String>,
  pub subregion: Option<RegionSpec>,
  /// Per-operation color-space override
  pub color_interpolation: Option<ColorInterpolation>,
}

impl EffectOperation {
  pub fn new(primitive: Primitive) -> Self {
    Self {
      primitive,
      inputs: SmallVec::new(),
      result: None,
      subregion: None,
      color_interpolation: None,
    }
  }

  pub fn with_input(mut self, input: InputRef) -> Self {
    self.inputs.push(input);
    self
  }

  pub fn with_result(mut self, name: impl Into<String>) -> Self {
    self.result = Some(name.into());
    self
  }

  pub fn with_subregion(mut self, subregion: RegionSpec) -> Self {
    self.subregion = Some(subregion);
    self
  }
}

/// A filter resource as declared in the scene: the operation list plus
/// region and unit-space attributes
///
/// This is the shared definition clients reference; per-layer state lives
/// in the [`EffectChain`] built from it.
#[derive(Debug, Clone)]
pub struct FilterDefinition {
  pub operations: Vec<EffectOperation>,
  pub region: FilterRegion,
  pub primitive_units: UnitSpace,
  pub color_interpolation: ColorInterpolation,
}

impl FilterDefinition {
  pub fn new(operations: Vec<EffectOperation>) -> Self {
    Self {
      operations,
      region: FilterRegion::default_for(UnitSpace::ObjectBoundingBox),
      primitive_units: UnitSpace::UserSpaceOnUse,
      color_interpolation: ColorInterpolation::LinearRgb,
    }
  }

  /// Resolves the declared filter region for a target
  pub fn resolve_region(
    &self,
    ambient: &LengthContext,
    target_bounding_box: Rect,
  ) -> Result<Rect, ResolveError> {
    self.region.resolve(ambient, target_bounding_box)
  }
}

/// What kind of consumer drives the chain
///
/// A chain built for a style property that fails to build is dropped and
/// the target paints unfiltered; a chain built for a referenced resource
/// that is "valid but empty" hides the target instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerKind {
  /// Style-declared filter list on an ordinary layer
  LayerStyle,
  /// Reference to a filter resource from vector content
  ResourceReference,
}

/// A resolved input edge: one of the two synthetic sources or an earlier
/// node by index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeInput {
  Graphic,
  Alpha,
  Node(usize),
}

/// One primitive in the built graph
#[derive(Debug)]
pub struct EffectNode {
  primitive: Primitive,
  inputs: SmallVec<[NodeInput; 2]>,
  /// Declared overrides, resolved to user units at build time
  declared_subregion: [Option<f32>; 4],
  /// Resolved subregion in user units (filter-local)
  subregion: Rect,
  /// 1 + the totals of every input edge; shared inputs count per edge
  total_inputs: usize,
  color_interpolation: ColorInterpolation,
  output: Option<NodeOutput>,
}

impl EffectNode {
  pub fn subregion(&self) -> Rect {
    self.subregion
  }

  pub fn total_inputs(&self) -> usize {
    self.total_inputs
  }
}

/// A built effect graph plus its working rectangles and backing store
pub struct EffectChain {
  nodes: Vec<EffectNode>,
  consumer: ConsumerKind,
  primitive_units: UnitSpace,
  target_bounding_box: Rect,
  /// Region bounding all filter computation, user units
  filter_region: Rect,
  /// Source drawing region, user units
  source_rect: Rect,
  /// Device scale factor folded in at build time
  filter_scale: f32,
  /// Clamping scale applied when device limits would be exceeded
  filter_resolution: (f32, f32),
  /// Scale-only transform to absolute space for the unsnapped regime
  absolute_transform: Transform,
  /// Clamped, integer-aligned source rect in device space
  absolute_source_rect: Rect,
  backing: Option<Canvas>,
  backing_color_space: ColorInterpolation,
}

impl EffectChain {
  /// Builds the node graph from a declared operation list
  ///
  /// Fails with [`EffectError::GraphTooLarge`] when the graph's total input
  /// count exceeds [`MAX_TOTAL_EFFECT_INPUTS`]; the caller must suppress
  /// the whole filter, not apply a prefix of it.
  pub fn build(
    geometry: &TargetGeometry,
    definition: &FilterDefinition,
    ambient: &LengthContext,
    consumer: ConsumerKind,
    scale: f32,
  ) -> Result<EffectChain, Error> {
    let bbox = geometry.object_bounding_box;
    let filter_region = definition.resolve_region(ambient, bbox)?;

    let mut nodes: Vec<EffectNode> = Vec::with_capacity(definition.operations.len());
    let mut named: FxHashMap<&str, usize> = FxHashMap::default();
    let mut previous: Option<usize> = None;

    for operation in &definition.operations {
      let arity = operation.primitive.input_arity();
      let mut inputs: SmallVec<[NodeInput; 2]> = SmallVec::new();

      let declared = |index: usize| operation.inputs.get(index).cloned().unwrap_or_default();
      let resolve = |input: InputRef| -> NodeInput {
        match input {
          InputRef::SourceGraphic => NodeInput::Graphic,
          InputRef::SourceAlpha => NodeInput::Alpha,
          InputRef::Previous => previous.map(NodeInput::Node).unwrap_or(NodeInput::Graphic),
          InputRef::Reference(name) => named
            .get(name.as_str())
            .map(|idx| NodeInput::Node(*idx))
            .unwrap_or(NodeInput::Graphic),
        }
      };

      match arity {
        InputArity::None => {}
        InputArity::One => inputs.push(resolve(declared(0))),
        InputArity::Two => {
          inputs.push(resolve(declared(0)));
          inputs.push(resolve(declared(1)));
        }
        InputArity::Variadic => {
          for input in &operation.inputs {
            inputs.push(resolve(input.clone()));
          }
          if inputs.is_empty() {
            inputs.push(resolve(InputRef::Previous));
          }
        }
      }

      let total_inputs = 1
        + inputs
          .iter()
          .map(|input| match input {
            NodeInput::Graphic | NodeInput::Alpha => 1,
            NodeInput::Node(idx) => nodes[*idx].total_inputs,
          })
          .sum::<usize>();

      let declared_subregion =
        resolve_subregion_spec(operation.subregion, definition.primitive_units, ambient, bbox)?;

      let index = nodes.len();
      nodes.push(EffectNode {
        primitive: operation.primitive.clone(),
        inputs,
        declared_subregion,
        subregion: filter_region,
        total_inputs,
        color_interpolation: operation
          .color_interpolation
          .unwrap_or(definition.color_interpolation),
        output: None,
      });
      if let Some(name) = &operation.result {
        named.insert(name.as_str(), index);
      }
      previous = Some(index);
    }

    let worst_total = nodes.iter().map(|n| n.total_inputs).max().unwrap_or(0);
    if worst_total > MAX_TOTAL_EFFECT_INPUTS {
      debug!(worst_total, "rejecting effect graph over input bound");
      return Err(
        EffectError::GraphTooLarge {
          total_inputs: worst_total,
          limit: MAX_TOTAL_EFFECT_INPUTS,
        }
        .into(),
      );
    }

    Ok(EffectChain {
      nodes,
      consumer,
      primitive_units: definition.primitive_units,
      target_bounding_box: bbox,
      filter_region,
      source_rect: Rect::ZERO,
      filter_scale: scale,
      filter_resolution: (1.0, 1.0),
      absolute_transform: Transform::identity(),
      absolute_source_rect: Rect::ZERO,
      backing: None,
      backing_color_space: ColorInterpolation::Srgb,
    })
  }

  // ==========================================================================
  // Inspection
  // ==========================================================================

  pub fn has_effects(&self) -> bool {
    !self.nodes.is_empty()
  }

  pub fn nodes(&self) -> &[EffectNode] {
    &self.nodes
  }

  pub fn consumer(&self) -> ConsumerKind {
    self.consumer
  }

  /// Total input count of the terminal node
  pub fn last_total_input_count(&self) -> usize {
    self.nodes.last().map(|n| n.total_inputs).unwrap_or(0)
  }

  /// True when any node can sample outside its input's bounds
  pub fn moves_pixels(&self) -> bool {
    self.nodes.iter().any(|n| n.primitive.moves_pixels())
  }

  pub fn filter_region(&self) -> Rect {
    self.filter_region
  }

  pub fn source_rect(&self) -> Rect {
    self.source_rect
  }

  pub fn filter_scale(&self) -> f32 {
    self.filter_scale
  }

  pub fn filter_resolution(&self) -> (f32, f32) {
    self.filter_resolution
  }

  pub fn absolute_transform(&self) -> Transform {
    self.absolute_transform
  }

  /// The clamped device-space rect the backing store covers
  pub fn absolute_source_rect(&self) -> Rect {
    self.absolute_source_rect
  }

  /// Device-space origin of the backing store
  pub fn paint_origin(&self) -> Point {
    self.absolute_source_rect.origin
  }

  // ==========================================================================
  // Working rectangles
  // ==========================================================================

  /// Sets the filter scale, clearing intermediates when it changes
  pub fn set_filter_scale(&mut self, scale: f32) -> bool {
    if self.filter_scale == scale {
      return false;
    }
    self.filter_scale = scale;
    self.clear_intermediate_results();
    true
  }

  /// Updates the filter region
  ///
  /// Shrinking below the previous extent along a changed dimension drops
  /// intermediate buffers: their pixels extend past the new region and
  /// would leak stale coverage into a smaller surface.
  pub fn set_filter_region(&mut self, rect: Rect) {
    if rect == self.filter_region {
      return;
    }
    let width_shrank = rect.width() < self.filter_region.width();
    let height_shrank = rect.height() < self.filter_region.height();
    let width_changed = rect.width() != self.filter_region.width();
    let height_changed = rect.height() != self.filter_region.height();
    self.filter_region = rect;
    if (width_changed && width_shrank) || (height_changed && height_shrank) {
      self.clear_intermediate_results();
    }
  }

  /// Adopts a new source rect, dropping the backing store when it changed
  ///
  /// Returns true when the backing store was invalidated.
  pub fn update_backing_store_rect(&mut self, source_rect: Rect) -> bool {
    if self.backing.is_some() && source_rect == self.source_rect {
      return false;
    }
    self.source_rect = source_rect;
    self.backing = None;
    self.clear_intermediate_results();
    true
  }

  /// Sets the clamping resolution, clearing intermediates when it changes
  pub fn set_filter_resolution(&mut self, resolution: (f32, f32)) -> bool {
    if self.filter_resolution == resolution {
      return false;
    }
    self.filter_resolution = resolution;
    self.clear_intermediate_results();
    true
  }

  /// Sets the absolute transform, clearing intermediates when it changes
  pub fn set_absolute_transform(&mut self, transform: Transform) -> bool {
    if self.absolute_transform == transform {
      return false;
    }
    self.absolute_transform = transform;
    self.clear_intermediate_results();
    true
  }

  /// The capture rect for a dirty rect: pixel-moving chains must capture
  /// the full source rect because output pixels can sample anywhere in it
  pub fn source_image_rect_for_dirty_rect(&self, target_rect: Rect, dirty_rect: Rect) -> Rect {
    if self.moves_pixels() {
      target_rect
    } else {
      dirty_rect.intersection_or_empty(target_rect)
    }
  }

  /// Recomputes the clamped device-space source rect and the resolution
  ///
  /// The single-step clamp scales uniformly so the longest side of the
  /// allocation lands within [`crate::surface::MAX_SURFACE_DIMENSION`];
  /// integer alignment can push the rect one pixel over, which gets one
  /// corrective pass.
  pub fn prepare_absolute_geometry(&mut self) -> Result<(), EffectError> {
    let base = self.user_to_absolute();
    let absolute = self.source_rect.map(base).enclosing_int_rect();
    if absolute.is_empty() || !absolute.is_finite() {
      return Err(EffectError::DegenerateGeometry {
        what: "absolute source rect",
      });
    }

    let (_, clamp) = clamped_size(Size::new(absolute.width(), absolute.height()));
    let mut resolution = (clamp, clamp);
    let mut clamped = absolute.scale(clamp).enclosing_int_rect();
    if size_needs_clamping(clamped.size) {
      let (_, extra) = clamped_size(clamped.size);
      resolution = (resolution.0 * extra, resolution.1 * extra);
      clamped = absolute.scale(resolution.0).enclosing_int_rect();
    }

    self.set_filter_resolution(resolution);
    self.absolute_source_rect = clamped;
    Ok(())
  }

  /// Transform from user units into unclamped absolute device space
  fn user_to_absolute(&self) -> Transform {
    self
      .absolute_transform
      .post_scale(self.filter_scale, self.filter_scale)
  }

  /// Transform from user units into backing-buffer coordinates
  pub fn buffer_transform(&self) -> Transform {
    let origin = self.absolute_source_rect.origin;
    self
      .user_to_absolute()
      .post_scale(self.filter_resolution.0, self.filter_resolution.1)
      .post_translate(-origin.x, -origin.y)
  }

  // ==========================================================================
  // Subregions
  // ==========================================================================

  /// Resolves every node's primitive subregion
  ///
  /// A node's subregion defaults to the union of its inputs' subregions
  /// (synthetic sources contribute the filter region), overridden per
  /// component by the declared x/y/width/height, and clamped to the
  /// overall filter region.
  pub fn determine_primitive_subregions(&mut self) {
    for index in 0..self.nodes.len() {
      let mut region = if self.nodes[index].inputs.is_empty() {
        self.filter_region
      } else {
        let mut union = Rect::ZERO;
        for input in self.nodes[index].inputs.clone() {
          let contribution = match input {
            NodeInput::Graphic | NodeInput::Alpha => self.filter_region,
            NodeInput::Node(j) => self.nodes[j].subregion,
          };
          union = union.union(contribution);
        }
        union
      };

      let [x, y, width, height] = self.nodes[index].declared_subregion;
      if let Some(x) = x {
        region.origin.x = x;
      }
      if let Some(y) = y {
        region.origin.y = y;
      }
      if let Some(width) = width {
        region.size.width = width;
      }
      if let Some(height) = height {
        region.size.height = height;
      }

      self.nodes[index].subregion = region.intersection_or_empty(self.filter_region);
    }
  }

  // ==========================================================================
  // Backing store
  // ==========================================================================

  /// Allocates (or reuses) the backing store sized to the clamped
  /// absolute source rect
  pub fn allocate_backing_store_if_needed(
    &mut self,
    color_space: ColorInterpolation,
  ) -> Result<(), SurfaceError> {
    let width = self.absolute_source_rect.width().max(0.0) as u32;
    let height = self.absolute_source_rect.height().max(0.0) as u32;
    let reusable = self
      .backing
      .as_ref()
      .is_some_and(|c| c.width() == width && c.height() == height)
      && self.backing_color_space == color_space;
    if reusable {
      return Ok(());
    }
    self.backing = Some(Canvas::new(width, height)?);
    self.backing_color_space = color_space;
    Ok(())
  }

  /// The capture canvas drawing redirects into, if allocated
  pub fn input_canvas(&mut self) -> Option<&mut Canvas> {
    self.backing.as_mut()
  }

  pub fn backing_color_space(&self) -> ColorInterpolation {
    self.backing_color_space
  }

  // ==========================================================================
  // Execution
  // ==========================================================================

  /// Runs every node in dependency order
  ///
  /// Node indices are topological by construction, so a single forward
  /// pass sees each shared input evaluated exactly once; diamonds reuse
  /// the cached [`NodeOutput`].
  pub fn apply(&mut self) {
    let Some(backing) = &self.backing else {
      return;
    };
    trace!(nodes = self.nodes.len(), "applying effect chain");

    let buffer_t = self.buffer_transform();
    let buffer_bounds = Rect::from_xywh(
      0.0,
      0.0,
      backing.width() as f32,
      backing.height() as f32,
    );
    let filter_region_dev = self
      .filter_region
      .map(buffer_t)
      .intersection_or_empty(buffer_bounds);
    let source_region_dev = buffer_bounds.intersection_or_empty(filter_region_dev);
    let source_pixmap = backing.pixmap().clone();

    for index in 0..self.nodes.len() {
      if self.nodes[index].output.is_some() {
        continue;
      }

      let subregion_dev = self.nodes[index]
        .subregion
        .map(buffer_t)
        .intersection_or_empty(filter_region_dev);
      if subregion_dev.is_empty() || !subregion_dev.is_finite() {
        if let Ok(blank) =
          crate::surface::new_pixmap(source_pixmap.width(), source_pixmap.height())
        {
          self.nodes[index].output = Some(NodeOutput::new(blank, Rect::ZERO));
        }
        continue;
      }

      let gather = |input: NodeInput| -> Option<NodeOutput> {
        match input {
          NodeInput::Graphic => Some(NodeOutput::new(source_pixmap.clone(), source_region_dev)),
          NodeInput::Alpha => {
            let mut alpha = source_pixmap.clone();
            for px in alpha.pixels_mut() {
              *px = tiny_skia::PremultipliedColorU8::from_rgba(0, 0, 0, px.alpha())
                .unwrap_or(tiny_skia::PremultipliedColorU8::TRANSPARENT);
            }
            Some(NodeOutput::new(alpha, source_region_dev))
          }
          NodeInput::Node(j) => self.nodes[j].output.clone(),
        }
      };

      let inputs: Option<Vec<NodeOutput>> =
        self.nodes[index].inputs.iter().map(|i| gather(*i)).collect();
      let Some(inputs) = inputs else {
        continue;
      };

      let produced = self.run_primitive(index, inputs, subregion_dev);
      if let Some(mut out) = produced {
        out.region = out.region.intersection_or_empty(subregion_dev);
        clip_pixmap_to_region(&mut out.pixmap, subregion_dev);
        self.nodes[index].output = Some(out);
      }
    }
  }

  fn run_primitive(
    &self,
    index: usize,
    mut inputs: Vec<NodeOutput>,
    subregion_dev: Rect,
  ) -> Option<NodeOutput> {
    let node = &self.nodes[index];
    let (scale_x, scale_y) = self.device_scale();
    let bbox = &self.target_bounding_box;
    let backing = self.backing.as_ref()?;

    match &node.primitive {
      Primitive::Flood { color, opacity } => primitives::flood(
        backing.width(),
        backing.height(),
        *color,
        *opacity,
        subregion_dev,
      ),
      Primitive::Blur { std_dev } => {
        let (sx, sy) = self.resolve_primitive_pair(*std_dev, bbox);
        Some(primitives::blur(
          inputs.pop()?,
          sx * scale_x,
          sy * scale_y,
        ))
      }
      Primitive::Offset { dx, dy } => primitives::offset(
        inputs.pop()?,
        self.resolve_primitive_x(*dx, bbox) * scale_x,
        self.resolve_primitive_y(*dy, bbox) * scale_y,
      ),
      Primitive::ColorMatrix { kind } => Some(primitives::color_matrix(
        inputs.pop()?,
        kind,
        node.color_interpolation,
      )),
      Primitive::Composite { operator } => {
        let in2 = inputs.pop()?;
        let in1 = inputs.pop()?;
        primitives::composite(in1, in2, *operator)
      }
      Primitive::Merge => primitives::merge(inputs),
      Primitive::Blend { mode } => {
        let in2 = inputs.pop()?;
        let in1 = inputs.pop()?;
        Some(primitives::blend(in1, in2, *mode))
      }
      Primitive::Tile => primitives::tile(inputs.pop()?, subregion_dev),
      Primitive::DropShadow {
        dx,
        dy,
        std_dev,
        color,
        opacity,
      } => {
        let (sx, sy) = self.resolve_primitive_pair(*std_dev, bbox);
        primitives::drop_shadow(
          inputs.pop()?,
          self.resolve_primitive_x(*dx, bbox) * scale_x,
          self.resolve_primitive_y(*dy, bbox) * scale_y,
          (sx * scale_x, sy * scale_y),
          *color,
          *opacity,
        )
      }
      Primitive::DisplacementMap {
        scale,
        x_channel,
        y_channel,
      } => {
        let in2 = inputs.pop()?;
        let in1 = inputs.pop()?;
        primitives::displacement_map(
          in1,
          in2,
          self.resolve_primitive_scalar(*scale, bbox) * scale_x,
          *x_channel,
          *y_channel,
        )
      }
      Primitive::ComponentTransfer { r, g, b, a } => Some(primitives::component_transfer(
        inputs.pop()?,
        r,
        g,
        b,
        a,
        node.color_interpolation,
      )),
    }
  }

  fn device_scale(&self) -> (f32, f32) {
    let t = self.user_to_absolute();
    (
      t.sx * self.filter_resolution.0,
      t.sy * self.filter_resolution.1,
    )
  }

  fn resolve_primitive_x(&self, value: f32, bbox: &Rect) -> f32 {
    match self.primitive_units {
      UnitSpace::UserSpaceOnUse => value,
      UnitSpace::ObjectBoundingBox => value * bbox.width().abs(),
    }
  }

  fn resolve_primitive_y(&self, value: f32, bbox: &Rect) -> f32 {
    match self.primitive_units {
      UnitSpace::UserSpaceOnUse => value,
      UnitSpace::ObjectBoundingBox => value * bbox.height().abs(),
    }
  }

  fn resolve_primitive_scalar(&self, value: f32, bbox: &Rect) -> f32 {
    match self.primitive_units {
      UnitSpace::UserSpaceOnUse => value,
      UnitSpace::ObjectBoundingBox => value * (bbox.width().abs() + bbox.height().abs()) * 0.5,
    }
  }

  fn resolve_primitive_pair(&self, values: (f32, f32), bbox: &Rect) -> (f32, f32) {
    if (values.0 - values.1).abs() < f32::EPSILON {
      let scalar = self.resolve_primitive_scalar(values.0, bbox);
      return (scalar, scalar);
    }
    (
      self.resolve_primitive_x(values.0, bbox),
      self.resolve_primitive_y(values.1, bbox),
    )
  }

  // ==========================================================================
  // Results
  // ==========================================================================

  /// The terminal node's output buffer, if `apply` has run
  pub fn output(&self) -> Option<&NodeOutput> {
    self.nodes.last().and_then(|n| n.output.as_ref())
  }

  /// The terminal node's content region in backing-buffer coordinates
  pub fn output_rect(&self) -> Rect {
    self
      .output()
      .map(|out| out.region)
      .unwrap_or(Rect::ZERO)
  }

  /// Drops every node's output buffer, keeping the graph topology and
  /// the backing store
  ///
  /// Idempotent: a second call leaves the chain in the same state.
  pub fn clear_intermediate_results(&mut self) {
    for node in &mut self.nodes {
      node.output = None;
    }
  }
}

impl std::fmt::Debug for EffectChain {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EffectChain")
      .field("nodes", &self.nodes.len())
      .field("filter_region", &self.filter_region)
      .field("source_rect", &self.source_rect)
      .field("filter_resolution", &self.filter_resolution)
      .finish()
  }
}

fn resolve_subregion_spec(
  spec: Option<RegionSpec>,
  units: UnitSpace,
  ambient: &LengthContext,
  bbox: Rect,
) -> Result<[Option<f32>; 4], Error> {
  let Some(spec) = spec else {
    return Ok([None; 4]);
  };
  let resolve = |value: Option<LengthValue>,
                 mode: LengthMode,
                 origin: f32,
                 extent: f32,
                 positional: bool|
   -> Result<Option<f32>, Error> {
    let Some(value) = value else {
      return Ok(None);
    };
    let resolved = match units {
      UnitSpace::UserSpaceOnUse => ambient.resolve(value, mode)?,
      UnitSpace::ObjectBoundingBox => {
        let fraction = match value {
          LengthValue::Percent(p) => p / 100.0,
          LengthValue::Number(v) | LengthValue::Px(v) => v,
          other => ambient.resolve(other, mode)?,
        };
        if positional {
          origin + fraction * extent
        } else {
          fraction * extent
        }
      }
    };
    Ok(Some(resolved))
  };

  Ok([
    resolve(spec.x, LengthMode::Width, bbox.x(), bbox.width(), true)?,
    resolve(spec.y, LengthMode::Height, bbox.y(), bbox.height(), true)?,
    resolve(spec.width, LengthMode::Width, bbox.x(), bbox.width(), false)?,
    resolve(spec.height, LengthMode::Height, bbox.y(), bbox.height(), false)?,
  ])
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::color::Rgba;

  fn geometry(bounds: Rect) -> TargetGeometry {
    TargetGeometry::from_bounds(bounds)
  }

  fn simple_blur_definition() -> FilterDefinition {
    FilterDefinition {
      operations: vec![EffectOperation::new(Primitive::Blur {
        std_dev: (2.0, 2.0),
      })],
      region: FilterRegion::default_for(UnitSpace::ObjectBoundingBox),
      primitive_units: UnitSpace::UserSpaceOnUse,
      color_interpolation: ColorInterpolation::Srgb,
    }
  }

  fn build_chain(definition: &FilterDefinition, bounds: Rect) -> EffectChain {
    EffectChain::build(
      &geometry(bounds),
      definition,
      &LengthContext::without_viewport(),
      ConsumerKind::LayerStyle,
      1.0,
    )
    .expect("chain builds")
  }

  #[test]
  fn build_resolves_default_filter_region() {
    let chain = build_chain(&simple_blur_definition(), Rect::from_xywh(0.0, 0.0, 100.0, 100.0));
    assert_eq!(
      chain.filter_region(),
      Rect::from_xywh(-10.0, -10.0, 120.0, 120.0)
    );
    assert!(chain.has_effects());
    assert!(chain.moves_pixels());
  }

  #[test]
  fn named_references_resolve_and_unknown_names_fall_back() {
    let definition = FilterDefinition {
      operations: vec![
        EffectOperation::new(Primitive::Flood {
          color: Rgba::BLACK,
          opacity: 1.0,
        })
        .with_result("f"),
        EffectOperation::new(Primitive::Merge)
          .with_input(InputRef::Reference("f".into()))
          .with_input(InputRef::Reference("missing".into())),
      ],
      ..simple_blur_definition()
    };
    let chain = build_chain(&definition, Rect::from_xywh(0.0, 0.0, 10.0, 10.0));
    assert_eq!(
      chain.nodes()[1].inputs.as_slice(),
      [NodeInput::Node(0), NodeInput::Graphic].as_slice()
    );
  }

  #[test]
  fn merge_diamond_grows_total_input_count() {
    // Each merge doubles the running total; a handful stays under the
    // bound, a few more blow past it.
    let mut operations = vec![EffectOperation::new(Primitive::Blur {
      std_dev: (1.0, 1.0),
    })
    .with_result("seed")];
    for i in 0..5 {
      let prev = if i == 0 { "seed".to_string() } else { format!("m{}", i - 1) };
      operations.push(
        EffectOperation::new(Primitive::Merge)
          .with_input(InputRef::Reference(prev.clone()))
          .with_input(InputRef::Reference(prev))
          .with_result(format!("m{i}")),
      );
    }
    let definition = FilterDefinition {
      operations,
      ..simple_blur_definition()
    };
    let chain = build_chain(&definition, Rect::from_xywh(0.0, 0.0, 10.0, 10.0));
    assert!(chain.last_total_input_count() <= MAX_TOTAL_EFFECT_INPUTS);

    // Double past the bound.
    let mut operations = vec![EffectOperation::new(Primitive::Blur {
      std_dev: (1.0, 1.0),
    })
    .with_result("seed")];
    for i in 0..8 {
      let prev = if i == 0 { "seed".to_string() } else { format!("m{}", i - 1) };
      operations.push(
        EffectOperation::new(Primitive::Merge)
          .with_input(InputRef::Reference(prev.clone()))
          .with_input(InputRef::Reference(prev))
          .with_result(format!("m{i}")),
      );
    }
    let definition = FilterDefinition {
      operations,
      ..simple_blur_definition()
    };
    let result = EffectChain::build(
      &geometry(Rect::from_xywh(0.0, 0.0, 10.0, 10.0)),
      &definition,
      &LengthContext::without_viewport(),
      ConsumerKind::LayerStyle,
      1.0,
    );
    assert!(matches!(
      result,
      Err(Error::Effect(EffectError::GraphTooLarge { .. }))
    ));
  }

  #[test]
  fn subregions_default_to_input_union_clamped_to_region() {
    let definition = FilterDefinition {
      operations: vec![
        EffectOperation::new(Primitive::Flood {
          color: Rgba::BLACK,
          opacity: 1.0,
        })
        .with_subregion(RegionSpec {
          x: Some(LengthValue::Number(10.0)),
          y: Some(LengthValue::Number(10.0)),
          width: Some(LengthValue::Number(20.0)),
          height: Some(LengthValue::Number(20.0)),
        })
        .with_result("flood"),
        EffectOperation::new(Primitive::Merge).with_input(InputRef::Reference("flood".into())),
      ],
      region: FilterRegion {
        x: LengthValue::Number(0.0),
        y: LengthValue::Number(0.0),
        width: LengthValue::Number(100.0),
        height: LengthValue::Number(100.0),
        units: UnitSpace::UserSpaceOnUse,
      },
      primitive_units: UnitSpace::UserSpaceOnUse,
      color_interpolation: ColorInterpolation::Srgb,
    };
    let mut chain = EffectChain::build(
      &geometry(Rect::from_xywh(0.0, 0.0, 50.0, 50.0)),
      &definition,
      &LengthContext::new(Size::new(100.0, 100.0)),
      ConsumerKind::ResourceReference,
      1.0,
    )
    .unwrap();
    chain.determine_primitive_subregions();

    assert_eq!(chain.nodes()[0].subregion(), Rect::from_xywh(10.0, 10.0, 20.0, 20.0));
    // The merge inherits its single input's subregion.
    assert_eq!(chain.nodes()[1].subregion(), Rect::from_xywh(10.0, 10.0, 20.0, 20.0));
  }

  #[test]
  fn resolution_clamps_oversized_source() {
    let definition = simple_blur_definition();
    let mut chain = build_chain(&definition, Rect::from_xywh(0.0, 0.0, 8000.0, 8000.0));
    chain.update_backing_store_rect(Rect::from_xywh(0.0, 0.0, 8000.0, 8000.0));
    chain.prepare_absolute_geometry().unwrap();

    let (rx, ry) = chain.filter_resolution();
    assert!(rx < 1.0);
    assert_eq!(rx, ry);
    let rect = chain.absolute_source_rect();
    assert!(rect.width() <= crate::surface::MAX_SURFACE_DIMENSION as f32);
    assert!(rect.height() <= crate::surface::MAX_SURFACE_DIMENSION as f32);

    // The clamp shows up in the capture transform too.
    let t = chain.buffer_transform();
    assert!((t.sx - rx).abs() < 1e-6);
  }

  #[test]
  fn small_sources_keep_unit_resolution() {
    let definition = simple_blur_definition();
    let mut chain = build_chain(&definition, Rect::from_xywh(0.0, 0.0, 100.0, 100.0));
    chain.update_backing_store_rect(Rect::from_xywh(0.0, 0.0, 100.0, 100.0));
    chain.prepare_absolute_geometry().unwrap();
    assert_eq!(chain.filter_resolution(), (1.0, 1.0));
  }

  #[test]
  fn empty_source_rect_is_degenerate() {
    let definition = simple_blur_definition();
    let mut chain = build_chain(&definition, Rect::from_xywh(0.0, 0.0, 100.0, 100.0));
    chain.update_backing_store_rect(Rect::ZERO);
    assert!(matches!(
      chain.prepare_absolute_geometry(),
      Err(EffectError::DegenerateGeometry { .. })
    ));
  }

  #[test]
  fn clear_intermediate_results_is_idempotent() {
    let definition = simple_blur_definition();
    let mut chain = build_chain(&definition, Rect::from_xywh(0.0, 0.0, 32.0, 32.0));
    chain.update_backing_store_rect(Rect::from_xywh(0.0, 0.0, 32.0, 32.0));
    chain.prepare_absolute_geometry().unwrap();
    chain.determine_primitive_subregions();
    chain
      .allocate_backing_store_if_needed(ColorInterpolation::Srgb)
      .unwrap();
    chain.apply();
    assert!(chain.output().is_some());

    chain.clear_intermediate_results();
    let after_once: Vec<bool> = chain.nodes().iter().map(|n| n.output.is_some()).collect();
    chain.clear_intermediate_results();
    let after_twice: Vec<bool> = chain.nodes().iter().map(|n| n.output.is_some()).collect();
    assert_eq!(after_once, after_twice);
    assert!(after_once.iter().all(|cached| !*cached));
    // Topology survives.
    assert!(chain.has_effects());
  }

  #[test]
  fn shrinking_filter_region_drops_intermediates() {
    let definition = simple_blur_definition();
    let mut chain = build_chain(&definition, Rect::from_xywh(0.0, 0.0, 32.0, 32.0));
    chain.update_backing_store_rect(Rect::from_xywh(0.0, 0.0, 32.0, 32.0));
    chain.prepare_absolute_geometry().unwrap();
    chain.determine_primitive_subregions();
    chain
      .allocate_backing_store_if_needed(ColorInterpolation::Srgb)
      .unwrap();
    chain.apply();
    assert!(chain.output().is_some());

    // Default region for a 32x32 box is 38.4 wide; 20 is a shrink.
    chain.set_filter_region(Rect::from_xywh(-10.0, -10.0, 20.0, 120.0));
    assert!(chain.output().is_none());

    // Growing the region keeps whatever is cached.
    chain.apply();
    assert!(chain.output().is_some());
    chain.set_filter_region(Rect::from_xywh(-10.0, -10.0, 30.0, 130.0));
    assert!(chain.output().is_some());
  }

  #[test]
  fn apply_evaluates_diamond_inputs_once() {
    let definition = FilterDefinition {
      operations: vec![
        EffectOperation::new(Primitive::Flood {
          color: Rgba::WHITE,
          opacity: 1.0,
        })
        .with_result("f"),
        EffectOperation::new(Primitive::Merge)
          .with_input(InputRef::Reference("f".into()))
          .with_input(InputRef::Reference("f".into())),
      ],
      region: FilterRegion {
        x: LengthValue::Number(0.0),
        y: LengthValue::Number(0.0),
        width: LengthValue::Number(16.0),
        height: LengthValue::Number(16.0),
        units: UnitSpace::UserSpaceOnUse,
      },
      primitive_units: UnitSpace::UserSpaceOnUse,
      color_interpolation: ColorInterpolation::Srgb,
    };
    let mut chain = EffectChain::build(
      &geometry(Rect::from_xywh(0.0, 0.0, 16.0, 16.0)),
      &definition,
      &LengthContext::new(Size::new(16.0, 16.0)),
      ConsumerKind::ResourceReference,
      1.0,
    )
    .unwrap();
    chain.update_backing_store_rect(Rect::from_xywh(0.0, 0.0, 16.0, 16.0));
    chain.prepare_absolute_geometry().unwrap();
    chain.determine_primitive_subregions();
    chain
      .allocate_backing_store_if_needed(ColorInterpolation::Srgb)
      .unwrap();
    chain.apply();

    // Both nodes evaluated, and the flood's cached output fed the merge.
    assert!(chain.nodes()[0].output.is_some());
    let out = chain.output().expect("merge output");
    assert!(out.pixmap.pixels().iter().any(|px| px.alpha() == 255));
  }
}
