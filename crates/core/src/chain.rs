//! The geometry operation chain.
//!
//! A chain is an ordered list of named unary stages, each taking a geometry
//! and producing a geometry. [`ChainBuilder`] assembles the standard stages
//! from a [`ChainContext`]:
//!
//! ```text
//! preprocess → transform → clip → simplify → collapse collections
//! ```
//!
//! Any stage may be left out. Execution is strictly linear: as soon as a stage
//! yields an empty geometry the remaining stages are skipped and the empty
//! sentinel is returned. Errors from a stage propagate to the caller.

use std::fmt;
use std::sync::Arc;

use geo::{BoundingRect, Geometry};

use crate::clip::clip_to_envelope;
use crate::context::ChainContext;
use crate::crs::{transform_geometry, CoordinateTransform};
use crate::envelope::Envelope;
use crate::geometry::{collapse_singleton, dominant_kind, empty_geometry, is_empty, GeometryKind};
use crate::simplify::simplify_geometry;
use crate::validate::filter_valid_geometry;
use crate::Result;

type StageFn = Box<dyn FnMut(Geometry<f64>) -> Result<Geometry<f64>> + Send>;

/// One named step of an [`OperationChain`].
pub struct Stage {
    name: &'static str,
    apply: StageFn,
}

impl Stage {
    pub fn new<F>(name: &'static str, apply: F) -> Self
    where
        F: FnMut(Geometry<f64>) -> Result<Geometry<f64>> + Send + 'static,
    {
        Self {
            name,
            apply: Box::new(apply),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage").field("name", &self.name).finish()
    }
}

#[derive(Debug, Default)]
pub struct OperationChain {
    stages: Vec<Stage>,
}

impl OperationChain {
    /// Run `geometry` through every stage in order.
    ///
    /// Never returns "no geometry": an empty result is the empty sentinel.
    pub fn execute(&mut self, geometry: Geometry<f64>) -> Result<Geometry<f64>> {
        let mut current = geometry;
        for stage in &mut self.stages {
            if is_empty(&current) {
                return Ok(empty_geometry());
            }
            current = (stage.apply)(current)?;
        }
        if is_empty(&current) {
            Ok(empty_geometry())
        } else {
            Ok(current)
        }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Assembles an [`OperationChain`] from a [`ChainContext`].
///
/// Stages run in the order they were added.
pub struct ChainBuilder<'a> {
    context: &'a ChainContext,
    stages: Vec<Stage>,
}

impl<'a> ChainBuilder<'a> {
    pub fn new(context: &'a ChainContext) -> Self {
        Self {
            context,
            stages: Vec::new(),
        }
    }

    /// Projection pre-processing followed by sub-pixel dedup.
    ///
    /// Geometries smaller than a generalization span on both axes compete for
    /// their screen pixel: the first one keeps it, later ones become empty.
    /// Winning lines and polygons are replaced by a coarse envelope shape,
    /// winning points are kept as they are.
    pub fn preprocess(mut self) -> Self {
        let handler = self.context.projection_handler.clone();
        let mut screen_map = self.context.screen_map.clone();

        self.stages.push(Stage::new("preprocess", move |geom| {
            let geom = match &handler {
                Some(handler) => handler.pre_process(&geom),
                None => geom,
            };
            let Some(rect) = geom.bounding_rect() else {
                return Ok(empty_geometry());
            };
            let envelope = Envelope::from_rect(&rect);
            if !screen_map.can_simplify(&envelope) {
                return Ok(geom);
            }
            if screen_map.check_and_set(&envelope)? {
                log::trace!("screen pixel already taken, dropping sub-pixel geometry");
                return Ok(empty_geometry());
            }
            match dominant_kind(&geom) {
                Some(GeometryKind::Puntal) | None => Ok(geom),
                Some(kind) => Ok(screen_map.simplified_shape(&envelope, kind)),
            }
        }));
        self
    }

    /// Reproject into screen space, or into the target CRS.
    pub fn transform(mut self, screen_space: bool) -> Self {
        let transform: Arc<dyn CoordinateTransform> = if screen_space {
            self.context.source_to_screen.clone()
        } else {
            self.context.source_to_target.clone()
        };
        self.stages.push(Stage::new("transform", move |geom| {
            transform_geometry(&geom, transform.as_ref())
        }));
        self
    }

    /// Clip to the padded tile envelope. A no-op when `enabled` is false.
    ///
    /// `screen_space` must match the space the preceding transform produced.
    pub fn clip(mut self, enabled: bool, screen_space: bool) -> Self {
        if !enabled {
            return self;
        }
        let envelope = self.context.clip_envelope(screen_space);
        self.stages.push(Stage::new("clip", move |geom| {
            Ok(clip_to_envelope(&geom, &envelope).unwrap_or_else(empty_geometry))
        }));
        self
    }

    /// Simplify with the screen or target tolerance, dropping degenerate results.
    pub fn simplify(mut self, screen_space: bool) -> Self {
        let tolerance = if screen_space {
            self.context.screen_simplification_tolerance
        } else {
            self.context.target_simplification_tolerance
        };
        self.stages.push(Stage::new("simplify", move |geom| {
            let simplified = simplify_geometry(&geom, tolerance);
            Ok(filter_valid_geometry(&simplified).unwrap_or_else(empty_geometry))
        }));
        self
    }

    /// Unwrap multi-geometries and collections with a single member.
    pub fn collapse_collections(mut self) -> Self {
        self.stages.push(Stage::new("collapse_collections", |geom| {
            Ok(collapse_singleton(geom))
        }));
        self
    }

    /// Append a custom stage.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> OperationChain {
        OperationChain {
            stages: self.stages,
        }
    }
}
