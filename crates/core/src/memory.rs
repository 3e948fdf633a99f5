//! Memory bounding for metatile rendering.
//!
//! Every subtile of a metatile accumulates features in its own builder, and
//! a metatile is only useful if all of its subtiles complete. To keep a single
//! request from exhausting the heap, each builder is wrapped in a
//! [`MemoryGuardedBuilder`] that charges an estimated cost per feature against
//! a [`MetatileMemoryBudget`] shared by all subtiles.
//!
//! The budget only grows. A reservation that would push it past the cap is
//! refused without being recorded, and the metatile fails.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use geo::Geometry;
use serde::{Deserialize, Serialize};

use crate::builder::{FeatureRecord, TileBuilder};
use crate::feature::PropertyValue;
use crate::{Error, Result};

/// Byte costs used to estimate the footprint of a feature.
///
/// These are rough heap estimates, not exact sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    pub feature_overhead: u64,
    pub point_bytes: u64,
    pub line_point_bytes: u64,
    pub polygon_point_bytes: u64,
    pub ring_bytes: u64,
    pub member_bytes: u64,
    /// Per attribute, on top of the key length
    pub attribute_pair_bytes: u64,
    pub numeric_bytes: u64,
    pub null_bytes: u64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            feature_overhead: 64,
            point_bytes: 16,
            line_point_bytes: 20,
            polygon_point_bytes: 22,
            ring_bytes: 32,
            member_bytes: 16,
            attribute_pair_bytes: 8,
            numeric_bytes: 8,
            null_bytes: 4,
        }
    }
}

impl CostModel {
    pub fn feature_cost(&self, record: &FeatureRecord) -> u64 {
        let properties: u64 = record
            .properties
            .iter()
            .map(|(name, value)| self.attribute_cost(name, value))
            .sum();
        self.feature_overhead
            + record.feature_id.len() as u64
            + self.geometry_cost(&record.geometry)
            + properties
    }

    pub fn geometry_cost(&self, geom: &Geometry<f64>) -> u64 {
        match geom {
            Geometry::Point(_) => self.point_bytes,
            Geometry::MultiPoint(mp) => {
                mp.0.len() as u64 * (self.member_bytes + self.point_bytes)
            }
            Geometry::Line(_) => 2 * self.line_point_bytes,
            Geometry::LineString(ls) => ls.0.len() as u64 * self.line_point_bytes,
            Geometry::MultiLineString(mls) => mls
                .0
                .iter()
                .map(|ls| self.member_bytes + ls.0.len() as u64 * self.line_point_bytes)
                .sum(),
            Geometry::Polygon(p) => self.polygon_cost(p),
            Geometry::MultiPolygon(mp) => {
                mp.0.iter()
                    .map(|p| self.member_bytes + self.polygon_cost(p))
                    .sum()
            }
            Geometry::Rect(_) => self.ring_bytes + 5 * self.polygon_point_bytes,
            Geometry::Triangle(_) => self.ring_bytes + 4 * self.polygon_point_bytes,
            Geometry::GeometryCollection(gc) => gc
                .0
                .iter()
                .map(|g| self.member_bytes + self.geometry_cost(g))
                .sum(),
        }
    }

    fn polygon_cost(&self, polygon: &geo::Polygon<f64>) -> u64 {
        std::iter::once(polygon.exterior())
            .chain(polygon.interiors())
            .map(|ring| self.ring_bytes + ring.0.len() as u64 * self.polygon_point_bytes)
            .sum()
    }

    pub fn attribute_cost(&self, name: &str, value: &PropertyValue) -> u64 {
        let value_cost = match value {
            PropertyValue::String(s) => s.len() as u64,
            PropertyValue::Double(_)
            | PropertyValue::Int(_)
            | PropertyValue::UInt(_)
            | PropertyValue::Bool(_) => self.numeric_bytes,
            PropertyValue::Null => self.null_bytes,
        };
        self.attribute_pair_bytes + name.len() as u64 + value_cost
    }
}

/// Memory counter shared by all builders of one metatile.
#[derive(Debug)]
pub struct MetatileMemoryBudget {
    used: AtomicU64,
    cap: u64,
    capped: AtomicBool,
}

impl MetatileMemoryBudget {
    pub fn new(cap: u64) -> Self {
        Self {
            used: AtomicU64::new(0),
            cap,
            capped: AtomicBool::new(false),
        }
    }

    /// Add `bytes` if the total stays within the cap, returning the new total.
    ///
    /// A refused reservation leaves the counter untouched and flips the budget
    /// into the capped state.
    pub fn try_reserve(&self, bytes: u64) -> Result<u64> {
        let cap = self.cap;
        match self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(bytes).filter(|total| *total <= cap)
            }) {
            Ok(previous) => Ok(previous + bytes),
            Err(current) => {
                self.capped.store(true, Ordering::Release);
                Err(Error::MemoryCapExceeded {
                    attempted: current.saturating_add(bytes),
                    cap,
                })
            }
        }
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    pub fn cap(&self) -> u64 {
        self.cap
    }

    pub fn remaining(&self) -> u64 {
        self.cap.saturating_sub(self.used())
    }

    /// Whether some reservation has been refused
    pub fn is_capped(&self) -> bool {
        self.capped.load(Ordering::Acquire)
    }
}

/// A [`TileBuilder`] that charges every feature against a shared budget.
pub struct MemoryGuardedBuilder {
    inner: Box<dyn TileBuilder>,
    budget: Arc<MetatileMemoryBudget>,
    cost_model: CostModel,
    accepted: usize,
}

impl MemoryGuardedBuilder {
    pub fn new(
        inner: Box<dyn TileBuilder>,
        budget: Arc<MetatileMemoryBudget>,
        cost_model: CostModel,
    ) -> Self {
        Self {
            inner,
            budget,
            cost_model,
            accepted: 0,
        }
    }

    pub fn budget(&self) -> &Arc<MetatileMemoryBudget> {
        &self.budget
    }

    /// Number of features forwarded to the wrapped builder
    pub fn accepted(&self) -> usize {
        self.accepted
    }
}

impl TileBuilder for MemoryGuardedBuilder {
    fn add_feature(&mut self, record: FeatureRecord) -> Result<()> {
        let cost = self.cost_model.feature_cost(&record);
        if let Err(e) = self.budget.try_reserve(cost) {
            log::warn!(
                "metatile memory cap of {} reached while adding feature {} ({} used)",
                format_bytes(self.budget.cap()),
                record.feature_id,
                format_bytes(self.budget.used())
            );
            return Err(e);
        }
        self.accepted += 1;
        self.inner.add_feature(record)
    }

    fn build(&mut self) -> Result<Vec<u8>> {
        self.inner.build()
    }
}

/// Format bytes as human-readable string (KB, MB, GB).
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
