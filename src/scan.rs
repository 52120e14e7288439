//! # Range Scan Module
//!
//! Computes global minima and maxima of coordinates and data values across
//! one or more sliced dimensions, by recursively iterating every index of the
//! chosen dimensions and reading one slab per leaf. This is the dominant cost
//! of the whole subsystem: O(product of iterated dimension lengths) slab
//! reads, so the walk reports fractional progress and polls a cancellation
//! flag between leaves. A canceled scan returns whatever bounds have been
//! accumulated — a valid partial result, not an error.

use crate::error::Result;
use crate::handle::{self, DataSlab};
use crate::slice::{DimSelection, SliceSpec};
use crate::store::StoreRegistry;

/// Observer for long-running operations. The defaults make progress
/// reporting and cancellation strictly opt-in.
pub trait ProgressSink {
    /// Fractional completion in 0..=1.
    fn progress(&mut self, fraction: f64) {
        let _ = fraction;
    }

    /// Polled cooperatively between leaf iterations.
    fn canceled(&self) -> bool {
        false
    }
}

/// Sink that ignores progress and never cancels.
pub struct NullProgress;

impl ProgressSink for NullProgress {}

/// Bounds accumulated by a scan, per slab dimension plus overall data values.
#[derive(Debug, Clone)]
pub struct ScanBounds {
    /// Dimensions of the scanned slabs (free dimensions plus the iterated
    /// ones, which appear with length 1 in each leaf).
    pub dims: Vec<String>,
    pub coord_min: Vec<Option<f64>>,
    pub coord_max: Vec<Option<f64>>,
    pub data_min: Option<f64>,
    pub data_max: Option<f64>,
    /// False when the scan was canceled before visiting every leaf.
    pub completed: bool,
}

impl ScanBounds {
    fn new(dims: Vec<String>) -> Self {
        let n = dims.len();
        Self {
            dims,
            coord_min: vec![None; n],
            coord_max: vec![None; n],
            data_min: None,
            data_max: None,
            completed: false,
        }
    }

    /// Coordinate bounds for one dimension, if it was scanned.
    pub fn dim_bounds(&self, dim: &str) -> Option<(Option<f64>, Option<f64>)> {
        let idx = self.dims.iter().position(|d| d == dim)?;
        Some((self.coord_min[idx], self.coord_max[idx]))
    }

    /// Fold one leaf slab into the accumulator. Fully masked slabs contribute
    /// no data bounds; coordinates are matched by dimension name.
    fn fold_leaf(&mut self, slab: &DataSlab) {
        for (axis, dim) in slab.dims.iter().enumerate() {
            let Some(pos) = self.dims.iter().position(|d| d == dim) else {
                continue;
            };
            if let Some((lo, hi)) = slab.coord_min_max(axis) {
                self.coord_min[pos] = Some(self.coord_min[pos].map_or(lo, |v| v.min(lo)));
                self.coord_max[pos] = Some(self.coord_max[pos].map_or(hi, |v| v.max(hi)));
            }
        }
        if let Some((lo, hi)) = slab.data_min_max() {
            self.data_min = Some(self.data_min.map_or(lo, |v| v.min(lo)));
            self.data_max = Some(self.data_max.map_or(hi, |v| v.max(hi)));
        }
    }
}

/// Recursive range scanner over an expression's sliced dimensions.
pub struct RangeScanner<'a> {
    registry: &'a StoreRegistry,
    default_source: &'a str,
}

impl<'a> RangeScanner<'a> {
    pub fn new(registry: &'a StoreRegistry, default_source: &'a str) -> Self {
        Self {
            registry,
            default_source,
        }
    }

    /// Scan `iterate_dims` of the base expression exhaustively, holding
    /// `fixed` selections constant. With no iterated dimensions the result is
    /// exactly the fixed slab's bounds.
    pub fn scan(
        &self,
        base_expression: &str,
        iterate_dims: &[String],
        fixed: &SliceSpec,
        sink: &mut dyn ProgressSink,
    ) -> Result<ScanBounds> {
        let handle = handle::resolve(base_expression, self.registry, self.default_source)?;
        let ui_shape = handle.ui_shape();
        let all_dims = handle.dimensions();

        // Slab dimensions: everything not collapsed by a fixed index. The
        // iterated dimensions stay in the slabs with length 1.
        let slab_dims: Vec<String> = all_dims
            .iter()
            .filter(|d| {
                iterate_dims.contains(d) || !matches!(fixed.get(d), Some(DimSelection::Index(_)))
            })
            .cloned()
            .collect();

        let lengths: Vec<usize> = iterate_dims
            .iter()
            .map(|dim| {
                all_dims
                    .iter()
                    .position(|d| d == dim)
                    .map(|i| ui_shape[i])
                    .unwrap_or(0)
            })
            .collect();
        let total: usize = lengths.iter().product::<usize>().max(1);

        let mut acc = ScanBounds::new(slab_dims);
        let mut visited = 0usize;
        let mut spec = fixed.clone();
        let finished = self.iterate(
            &handle,
            &mut spec,
            iterate_dims,
            &lengths,
            &mut acc,
            &mut visited,
            total,
            sink,
        )?;
        acc.completed = finished;
        sink.progress(1.0);
        Ok(acc)
    }

    /// Walk the remaining dimensions depth-first, threading the accumulator
    /// through explicitly. Returns false when canceled.
    #[allow(clippy::too_many_arguments)]
    fn iterate(
        &self,
        handle: &handle::VariableHandle,
        spec: &mut SliceSpec,
        remaining: &[String],
        lengths: &[usize],
        acc: &mut ScanBounds,
        visited: &mut usize,
        total: usize,
        sink: &mut dyn ProgressSink,
    ) -> Result<bool> {
        let Some(dim) = remaining.first() else {
            if sink.canceled() {
                return Ok(false);
            }
            let slab = handle.slab(self.registry, self.default_source, spec)?;
            acc.fold_leaf(&slab);
            *visited += 1;
            sink.progress(*visited as f64 / total as f64);
            return Ok(true);
        };

        for i in 0..lengths[0] {
            spec.set(dim, DimSelection::Range(i, i + 1));
            if !self.iterate(
                handle,
                spec,
                &remaining[1..],
                &lengths[1..],
                acc,
                visited,
                total,
                sink,
            )? {
                return Ok(false);
            }
        }
        spec.remove(dim);
        Ok(true)
    }
}
