//! # Descriptive Statistics Module
//!
//! Streaming mean/standard deviation/min/max for an expression over one or
//! more NetCDF variables, iterating outer dimensions in chunks so the
//! resident slab stays below a tunable point budget. Percentiles require the
//! full data set in memory and bypass the chunked walk.

use crate::error::Result;
use crate::handle::{self, VariableHandle};
use crate::slice::{DimSelection, SliceSpec};
use crate::store::StoreRegistry;

/// Tunables for a statistics run. The chunk threshold is configuration, not
/// a constant: it bounds how many data points one slab read may hold before
/// the walk starts iterating outer dimensions.
#[derive(Debug, Clone)]
pub struct StatsOptions {
    pub max_slab: usize,
    pub percentiles: bool,
}

impl Default for StatsOptions {
    fn default() -> Self {
        Self {
            max_slab: 1_000_000,
            percentiles: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PercentileSet {
    pub p2_5: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub p97_5: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryStats {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub unit: String,
    pub percentiles: Option<PercentileSet>,
}

/// Result of a statistics run.
#[derive(Debug, Clone, PartialEq)]
pub enum StatsOutcome {
    /// The expression reduced to a single value.
    Scalar(String),
    /// No unmasked data was available.
    Empty,
    Summary(SummaryStats),
}

/// Streaming fold over slab reads: count, sums, extrema, and (for the
/// percentile path) every unmasked value.
#[derive(Debug, Default)]
struct StreamAccumulator {
    count: usize,
    sum: f64,
    sum_squares: f64,
    min: Option<f64>,
    max: Option<f64>,
    collected: Option<Vec<f64>>,
}

impl StreamAccumulator {
    fn fold(&mut self, values: impl Iterator<Item = f64>) {
        for v in values {
            if !v.is_finite() {
                continue;
            }
            self.count += 1;
            self.sum += v;
            self.sum_squares += v * v;
            self.min = Some(self.min.map_or(v, |m| m.min(v)));
            self.max = Some(self.max.map_or(v, |m| m.max(v)));
            if let Some(collected) = &mut self.collected {
                collected.push(v);
            }
        }
    }
}

/// Compute descriptive statistics for an expression.
pub fn describe(
    registry: &StoreRegistry,
    default_source: &str,
    expression: &str,
    options: &StatsOptions,
) -> Result<StatsOutcome> {
    let resolved = handle::resolve(expression, registry, default_source)?;
    let unit = unit_suffix(resolved.unit());
    let shape = resolved.ui_shape();

    if shape.iter().product::<usize>() == 1 {
        let slab = resolved.slab(registry, default_source, &SliceSpec::new())?;
        let value = slab.first_value().unwrap_or(f64::NAN);
        return Ok(StatsOutcome::Scalar(format!("{value}{unit}")));
    }

    let mut acc = StreamAccumulator {
        collected: options.percentiles.then(Vec::new),
        ..Default::default()
    };

    if options.percentiles {
        // Percentiles need every value in memory anyway: one full read.
        let slab = resolved.slab(registry, default_source, &SliceSpec::new())?;
        acc.fold(slab.data.iter().copied());
    } else {
        let mut spec = SliceSpec::new();
        read_chunked(
            registry,
            default_source,
            &resolved,
            &shape,
            options.max_slab,
            0,
            &mut spec,
            &mut acc,
        )?;
    }

    if acc.count == 0 {
        return Ok(StatsOutcome::Empty);
    }

    let n = acc.count as f64;
    let mean = acc.sum / n;
    let variance = (acc.sum_squares / n - mean * mean).max(0.0);
    let percentiles = acc.collected.map(|mut data| {
        data.sort_by(|a, b| a.partial_cmp(b).expect("finite values"));
        PercentileSet {
            p2_5: percentile(&data, 0.025),
            p25: percentile(&data, 0.25),
            median: percentile(&data, 0.5),
            p75: percentile(&data, 0.75),
            p97_5: percentile(&data, 0.975),
        }
    });
    Ok(StatsOutcome::Summary(SummaryStats {
        count: acc.count,
        mean,
        std: variance.sqrt(),
        min: acc.min.unwrap_or(f64::NAN),
        max: acc.max.unwrap_or(f64::NAN),
        unit: unit.trim_start().to_string(),
        percentiles,
    }))
}

/// Walk outer dimensions one index at a time while the remaining slab would
/// exceed the point budget, reading a full slab at the innermost level.
#[allow(clippy::too_many_arguments)]
fn read_chunked(
    registry: &StoreRegistry,
    default_source: &str,
    resolved: &VariableHandle,
    shape: &[usize],
    max_slab: usize,
    dim_index: usize,
    spec: &mut SliceSpec,
    acc: &mut StreamAccumulator,
) -> Result<()> {
    let remaining: usize = shape[dim_index..].iter().product();
    if dim_index < shape.len().saturating_sub(1) && remaining > max_slab {
        let dim = resolved.dimensions()[dim_index].clone();
        for i in 0..shape[dim_index] {
            spec.set(&dim, DimSelection::Range(i, i + 1));
            read_chunked(
                registry,
                default_source,
                resolved,
                shape,
                max_slab,
                dim_index + 1,
                spec,
                acc,
            )?;
        }
        spec.remove(&dim);
        return Ok(());
    }
    let slab = resolved.slab(registry, default_source, spec)?;
    acc.fold(slab.data.iter().copied());
    Ok(())
}

/// Interpolated percentile over sorted data, weighting the two straddling
/// order statistics.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n == 1 {
        return sorted[0];
    }
    let index = n as f64 * p;
    let lower = (index.floor() as usize).min(n - 2);
    let lower_weight = ((lower + 1) as f64 / n as f64 - p) * n as f64;
    let lower_weight = lower_weight.clamp(0.0, 1.0);
    sorted[lower] * lower_weight + sorted[lower + 1] * (1.0 - lower_weight)
}

fn unit_suffix(unit: &str) -> String {
    if unit.is_empty() {
        String::new()
    } else {
        format!(" {unit}")
    }
}
