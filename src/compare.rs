//! # Series Comparison Module
//!
//! Compares two one-dimensional data series. The first series is the
//! reference; the second is linearly interpolated onto the first's
//! coordinates after singleton dimensions are squeezed out, masked points
//! dropped, and non-overlapping reference coordinates trimmed (warned about,
//! or fatal when the ranges are disjoint). Optionally the aligned series and
//! their difference are dumped to a new NetCDF file.

use crate::error::{NcplotError, Result};
use crate::handle::{self, DataSlab};
use crate::slice::SliceSpec;
use crate::store::StoreRegistry;
use log::warn;
use ndarray::Array1;
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct CompareOptions {
    /// Write the aligned series and their difference to this NetCDF path.
    pub dump: Option<PathBuf>,
}

/// Difference statistics between the reference series and the interpolated
/// second series.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonReport {
    pub points: usize,
    pub bias: f64,
    pub rmse: f64,
    pub mae: f64,
    pub correlation: f64,
    /// 1 - SSQ(series1 - series2) / SSQ(series1 - mean1).
    pub r_squared: f64,
    pub unit: String,
    pub coordinate_range1: (f64, f64),
    pub coordinate_range2: (f64, f64),
}

/// Compare two expressions, the second interpolated onto the first.
pub fn compare_series(
    registry: &StoreRegistry,
    source1: &str,
    expr1: &str,
    source2: &str,
    expr2: &str,
    options: &CompareOptions,
) -> Result<ComparisonReport> {
    let handle1 = handle::resolve(expr1, registry, source1)?;
    let handle2 = handle::resolve(expr2, registry, source2)?;
    let slab1 = squeeze(handle1.slab(registry, source1, &SliceSpec::new())?);
    let slab2 = squeeze(handle2.slab(registry, source2, &SliceSpec::new())?);

    let series1 = one_dimensional(&slab1, "first")?;
    let series2 = one_dimensional(&slab2, "second")?;
    if series2.len() < 2 {
        return Err(NcplotError::Dimensionality(
            "second data series needs at least two unmasked points for interpolation".to_string(),
        ));
    }

    let unit = difference_unit(&slab1.unit, &slab2.unit);
    let coordinate_dimension = slab2.dims[0].clone();

    // Trim reference points outside the second series' coordinate range:
    // interpolation is allowed, extrapolation is not.
    let (c2_first, c2_last) = (series2[0].0, series2[series2.len() - 1].0);
    let (c1_first, c1_last) = (series1[0].0, series1[series1.len() - 1].0);
    let mut start = 0;
    let mut stop = series1.len();
    if c2_first > c1_first {
        start = series1.partition_point(|&(c, _)| c < c2_first);
        if start == series1.len() {
            return Err(NcplotError::Dimensionality(format!(
                "first coordinate of second series ({c2_first}) lies beyond the end of the first \
                 [reference] series ({c1_last})"
            )));
        }
        warn!(
            "first coordinate of second data series ({c2_first}) lies beyond the start of the \
             first [reference] series ({c1_first}); the first {start} points of the first series \
             will be ignored"
        );
    }
    if c2_last < c1_last {
        stop = series1.partition_point(|&(c, _)| c <= c2_last);
        if stop == 0 {
            return Err(NcplotError::Dimensionality(format!(
                "last coordinate of second series ({c2_last}) lies before the beginning of the \
                 first [reference] series ({c1_first})"
            )));
        }
        warn!(
            "last coordinate of second data series ({c2_last}) lies before the end of the first \
             [reference] series ({c1_last}); the last {} points of the first series will be \
             ignored",
            series1.len() - stop
        );
    }
    let reference = &series1[start..stop];
    if reference.is_empty() {
        return Err(NcplotError::Dimensionality(
            "the two series have no overlapping coordinate range".to_string(),
        ));
    }

    let interpolated: Vec<f64> = reference
        .iter()
        .map(|&(c, _)| interpolate(&series2, c))
        .collect();
    let data1: Vec<f64> = reference.iter().map(|&(_, v)| v).collect();
    let coords: Vec<f64> = reference.iter().map(|&(c, _)| c).collect();

    let n = data1.len() as f64;
    let mean1 = data1.iter().sum::<f64>() / n;
    let mean2 = interpolated.iter().sum::<f64>() / n;
    let sd1 = (data1.iter().map(|v| (v - mean1).powi(2)).sum::<f64>() / n).sqrt();
    let sd2 = (interpolated.iter().map(|v| (v - mean2).powi(2)).sum::<f64>() / n).sqrt();
    let delta: Vec<f64> = interpolated
        .iter()
        .zip(&data1)
        .map(|(b, a)| b - a)
        .collect();
    let rmse = (delta.iter().map(|d| d * d).sum::<f64>() / n).sqrt();
    let mae = delta.iter().map(|d| d.abs()).sum::<f64>() / n;
    let covariance = data1
        .iter()
        .zip(&interpolated)
        .map(|(a, b)| (a - mean1) * (b - mean2))
        .sum::<f64>()
        / n;
    let ssq_residual: f64 = delta.iter().map(|d| d * d).sum();
    let ssq_total: f64 = data1.iter().map(|v| (v - mean1).powi(2)).sum();

    if let Some(path) = &options.dump {
        dump_difference(
            registry,
            source1,
            path,
            &coordinate_dimension,
            &coords,
            &data1,
            &interpolated,
            &delta,
            expr1,
            expr2,
            &slab1.unit,
            &slab2.unit,
            &unit,
        )?;
    }

    Ok(ComparisonReport {
        points: data1.len(),
        bias: mean2 - mean1,
        rmse,
        mae,
        correlation: covariance / sd1 / sd2,
        r_squared: 1.0 - ssq_residual / ssq_total,
        unit,
        coordinate_range1: (coords[0], coords[coords.len() - 1]),
        coordinate_range2: (c2_first, c2_last),
    })
}

/// Drop singleton dimensions from a slab.
fn squeeze(slab: DataSlab) -> DataSlab {
    let mut data = slab.data;
    let mut dims = slab.dims;
    let mut coords = slab.coords;
    let mut axis = 0;
    while axis < dims.len() {
        if data.shape()[axis] == 1 && data.ndim() > 1 {
            data = data.index_axis_move(ndarray::Axis(axis), 0);
            dims.remove(axis);
            coords.remove(axis);
        } else {
            axis += 1;
        }
    }
    DataSlab {
        dims,
        data,
        coords,
        unit: slab.unit,
    }
}

/// Validate dimensionality and drop masked points, keeping (coord, value)
/// pairs sorted by coordinate.
fn one_dimensional(slab: &DataSlab, which: &str) -> Result<Vec<(f64, f64)>> {
    if slab.ndim() == 0 {
        return Err(NcplotError::Dimensionality(format!(
            "{which} data series is a scalar without coordinates and cannot be used for \
             comparisons"
        )));
    }
    if slab.ndim() != 1 {
        return Err(NcplotError::Dimensionality(format!(
            "{which} data series has {} dimensions, but only 1-dimensional series are supported",
            slab.ndim()
        )));
    }
    let mut pairs: Vec<(f64, f64)> = slab
        .coords[0]
        .iter()
        .zip(slab.data.iter())
        .filter(|(c, v)| c.is_finite() && v.is_finite())
        .map(|(&c, &v)| (c, v))
        .collect();
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("finite coordinates"));
    if pairs.is_empty() {
        return Err(NcplotError::Dimensionality(format!(
            "{which} data series has no unmasked points"
        )));
    }
    Ok(pairs)
}

/// Linear interpolation within a coordinate-sorted series; callers guarantee
/// `x` lies inside the series' coordinate range.
fn interpolate(series: &[(f64, f64)], x: f64) -> f64 {
    let upper = series.partition_point(|&(c, _)| c < x).min(series.len() - 1);
    if upper == 0 {
        return series[0].1;
    }
    let (x0, y0) = series[upper - 1];
    let (x1, y1) = series[upper];
    if x1 == x0 {
        return y1;
    }
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

fn difference_unit(unit1: &str, unit2: &str) -> String {
    if unit1 == unit2 {
        unit1.to_string()
    } else {
        format!("{unit2}-{unit1}")
    }
}

/// Write the aligned series plus their difference to a new NetCDF file.
#[allow(clippy::too_many_arguments)]
fn dump_difference(
    registry: &StoreRegistry,
    source1: &str,
    path: &std::path::Path,
    dimension: &str,
    coords: &[f64],
    data1: &[f64],
    data2: &[f64],
    delta: &[f64],
    expr1: &str,
    expr2: &str,
    unit1: &str,
    unit2: &str,
    difference_unit: &str,
) -> Result<()> {
    let mut file = netcdf::create(path)?;
    file.add_dimension(dimension, coords.len())?;

    {
        let mut var = file.add_variable::<f64>(dimension, &[dimension])?;
        if let Some(store) = registry.get(source1) {
            let coordinate = store.coordinate_for(dimension);
            if let Some(units) = store.string_attribute(&coordinate, "units") {
                var.put_attribute("units", units.as_str())?;
            }
            if let Some(long_name) = store.string_attribute(&coordinate, "long_name") {
                var.put_attribute("long_name", long_name.as_str())?;
            }
        }
        var.put(Array1::from(coords.to_vec()).view(), ..)?;
    }
    {
        let mut var = file.add_variable::<f64>("difference", &[dimension])?;
        var.put_attribute("long_name", format!("{expr2} - {expr1}").as_str())?;
        var.put_attribute("units", difference_unit)?;
        var.put(Array1::from(delta.to_vec()).view(), ..)?;
    }
    {
        let mut var = file.add_variable::<f64>("source1", &[dimension])?;
        var.put_attribute("long_name", expr1)?;
        var.put_attribute("units", unit1)?;
        var.put_attribute("expression", expr1)?;
        var.put(Array1::from(data1.to_vec()).view(), ..)?;
    }
    {
        let mut var = file.add_variable::<f64>("source2", &[dimension])?;
        var.put_attribute("long_name", expr2)?;
        var.put_attribute("units", unit2)?;
        var.put_attribute("expression", expr2)?;
        var.put(Array1::from(data2.to_vec()).view(), ..)?;
    }
    Ok(())
}
