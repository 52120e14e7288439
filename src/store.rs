//! # Data Source Module
//!
//! Wraps opened NetCDF files behind the store contract the rest of the crate
//! relies on: variable/dimension inspection, hyperslab reads with CF
//! scale/offset and fill-value masking, coordinate-variable lookup with
//! per-dimension reassignment overrides, and a registry of named sources.
//!
//! How a file is interpreted is decided once, at open time, through
//! [`OpenOptions`] — there is no process-wide mutable state to inspect later.

use crate::error::{NcplotError, Result};
use chrono::NaiveDateTime;
use ndarray::{ArrayD, IxDyn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Conventions applied when reading data, resolved once at startup and passed
/// into every open call.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Apply CF `scale_factor`/`add_offset` attributes on read.
    pub apply_scale_offset: bool,
    /// Replace `_FillValue`/`missing_value` matches with NaN on read.
    pub mask_fill_values: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            apply_scale_offset: true,
            mask_fill_values: true,
        }
    }
}

/// Declared datatype of a dimension, derived from its coordinate variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionDatatype {
    Float,
    Datetime,
}

/// Metadata for one dimension of an open source.
#[derive(Debug, Clone)]
pub struct DimensionInfo {
    pub name: String,
    pub length: usize,
    pub unlimited: bool,
    /// Human-readable label (coordinate variable `long_name`, or the
    /// dimension name itself).
    pub label: String,
    pub datatype: DimensionDatatype,
}

/// Metadata for one variable of an open source.
#[derive(Debug, Clone)]
pub struct VariableMeta {
    pub name: String,
    pub dimensions: Vec<String>,
    pub shape: Vec<usize>,
    pub unit: String,
    pub long_name: String,
}

/// Selection along one dimension of a hyperslab read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimExtent {
    /// Fixed index; the dimension is dropped from the result.
    Index(usize),
    /// Half-open index range; the dimension is kept.
    Range(usize, usize),
    /// Whole dimension.
    All,
}

/// One opened NetCDF file.
pub struct NetcdfStore {
    file: netcdf::File,
    path: PathBuf,
    options: OpenOptions,
    /// Dimension name -> coordinate variable override ("reassigned" coordinates).
    reassigned: HashMap<String, String>,
}

impl NetcdfStore {
    /// Open a NetCDF file with explicit read conventions.
    pub fn open(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = netcdf::open(&path)
            .map_err(|e| NcplotError::source_open(path.clone(), e))?;
        Ok(Self {
            file,
            path,
            options: options.clone(),
            reassigned: HashMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of all variables in the file.
    pub fn variable_names(&self) -> Vec<String> {
        self.file.variables().map(|v| v.name().to_string()).collect()
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.file.variable(name).is_some()
    }

    /// Names of all dimensions in the file.
    pub fn dimension_names(&self) -> Vec<String> {
        self.file.dimensions().map(|d| d.name().to_string()).collect()
    }

    /// Metadata for one variable.
    pub fn variable_meta(&self, name: &str) -> Option<VariableMeta> {
        let var = self.file.variable(name)?;
        let dimensions: Vec<String> = var
            .dimensions()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        Some(VariableMeta {
            name: var.name().to_string(),
            dimensions,
            shape,
            unit: self.string_attribute(name, "units").unwrap_or_default(),
            long_name: self
                .string_attribute(name, "long_name")
                .unwrap_or_else(|| name.to_string()),
        })
    }

    /// Metadata for one dimension, including the datetime/float datatype
    /// derived from its coordinate variable's `units` attribute.
    pub fn dimension_info(&self, name: &str) -> Option<DimensionInfo> {
        let dim = self.file.dimension(name)?;
        let coord = self.coordinate_for(name);
        let datatype = match self.string_attribute(&coord, "units") {
            Some(units) if parse_time_units(&units).is_some() => DimensionDatatype::Datetime,
            _ => DimensionDatatype::Float,
        };
        let label = self
            .string_attribute(&coord, "long_name")
            .unwrap_or_else(|| name.to_string());
        Some(DimensionInfo {
            name: name.to_string(),
            length: dim.len(),
            unlimited: dim.is_unlimited(),
            label,
            datatype,
        })
    }

    /// Name of the coordinate variable for a dimension, honoring reassignments.
    pub fn coordinate_for(&self, dimension: &str) -> String {
        self.reassigned
            .get(dimension)
            .cloned()
            .unwrap_or_else(|| dimension.to_string())
    }

    /// Override the coordinate variable used for a dimension.
    pub fn reassign_coordinate(&mut self, dimension: &str, coordinate: &str) -> Result<()> {
        if !self.has_variable(coordinate) {
            return Err(NcplotError::expression(
                format!("coordinate variable '{coordinate}' not found"),
                self.path.display().to_string(),
                self.variable_names(),
            ));
        }
        self.reassigned
            .insert(dimension.to_string(), coordinate.to_string());
        Ok(())
    }

    /// Current coordinate reassignments.
    pub fn reassignments(&self) -> &HashMap<String, String> {
        &self.reassigned
    }

    /// Remove all coordinate reassignments.
    pub fn reset_reassignments(&mut self) {
        self.reassigned.clear();
    }

    /// String value of a variable attribute, if present.
    pub fn string_attribute(&self, variable: &str, attribute: &str) -> Option<String> {
        let var = self.file.variable(variable)?;
        let attr = var.attributes().find(|a| a.name() == attribute)?;
        attr.value().ok().map(|v| attribute_to_string(&v))
    }

    fn numeric_attribute(&self, variable: &str, attribute: &str) -> Option<f64> {
        let var = self.file.variable(variable)?;
        let attr = var.attributes().find(|a| a.name() == attribute)?;
        attr.value().ok().and_then(|v| attribute_to_f64(&v))
    }

    /// Read a hyperslab of a variable as f64, applying the open-time
    /// conventions. Dimensions selected with [`DimExtent::Index`] are dropped
    /// from the result shape.
    pub fn read_values(&self, name: &str, extents: &[DimExtent]) -> Result<ArrayD<f64>> {
        let var = self.file.variable(name).ok_or_else(|| {
            NcplotError::expression(
                format!("variable '{name}' not found"),
                self.path.display().to_string(),
                self.variable_names(),
            )
        })?;
        let dims: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        if extents.len() != dims.len() {
            return Err(NcplotError::Dimensionality(format!(
                "variable '{}' has {} dimensions but {} selections were given",
                name,
                dims.len(),
                extents.len()
            )));
        }

        let mut nc_extents: Vec<netcdf::Extent> = Vec::with_capacity(extents.len());
        let mut kept_shape = Vec::new();
        for (extent, &len) in extents.iter().zip(&dims) {
            match *extent {
                DimExtent::Index(i) => nc_extents.push(i.into()),
                DimExtent::Range(a, b) => {
                    nc_extents.push((a..b).into());
                    kept_shape.push(b.saturating_sub(a));
                }
                DimExtent::All => {
                    nc_extents.push((0..len).into());
                    kept_shape.push(len);
                }
            }
        }

        let raw: Vec<f64> = var.get_values(nc_extents.as_slice())?;
        let mut data = ArrayD::from_shape_vec(IxDyn(&kept_shape), raw).map_err(|e| {
            NcplotError::render(format!("slab shape mismatch for '{name}': {e}"))
        })?;

        if self.options.mask_fill_values {
            let fill = self
                .numeric_attribute(name, "_FillValue")
                .or_else(|| self.numeric_attribute(name, "missing_value"));
            if let Some(fill) = fill {
                data.mapv_inplace(|v| if v == fill { f64::NAN } else { v });
            }
        }
        if self.options.apply_scale_offset {
            let scale = self.numeric_attribute(name, "scale_factor").unwrap_or(1.0);
            let offset = self.numeric_attribute(name, "add_offset").unwrap_or(0.0);
            if scale != 1.0 || offset != 0.0 {
                data.mapv_inplace(|v| v * scale + offset);
            }
        }
        Ok(data)
    }

    /// Coordinate values for a dimension over an index range. Falls back to
    /// the raw indices when no 1-D coordinate variable exists.
    pub fn coordinate_values(&self, dimension: &str, start: usize, end: usize) -> Result<Vec<f64>> {
        let coord = self.coordinate_for(dimension);
        if let Some(meta) = self.variable_meta(&coord)
            && meta.dimensions.len() == 1
            && meta.dimensions[0] == dimension
        {
            let values = self.read_values(&coord, &[DimExtent::Range(start, end)])?;
            return Ok(values.iter().copied().collect());
        }
        Ok((start..end).map(|i| i as f64).collect())
    }

    /// Global attributes as key/value pairs.
    pub fn global_attributes(&self) -> Vec<(String, String)> {
        self.file
            .attributes()
            .filter_map(|a| {
                a.value()
                    .ok()
                    .map(|v| (a.name().to_string(), attribute_to_string(&v)))
            })
            .collect()
    }
}

/// Registry of named data sources. Insertion order matters: the first source
/// added is the default used to resolve bare expressions.
#[derive(Default)]
pub struct StoreRegistry {
    stores: Vec<(String, NetcdfStore)>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named source. A source with the same name is replaced.
    pub fn add(&mut self, name: impl Into<String>, store: NetcdfStore) {
        let name = name.into();
        if let Some(entry) = self.stores.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = store;
        } else {
            self.stores.push((name, store));
        }
    }

    pub fn get(&self, name: &str) -> Option<&NetcdfStore> {
        self.stores.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut NetcdfStore> {
        self.stores
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
    }

    /// Name of the default (first-added) source.
    pub fn default_name(&self) -> Option<&str> {
        self.stores.first().map(|(n, _)| n.as_str())
    }

    /// Close a source and hand it back to the caller. The slicing subsystem
    /// never calls this: closing is the session owner's responsibility.
    pub fn remove(&mut self, name: &str) -> Option<NetcdfStore> {
        let idx = self.stores.iter().position(|(n, _)| n == name)?;
        Some(self.stores.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NetcdfStore)> {
        self.stores.iter().map(|(n, s)| (n.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Resolve a source reference, falling back to the given default.
    pub fn resolve_source(&self, explicit: Option<&str>, default: &str) -> Result<&NetcdfStore> {
        let name = explicit.unwrap_or(default);
        self.get(name)
            .ok_or_else(|| NcplotError::UnknownSource(name.to_string()))
    }
}

/// Parse a CF time-unit string like `"days since 2000-01-01 00:00:00"` into
/// (seconds per unit, epoch).
pub fn parse_time_units(units: &str) -> Option<(f64, NaiveDateTime)> {
    let mut parts = units.splitn(2, " since ");
    let unit = parts.next()?.trim().to_ascii_lowercase();
    let epoch_text = parts.next()?.trim();
    let seconds = match unit.as_str() {
        "seconds" | "second" | "s" => 1.0,
        "minutes" | "minute" | "min" => 60.0,
        "hours" | "hour" | "h" => 3600.0,
        "days" | "day" | "d" => 86400.0,
        _ => return None,
    };
    let epoch = NaiveDateTime::parse_from_str(epoch_text, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(epoch_text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    Some((seconds, epoch))
}

fn attribute_to_string(value: &netcdf::AttributeValue) -> String {
    use netcdf::AttributeValue::*;
    match value {
        Str(s) => s.clone(),
        Strs(v) => v.join(", "),
        other => attribute_to_f64(other)
            .map(|x| format!("{x}"))
            .unwrap_or_else(|| format!("{other:?}")),
    }
}

fn attribute_to_f64(value: &netcdf::AttributeValue) -> Option<f64> {
    use netcdf::AttributeValue::*;
    match value {
        Uchar(x) => Some(*x as f64),
        Schar(x) => Some(*x as f64),
        Ushort(x) => Some(*x as f64),
        Short(x) => Some(*x as f64),
        Uint(x) => Some(*x as f64),
        Int(x) => Some(*x as f64),
        Ulonglong(x) => Some(*x as f64),
        Longlong(x) => Some(*x as f64),
        Float(x) => Some(*x as f64),
        Double(x) => Some(*x),
        Uchars(v) => v.first().map(|x| *x as f64),
        Schars(v) => v.first().map(|x| *x as f64),
        Ushorts(v) => v.first().map(|x| *x as f64),
        Shorts(v) => v.first().map(|x| *x as f64),
        Uints(v) => v.first().map(|x| *x as f64),
        Ints(v) => v.first().map(|x| *x as f64),
        Ulonglongs(v) => v.first().map(|x| *x as f64),
        Longlongs(v) => v.first().map(|x| *x as f64),
        Floats(v) => v.first().map(|x| *x as f64),
        Doubles(v) => v.first().copied(),
        _ => None,
    }
}
