//! # Figure Module
//!
//! The figure model and the controller that keeps it consistent as slices
//! change. A [`Figure`] owns the displayed series (each bound to one
//! normalized sliced expression, its "secondary id"), per-axis bounds,
//! title, corner texts and the batched-update flag. The
//! [`FigureSeriesController`] implements the redraw pipeline: re-resolve,
//! re-slice, rebind series while preserving user display properties, clear
//! or scan axis bounds, and recompute dynamic titles.

use crate::error::{NcplotError, Result};
use crate::expr;
use crate::handle::{self, DataSlab};
use crate::scan::{ProgressSink, RangeScanner, ScanBounds};
use crate::slice::{apply_slice, DimSelection, PlotShape, SliceSpec};
use crate::store::StoreRegistry;
use crate::title;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Line style of a plotted series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStyle {
    #[default]
    Solid,
    Dashed,
    Dotted,
}

/// User-configurable display properties of a series. These survive rebinding
/// when the underlying expression changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesStyle {
    pub label: Option<String>,
    /// `#rrggbb` hex color.
    pub color: Option<String>,
    pub line_width: Option<f64>,
    pub line_style: Option<LineStyle>,
}

/// One displayed series: a secondary id (the normalized sliced expression it
/// shows) plus display properties.
#[derive(Debug, Clone)]
pub struct Series {
    expression: String,
    pub style: SeriesStyle,
}

impl Series {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            style: SeriesStyle::default(),
        }
    }

    /// The expression string identifying what this series displays.
    pub fn secondary_id(&self) -> &str {
        &self.expression
    }

    /// Copy display properties from another series — explicitly excluding
    /// the data binding itself.
    pub fn copy_display_from(&mut self, other: &Series) {
        self.style = other.style.clone();
    }
}

/// Per-axis configuration: optional label and bounds, plus the dimensions
/// (or the data key) whose value range the axis displays.
#[derive(Debug, Clone, Default)]
pub struct AxisConfig {
    pub label: Option<String>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    /// Dimension names (or the plotted expression for the data axis) this
    /// axis is bound to; derived on redraw.
    pub dimensions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VAlign {
    Top,
    Center,
    Bottom,
}

/// Free-floating figure text, in relative figure coordinates (0..1).
#[derive(Debug, Clone)]
pub struct FigureText {
    pub x: f64,
    pub y: f64,
    pub horizontal: HAlign,
    pub vertical: VAlign,
    pub text: String,
}

impl FigureText {
    /// Identifier text anchored to the lower-right figure corner.
    pub fn corner_id(text: impl Into<String>) -> Self {
        Self {
            x: 0.99,
            y: 0.01,
            horizontal: HAlign::Right,
            vertical: VAlign::Bottom,
            text: text.into(),
        }
    }
}

/// The displayed figure: series, axes, title, texts and the batched-update
/// flag that defers derived-state recomputation during structural changes.
pub struct Figure {
    pub title: Option<String>,
    /// Width and height in inches; raster size is scaled by the export DPI.
    pub width: f64,
    pub height: f64,
    pub font_family: String,
    pub font_size: f64,
    series: Vec<Series>,
    axes: BTreeMap<String, AxisConfig>,
    pub texts: Vec<FigureText>,
    updating: bool,
    dirty: bool,
}

impl Default for Figure {
    fn default() -> Self {
        let mut axes = BTreeMap::new();
        for id in ["x", "y", "c"] {
            axes.insert(id.to_string(), AxisConfig::default());
        }
        Self {
            title: None,
            width: 10.0,
            height: 8.0,
            font_family: "sans-serif".to_string(),
            font_size: 12.0,
            series: Vec::new(),
            axes,
            texts: Vec::new(),
            updating: true,
            dirty: false,
        }
    }
}

impl Figure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable updating, returning the previous state. While
    /// disabled, structural changes only mark the figure dirty; re-enabling
    /// settles the deferred recomputation so observers never see a
    /// half-updated figure.
    pub fn set_updating(&mut self, updating: bool) -> bool {
        let previous = self.updating;
        self.updating = updating;
        if updating {
            self.dirty = false;
        }
        previous
    }

    pub fn is_updating(&self) -> bool {
        self.updating
    }

    fn mark_dirty(&mut self) {
        if !self.updating {
            self.dirty = true;
        }
    }

    pub fn series(&self) -> &[Series] {
        &self.series
    }

    pub fn series_mut(&mut self, index: usize) -> Option<&mut Series> {
        self.series.get_mut(index)
    }

    pub fn add_series(&mut self, expression: impl Into<String>) -> usize {
        self.mark_dirty();
        self.series.push(Series::new(expression));
        self.series.len() - 1
    }

    /// Replace the series at `index`, keeping its position so sibling series
    /// indices stay stable.
    pub fn set_series(&mut self, index: usize, series: Series) {
        self.mark_dirty();
        self.series[index] = series;
    }

    pub fn remove_series(&mut self, index: usize) -> Series {
        self.mark_dirty();
        self.series.remove(index)
    }

    pub fn axis(&self, id: &str) -> Option<&AxisConfig> {
        self.axes.get(id)
    }

    pub fn axis_mut(&mut self, id: &str) -> &mut AxisConfig {
        self.mark_dirty();
        self.axes.entry(id.to_string()).or_default()
    }

    pub fn axes(&self) -> impl Iterator<Item = (&str, &AxisConfig)> {
        self.axes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Clear every axis minimum/maximum so bounds recompute from the
    /// currently displayed data. Time axes share the numeric storage, so
    /// they are covered too.
    pub fn clear_axis_bounds(&mut self) {
        self.mark_dirty();
        for axis in self.axes.values_mut() {
            axis.minimum = None;
            axis.maximum = None;
        }
    }

    /// Bind axes to the slab dimensions: one free dimension plots
    /// coordinate-vs-value, two plot a map with the value on the color axis.
    pub fn bind_axes(&mut self, slab_dims: &[String], data_key: &str) {
        self.mark_dirty();
        match slab_dims {
            [x] => {
                self.axes.entry("x".into()).or_default().dimensions = vec![x.clone()];
                self.axes.entry("y".into()).or_default().dimensions =
                    vec![data_key.to_string()];
                self.axes.entry("c".into()).or_default().dimensions = Vec::new();
            }
            [y, x] => {
                self.axes.entry("x".into()).or_default().dimensions = vec![x.clone()];
                self.axes.entry("y".into()).or_default().dimensions = vec![y.clone()];
                self.axes.entry("c".into()).or_default().dimensions =
                    vec![data_key.to_string()];
            }
            _ => {}
        }
    }

    /// Assign scanned bounds to every axis whose dimension binding matched a
    /// scanned dimension (or the data key). A minimum above the maximum —
    /// possible when an axis is inverted by convention — is swapped before
    /// assignment.
    pub fn apply_scan_bounds(&mut self, bounds: &ScanBounds, data_key: &str) {
        self.mark_dirty();
        for axis in self.axes.values_mut() {
            if axis.dimensions.is_empty() {
                continue;
            }
            let mut lo: Option<f64> = None;
            let mut hi: Option<f64> = None;
            for dim in &axis.dimensions {
                let (dmin, dmax) = if dim == data_key {
                    (bounds.data_min, bounds.data_max)
                } else {
                    match bounds.dim_bounds(dim) {
                        Some(b) => b,
                        None => continue,
                    }
                };
                if let Some(v) = dmin {
                    lo = Some(lo.map_or(v, |cur| cur.min(v)));
                }
                if let Some(v) = dmax {
                    hi = Some(hi.map_or(v, |cur| cur.max(v)));
                }
            }
            if let (Some(a), Some(b)) = (lo, hi)
                && a > b
            {
                (lo, hi) = (Some(b), Some(a));
            }
            axis.minimum = lo;
            axis.maximum = hi;
        }
    }

    /// Assign a value to a hierarchical property path such as `/Title`,
    /// `Axes/y/Maximum` or `Data/Series[0]/Label`. Quotes around string
    /// values are stripped; an empty value clears optional properties.
    pub fn set_property(&mut self, path: &str, value: &str) -> Result<()> {
        self.mark_dirty();
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        let value = unquote(value);
        let parse_f64 = |path: &str, value: &str| -> Result<f64> {
            value.parse::<f64>().map_err(|_| NcplotError::PropertyValue {
                path: path.to_string(),
                value: value.to_string(),
                reason: "not a number".to_string(),
            })
        };
        let optional_f64 = |path: &str, value: &str| -> Result<Option<f64>> {
            if value.is_empty() || value.eq_ignore_ascii_case("none") {
                Ok(None)
            } else {
                parse_f64(path, value).map(Some)
            }
        };

        match segments.as_slice() {
            ["Title"] => {
                self.title = (!value.is_empty()).then(|| value.to_string());
            }
            ["Width"] => self.width = parse_f64(path, value)?,
            ["Height"] => self.height = parse_f64(path, value)?,
            ["Font", "Family"] => self.font_family = value.to_string(),
            ["Font", "Size"] => self.font_size = parse_f64(path, value)?,
            ["Axes", id, field] => {
                let axis = self.axes.entry((*id).to_string()).or_default();
                match *field {
                    "Minimum" => axis.minimum = optional_f64(path, value)?,
                    "Maximum" => axis.maximum = optional_f64(path, value)?,
                    "Label" => axis.label = (!value.is_empty()).then(|| value.to_string()),
                    _ => return Err(NcplotError::Property { path: path.to_string() }),
                }
            }
            ["Data", series, field] => {
                let index = parse_series_segment(series)
                    .ok_or_else(|| NcplotError::Property { path: path.to_string() })?;
                let series = self.series.get_mut(index).ok_or_else(|| {
                    NcplotError::PropertyValue {
                        path: path.to_string(),
                        value: value.to_string(),
                        reason: format!("figure has no series {index}"),
                    }
                })?;
                match *field {
                    "Label" => series.style.label = Some(value.to_string()),
                    "Color" => series.style.color = Some(value.to_string()),
                    "LineWidth" => series.style.line_width = Some(parse_f64(path, value)?),
                    "LineStyle" => {
                        series.style.line_style = Some(match value {
                            "solid" => LineStyle::Solid,
                            "dashed" => LineStyle::Dashed,
                            "dotted" => LineStyle::Dotted,
                            other => {
                                return Err(NcplotError::PropertyValue {
                                    path: path.to_string(),
                                    value: other.to_string(),
                                    reason: "expected solid, dashed or dotted".to_string(),
                                });
                            }
                        });
                    }
                    _ => return Err(NcplotError::Property { path: path.to_string() }),
                }
            }
            _ => return Err(NcplotError::Property { path: path.to_string() }),
        }
        Ok(())
    }
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// `Series[3]` -> 3
fn parse_series_segment(segment: &str) -> Option<usize> {
    segment
        .strip_prefix("Series[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Figure settings document (JSON or YAML by file extension). Series entries
/// with an expression are plotted; entries without one are "unlinked"
/// templates whose display properties are adopted by subsequently added
/// series, in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FigureSettings {
    pub title: Option<String>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub font_family: Option<String>,
    pub font_size: Option<f64>,
    pub axes: BTreeMap<String, AxisSettings>,
    pub series: Vec<SeriesSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisSettings {
    pub label: Option<String>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesSettings {
    /// Expression to plot; absent for an unlinked display-property template.
    pub expression: Option<String>,
    /// Source name the expression resolves against; defaults to the default
    /// source.
    pub source: Option<String>,
    pub label: Option<String>,
    pub color: Option<String>,
    pub line_width: Option<f64>,
    pub line_style: Option<LineStyle>,
}

impl SeriesSettings {
    pub fn style(&self) -> SeriesStyle {
        SeriesStyle {
            label: self.label.clone(),
            color: self.color.clone(),
            line_width: self.line_width,
            line_style: self.line_style,
        }
    }
}

impl FigureSettings {
    /// Load from a JSON or YAML file, decided by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| NcplotError::PropertyValue {
                path: path.display().to_string(),
                value: String::new(),
                reason: format!("invalid figure settings: {e}"),
            })
        } else {
            serde_json::from_str(&content).map_err(|e| NcplotError::PropertyValue {
                path: path.display().to_string(),
                value: String::new(),
                reason: format!("invalid figure settings: {e}"),
            })
        }
    }

    /// Apply scalar settings to the figure; returns the expression-bearing
    /// series entries (to be plotted) and the unlinked templates.
    pub fn apply_to(&self, figure: &mut Figure) -> (Vec<SeriesSettings>, Vec<SeriesStyle>) {
        if let Some(title) = &self.title {
            figure.title = Some(title.clone());
        }
        if let Some(width) = self.width {
            figure.width = width;
        }
        if let Some(height) = self.height {
            figure.height = height;
        }
        if let Some(family) = &self.font_family {
            figure.font_family = family.clone();
        }
        if let Some(size) = self.font_size {
            figure.font_size = size;
        }
        for (id, axis) in &self.axes {
            let target = figure.axis_mut(id);
            if axis.label.is_some() {
                target.label = axis.label.clone();
            }
            if axis.minimum.is_some() {
                target.minimum = axis.minimum;
            }
            if axis.maximum.is_some() {
                target.maximum = axis.maximum;
            }
        }
        let mut linked = Vec::new();
        let mut unlinked = Vec::new();
        for entry in &self.series {
            if entry.expression.is_some() {
                linked.push(entry.clone());
            } else {
                unlinked.push(entry.style());
            }
        }
        (linked, unlinked)
    }
}

/// Dynamic-title configuration carried while an animation has the option
/// enabled.
#[derive(Debug, Clone)]
pub struct DynamicTitle {
    pub dimension: String,
    pub format: String,
}

/// What a redraw concluded about the current selection.
#[derive(Debug, Clone, PartialEq)]
pub enum RedrawOutcome {
    /// The figure shows the (re)bound series.
    Plotted,
    /// Zero free dimensions: the formatted scalar value, shown as text.
    Scalar(String),
    /// This many additional dimensions must be sliced before plotting.
    NeedMoreSlices(usize),
    /// Nothing is selected.
    NoSelection,
}

struct SeriesBinding {
    base: String,
    source: String,
    spec: SliceSpec,
    bound_id: String,
}

/// Owns the mapping from resolved, sliced expressions to plotted series and
/// keeps the figure consistent across slice changes, range scans and
/// animation steps. Resolution failures abort an update without touching the
/// figure, so the last-good state stays visible.
pub struct FigureSeriesController {
    figure: Figure,
    bindings: Vec<SeriesBinding>,
    primary: Option<usize>,
    dynamic_title: Option<DynamicTitle>,
}

/// Result of binding a new expression to the figure.
#[derive(Debug, Clone, PartialEq)]
pub enum AddSeriesOutcome {
    Plotted(usize),
    Scalar(String),
    NeedMoreSlices(usize),
}

impl FigureSeriesController {
    pub fn new(figure: Figure) -> Self {
        Self {
            figure,
            bindings: Vec::new(),
            primary: None,
            dynamic_title: None,
        }
    }

    pub fn figure(&self) -> &Figure {
        &self.figure
    }

    pub fn figure_mut(&mut self) -> &mut Figure {
        &mut self.figure
    }

    pub fn into_figure(self) -> Figure {
        self.figure
    }

    /// Resolve an expression and bind it to the figure with an automatic
    /// singleton slice spec. A display-property template (e.g. an unlinked
    /// series from a settings file) may be supplied.
    pub fn add_series(
        &mut self,
        registry: &StoreRegistry,
        source: &str,
        expression: &str,
        label: Option<&str>,
        template: Option<&SeriesStyle>,
    ) -> Result<AddSeriesOutcome> {
        let resolved = handle::resolve(expression, registry, source)?;
        let spec = SliceSpec::auto_singletons(resolved.dimensions(), resolved.shape());
        let free = spec.free_dims(resolved.dimensions()).len();
        match PlotShape::from_free_count(free) {
            PlotShape::Scalar => {
                let sliced = apply_slice(expression, &resolved, &spec);
                let scalar = handle::resolve(&sliced, registry, source)?;
                let slab = scalar.slab(registry, source, &SliceSpec::new())?;
                return Ok(AddSeriesOutcome::Scalar(format_scalar(&slab)));
            }
            PlotShape::NeedMoreSlices(n) => return Ok(AddSeriesOutcome::NeedMoreSlices(n)),
            PlotShape::Line | PlotShape::Map => {}
        }

        let sliced = apply_slice(expression, &resolved, &spec);
        let normalized = normalize_expression(&sliced, registry, source)?;
        let index = self.figure.add_series(normalized.clone());
        if let Some(template) = template {
            self.figure.series_mut(index).expect("new series").style = template.clone();
        }
        if let Some(label) = label {
            self.figure.series_mut(index).expect("new series").style.label =
                Some(label.to_string());
        }
        self.bindings.push(SeriesBinding {
            base: expression.to_string(),
            source: source.to_string(),
            spec,
            bound_id: normalized.clone(),
        });
        if self.primary.is_none() {
            self.primary = Some(index);
            let free_dims = self.bindings[index]
                .spec
                .free_dims(resolved.dimensions());
            self.figure.bind_axes(&free_dims, &normalized);
        }
        Ok(AddSeriesOutcome::Plotted(index))
    }

    pub fn select_primary(&mut self, index: usize) {
        if index < self.bindings.len() {
            self.primary = Some(index);
        }
    }

    pub fn primary_index(&self) -> Option<usize> {
        self.primary
    }

    /// Change one slice selection on the primary series and redraw. A change
    /// to *which* dimensions are sliced resets axis bounds; moving an index
    /// along an already-sliced dimension preserves them.
    pub fn set_slice(
        &mut self,
        registry: &StoreRegistry,
        dim: &str,
        sel: Option<DimSelection>,
    ) -> Result<RedrawOutcome> {
        let Some(primary) = self.primary else {
            return Ok(RedrawOutcome::NoSelection);
        };
        let dims_changed = match sel {
            Some(sel) => {
                let binding = &mut self.bindings[primary];
                let had = binding.spec.contains(dim);
                binding.spec.set(dim, sel);
                !had
            }
            None => {
                let removed = self.bindings[primary].spec.remove(dim).is_some();
                // Deselecting the animated dimension destroys the animation
                // state tied to it.
                if removed && self.dynamic_title.as_ref().is_some_and(|dt| dt.dimension == dim) {
                    self.set_dynamic_title(None);
                }
                removed
            }
        };
        self.redraw(registry, true, !dims_changed)
    }

    pub fn primary_slice(&self) -> Option<&SliceSpec> {
        self.primary.map(|i| &self.bindings[i].spec)
    }

    /// Enable or disable the dynamic title. Disabling clears a previously
    /// animated title.
    pub fn set_dynamic_title(&mut self, dynamic_title: Option<DynamicTitle>) {
        if dynamic_title.is_none() && self.dynamic_title.is_some() {
            self.figure.title = None;
        }
        self.dynamic_title = dynamic_title;
    }

    pub fn dynamic_title(&self) -> Option<&DynamicTitle> {
        self.dynamic_title.as_ref()
    }

    /// Redraw the primary series per the current slice spec.
    ///
    /// With `preserve_properties`, a series bound to a different expression
    /// is replaced by a new one carrying the old display properties; without
    /// it the series is rebuilt fresh. Without `preserve_axes_bounds` all
    /// axis bounds are cleared so they recompute from the new data. The
    /// figure stays in non-updating mode for the duration.
    pub fn redraw(
        &mut self,
        registry: &StoreRegistry,
        preserve_properties: bool,
        preserve_axes_bounds: bool,
    ) -> Result<RedrawOutcome> {
        let Some(primary) = self.primary else {
            return Ok(RedrawOutcome::NoSelection);
        };
        let (base, source) = {
            let b = &self.bindings[primary];
            (b.base.clone(), b.source.clone())
        };

        // Resolve before mutating anything: a failure here must leave the
        // previously displayed series intact.
        let resolved = handle::resolve(&base, registry, &source)?;
        let spec = self.bindings[primary]
            .spec
            .restricted_to(resolved.dimensions());
        let free = spec.free_dims(resolved.dimensions()).len();
        match PlotShape::from_free_count(free) {
            PlotShape::Scalar => {
                let sliced = apply_slice(&base, &resolved, &spec);
                let scalar = handle::resolve(&sliced, registry, &source)?;
                let slab = scalar.slab(registry, &source, &SliceSpec::new())?;
                return Ok(RedrawOutcome::Scalar(format_scalar(&slab)));
            }
            PlotShape::NeedMoreSlices(n) => return Ok(RedrawOutcome::NeedMoreSlices(n)),
            PlotShape::Line | PlotShape::Map => {}
        }

        let sliced = apply_slice(&base, &resolved, &spec);
        let normalized = normalize_expression(&sliced, registry, &source)?;
        let title = match &self.dynamic_title {
            Some(dt) => {
                let store = registry
                    .get(&source)
                    .ok_or_else(|| NcplotError::UnknownSource(source.clone()))?;
                title::format_title(store, &spec, &dt.dimension, &dt.format)?
            }
            None => None,
        };

        let previous = self.figure.set_updating(false);
        if preserve_properties {
            if self.figure.series()[primary].secondary_id() != normalized {
                let mut replacement = Series::new(normalized.clone());
                replacement.copy_display_from(&self.figure.series()[primary]);
                self.figure.set_series(primary, replacement);
            }
        } else {
            self.figure.set_series(primary, Series::new(normalized.clone()));
        }
        if !preserve_axes_bounds {
            self.figure.clear_axis_bounds();
        }
        if let Some(title) = title {
            self.figure.title = Some(title);
        }
        let free_dims = spec.free_dims(resolved.dimensions());
        self.figure.bind_axes(&free_dims, &normalized);
        self.bindings[primary].spec = spec;
        self.bindings[primary].bound_id = normalized;
        self.figure.set_updating(previous);
        Ok(RedrawOutcome::Plotted)
    }

    /// Apply an animation frame index to every series that spans the
    /// dimension, rebinding only the series whose derived expression actually
    /// changed. Returns whether anything changed.
    pub fn set_frame(
        &mut self,
        registry: &StoreRegistry,
        dimension: &str,
        index: usize,
    ) -> Result<bool> {
        let previous = self.figure.set_updating(false);
        let result = self.apply_frame(registry, dimension, index);
        self.figure.set_updating(previous);
        result
    }

    fn apply_frame(
        &mut self,
        registry: &StoreRegistry,
        dimension: &str,
        index: usize,
    ) -> Result<bool> {
        let mut changed = false;
        for i in 0..self.bindings.len() {
            let (base, source) = {
                let b = &self.bindings[i];
                (b.base.clone(), b.source.clone())
            };
            let resolved = handle::resolve(&base, registry, &source)?;
            if !resolved.dimensions().iter().any(|d| d == dimension) {
                continue;
            }
            self.bindings[i]
                .spec
                .set(dimension, DimSelection::Index(index));
            let sliced = apply_slice(&base, &resolved, &self.bindings[i].spec);
            let normalized = normalize_expression(&sliced, registry, &source)?;
            if normalized != self.bindings[i].bound_id {
                let mut replacement = Series::new(normalized.clone());
                replacement.copy_display_from(&self.figure.series()[i]);
                self.figure.set_series(i, replacement);
                self.bindings[i].bound_id = normalized;
                changed = true;
            }
        }
        if changed
            && let Some(dt) = self.dynamic_title.clone()
            && let Some(primary) = self.primary
        {
            let (spec, source) = {
                let b = &self.bindings[primary];
                (b.spec.clone(), b.source.clone())
            };
            let store = registry
                .get(&source)
                .ok_or_else(|| NcplotError::UnknownSource(source.clone()))?;
            if let Some(title) = title::format_title(store, &spec, &dt.dimension, &dt.format)? {
                self.figure.title = Some(title);
            }
        }
        Ok(changed)
    }

    /// Recompute axis bounds from the global value range across sliced
    /// dimensions: all of them, or a single requested one (the rest staying
    /// fixed at their current indices). Cancellation yields the partial
    /// bounds accumulated so far.
    pub fn set_axes_bounds(
        &mut self,
        registry: &StoreRegistry,
        dimension: Option<&str>,
        sink: &mut dyn ProgressSink,
    ) -> Result<ScanBounds> {
        let Some(primary) = self.primary else {
            return Err(NcplotError::Dimensionality("no series selected".to_string()));
        };
        let (base, source, spec, bound_id) = {
            let b = &self.bindings[primary];
            (b.base.clone(), b.source.clone(), b.spec.clone(), b.bound_id.clone())
        };

        let (iterate, fixed) = match dimension {
            Some(dim) => {
                let mut fixed = spec.clone();
                fixed.remove(dim);
                (vec![dim.to_string()], fixed)
            }
            None => (spec.indexed_dims(), SliceSpec::new()),
        };

        let scanner = RangeScanner::new(registry, &source);
        let bounds = scanner.scan(&base, &iterate, &fixed, sink)?;

        let previous = self.figure.set_updating(false);
        self.figure.apply_scan_bounds(&bounds, &bound_id);
        self.figure.set_updating(previous);
        Ok(bounds)
    }

    /// Resolve every bound series to its slab. Each call re-resolves: two
    /// textually different expressions are never deduplicated.
    pub fn slabs(&self, registry: &StoreRegistry) -> Result<Vec<(SeriesStyle, DataSlab)>> {
        let mut out = Vec::with_capacity(self.bindings.len());
        for (i, binding) in self.bindings.iter().enumerate() {
            let resolved = handle::resolve(&binding.bound_id, registry, &binding.source)?;
            let slab = resolved.slab(registry, &binding.source, &SliceSpec::new())?;
            out.push((self.figure.series()[i].style.clone(), slab));
        }
        Ok(out)
    }

    /// Export the figure to a raster file at the given resolution.
    pub fn export(&self, registry: &StoreRegistry, path: &Path, dpi: u32) -> Result<()> {
        let slabs = self.slabs(registry)?;
        crate::render::export_figure(&self.figure, &slabs, path, dpi)
    }

    /// Textual description of the figure, used when no output path is given.
    pub fn preview(&self, registry: &StoreRegistry) -> Result<String> {
        let slabs = self.slabs(registry)?;
        let mut lines = Vec::new();
        if let Some(title) = &self.figure.title {
            lines.push(format!("Title: {title}"));
        }
        for ((style, slab), series) in slabs.iter().zip(self.figure.series()) {
            let kind = match slab.ndim() {
                1 => "line",
                2 => "map",
                _ => "unsupported",
            };
            let label = style
                .label
                .clone()
                .unwrap_or_else(|| series.secondary_id().to_string());
            let range = match slab.data_min_max() {
                Some((lo, hi)) => format!("{lo:.6} .. {hi:.6}"),
                None => "all masked".to_string(),
            };
            lines.push(format!(
                "{label}: {kind} over [{}], shape {:?}, values {range}{}",
                slab.dims.join(", "),
                slab.shape(),
                if slab.unit.is_empty() {
                    String::new()
                } else {
                    format!(" {}", slab.unit)
                }
            ));
        }
        for (id, axis) in self.figure.axes() {
            if axis.minimum.is_some() || axis.maximum.is_some() {
                lines.push(format!(
                    "axis {id}: {} .. {}",
                    axis.minimum.map_or("auto".to_string(), |v| v.to_string()),
                    axis.maximum.map_or("auto".to_string(), |v| v.to_string()),
                ));
            }
        }
        Ok(lines.join("\n"))
    }
}

fn normalize_expression(text: &str, registry: &StoreRegistry, source: &str) -> Result<String> {
    expr::normalize(text).map_err(|message| {
        NcplotError::expression(
            message,
            source,
            registry
                .get(source)
                .map(|s| s.variable_names())
                .unwrap_or_default(),
        )
    })
}

fn format_scalar(slab: &DataSlab) -> String {
    let suffix = if slab.unit.is_empty() {
        String::new()
    } else {
        format!(" {}", slab.unit)
    };
    let values: Vec<String> = slab.data.iter().map(|v| format!("{v}{suffix}")).collect();
    values.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_updating_returns_previous() {
        let mut figure = Figure::new();
        assert!(figure.set_updating(false));
        assert!(!figure.set_updating(false));
        assert!(!figure.set_updating(true));
        assert!(figure.is_updating());
    }

    #[test]
    fn test_series_copy_display_excludes_binding() {
        let mut old = Series::new("temp[0,:]");
        old.style.label = Some("surface".to_string());
        old.style.color = Some("#ff0000".to_string());
        let mut new = Series::new("temp[1,:]");
        new.copy_display_from(&old);
        assert_eq!(new.secondary_id(), "temp[1,:]");
        assert_eq!(new.style.label.as_deref(), Some("surface"));
        assert_eq!(new.style.color.as_deref(), Some("#ff0000"));
    }

    #[test]
    fn test_property_paths() {
        let mut figure = Figure::new();
        figure.set_property("/Title", "\"my plot\"").unwrap();
        assert_eq!(figure.title.as_deref(), Some("my plot"));
        figure.set_property("Width", "12.5").unwrap();
        assert_eq!(figure.width, 12.5);
        figure.set_property("/Axes/y/Maximum", "10").unwrap();
        assert_eq!(figure.axis("y").unwrap().maximum, Some(10.0));
        figure.set_property("/Axes/y/Maximum", "").unwrap();
        assert_eq!(figure.axis("y").unwrap().maximum, None);
        figure.set_property("/Font/Family", "Times New Roman").unwrap();
        assert_eq!(figure.font_family, "Times New Roman");

        let idx = figure.add_series("temp[0,:]");
        figure
            .set_property(&format!("/Data/Series[{idx}]/Label"), "run A")
            .unwrap();
        assert_eq!(
            figure.series()[idx].style.label.as_deref(),
            Some("run A")
        );

        assert!(matches!(
            figure.set_property("/Nonsense/Path", "1"),
            Err(NcplotError::Property { .. })
        ));
        assert!(matches!(
            figure.set_property("/Width", "wide"),
            Err(NcplotError::PropertyValue { .. })
        ));
    }

    #[test]
    fn test_apply_scan_bounds_swaps_inverted_range() {
        let mut figure = Figure::new();
        figure.bind_axes(&["time".to_string()], "temp[0,:]");
        let bounds = ScanBounds {
            dims: vec!["time".to_string()],
            coord_min: vec![Some(0.0)],
            coord_max: vec![Some(9.0)],
            data_min: Some(10.0),
            data_max: Some(2.0),
            completed: true,
        };
        figure.apply_scan_bounds(&bounds, "temp[0,:]");
        let y = figure.axis("y").unwrap();
        assert_eq!(y.minimum, Some(2.0));
        assert_eq!(y.maximum, Some(10.0));
        let x = figure.axis("x").unwrap();
        assert_eq!(x.minimum, Some(0.0));
        assert_eq!(x.maximum, Some(9.0));
    }

    #[test]
    fn test_clear_axis_bounds() {
        let mut figure = Figure::new();
        figure.axis_mut("x").minimum = Some(1.0);
        figure.axis_mut("x").maximum = Some(2.0);
        figure.clear_axis_bounds();
        assert_eq!(figure.axis("x").unwrap().minimum, None);
        assert_eq!(figure.axis("x").unwrap().maximum, None);
    }

    #[test]
    fn test_figure_settings_split_linked_unlinked() {
        let settings = FigureSettings {
            title: Some("t".to_string()),
            series: vec![
                SeriesSettings {
                    expression: Some("temp".to_string()),
                    ..Default::default()
                },
                SeriesSettings {
                    label: Some("styled".to_string()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let mut figure = Figure::new();
        let (linked, unlinked) = settings.apply_to(&mut figure);
        assert_eq!(figure.title.as_deref(), Some("t"));
        assert_eq!(linked.len(), 1);
        assert_eq!(unlinked.len(), 1);
        assert_eq!(unlinked[0].label.as_deref(), Some("styled"));
    }
}
