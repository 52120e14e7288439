//! # Slice Specification Module
//!
//! A [`SliceSpec`] fixes zero or more dimensions of a variable to single
//! indices (or to index ranges, for batch reduction), reducing its
//! dimensionality for display. The number of dimensions left free decides
//! what can be plotted — a pure function of counts captured by
//! [`PlotShape`].

use crate::expr::IndexSel;
use crate::handle::VariableHandle;

/// Selection applied to one sliced dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimSelection {
    /// Fixed index: the dimension collapses and no longer counts as free.
    Index(usize),
    /// Half-open index range: the dimension is kept in slabs (used by the
    /// range scanner to walk a sliced dimension one step at a time).
    Range(usize, usize),
}

/// Ordered mapping from dimension name to a selection. Dimensions absent from
/// the spec remain free.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceSpec {
    entries: Vec<(String, DimSelection)>,
}

impl SliceSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default spec for a variable: every singleton dimension (declared
    /// length 1) is sliced at index 0 so it never counts as free.
    pub fn auto_singletons(dims: &[String], shape: &[Option<usize>]) -> Self {
        let mut spec = Self::new();
        for (dim, len) in dims.iter().zip(shape) {
            if *len == Some(1) {
                spec.set(dim, DimSelection::Index(0));
            }
        }
        spec
    }

    /// Set or replace the selection for a dimension.
    pub fn set(&mut self, dim: &str, sel: DimSelection) {
        if let Some(entry) = self.entries.iter_mut().find(|(d, _)| d == dim) {
            entry.1 = sel;
        } else {
            self.entries.push((dim.to_string(), sel));
        }
    }

    /// Drop the selection for a dimension, making it free again.
    pub fn remove(&mut self, dim: &str) -> Option<DimSelection> {
        let idx = self.entries.iter().position(|(d, _)| d == dim)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn get(&self, dim: &str) -> Option<DimSelection> {
        self.entries
            .iter()
            .find(|(d, _)| d == dim)
            .map(|(_, s)| *s)
    }

    pub fn contains(&self, dim: &str) -> bool {
        self.get(dim).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DimSelection)> {
        self.entries.iter().map(|(d, s)| (d.as_str(), *s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of dimensions fixed to a single index.
    pub fn indexed_dims(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, s)| matches!(s, DimSelection::Index(_)))
            .map(|(d, _)| d.clone())
            .collect()
    }

    /// Dimensions of `dims` left free by this spec (index selections only;
    /// range selections keep their dimension in slabs).
    pub fn free_dims(&self, dims: &[String]) -> Vec<String> {
        dims.iter()
            .filter(|d| !matches!(self.get(d), Some(DimSelection::Index(_))))
            .cloned()
            .collect()
    }

    /// Restrict the spec to selections whose dimension occurs in `dims`.
    pub fn restricted_to(&self, dims: &[String]) -> SliceSpec {
        SliceSpec {
            entries: self
                .entries
                .iter()
                .filter(|(d, _)| dims.contains(d))
                .cloned()
                .collect(),
        }
    }
}

/// Plot eligibility, decided purely by the free-dimension count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotShape {
    /// No free dimensions: a scalar, shown as text.
    Scalar,
    /// One free dimension: line/profile plot.
    Line,
    /// Two free dimensions: image/map plot.
    Map,
    /// More than two free dimensions: this many more must be sliced.
    NeedMoreSlices(usize),
}

impl PlotShape {
    pub fn from_free_count(free: usize) -> Self {
        match free {
            0 => PlotShape::Scalar,
            1 => PlotShape::Line,
            2 => PlotShape::Map,
            n => PlotShape::NeedMoreSlices(n - 2),
        }
    }

    pub fn is_plottable(self) -> bool {
        matches!(self, PlotShape::Line | PlotShape::Map)
    }
}

/// Derive a new expression string with the spec applied.
///
/// Handles that support native slicing (expressions) get the indices pushed
/// into each variable reference and are re-serialized; a plain variable gets
/// an explicit bracketed suffix appended to its name.
pub fn apply_slice(expression: &str, handle: &VariableHandle, spec: &SliceSpec) -> String {
    let relevant = spec.restricted_to(handle.dimensions());
    if relevant.is_empty() {
        return expression.to_string();
    }
    if let Some(native) = handle.native_slicing() {
        return native.sliced_expression(&relevant);
    }
    let sels: Vec<String> = handle
        .dimensions()
        .iter()
        .map(|dim| selection_text(relevant.get(dim)))
        .collect();
    format!("{}[{}]", handle.reference_text(), sels.join(","))
}

fn selection_text(sel: Option<DimSelection>) -> String {
    match sel {
        Some(DimSelection::Index(i)) => i.to_string(),
        Some(DimSelection::Range(a, b)) => format!("{a}:{b}"),
        None => ":".to_string(),
    }
}

impl DimSelection {
    /// The equivalent bracketed-suffix selection.
    pub fn to_index_sel(self) -> IndexSel {
        match self {
            DimSelection::Index(i) => IndexSel::Index(i),
            DimSelection::Range(a, b) => IndexSel::Range(Some(a), Some(b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_free_dim_count_is_d_minus_s() {
        let all = dims(&["time", "depth", "lat", "lon"]);
        let mut spec = SliceSpec::new();
        for (s, expected) in [(0usize, 4usize), (1, 3), (2, 2), (3, 1), (4, 0)] {
            assert_eq!(spec.free_dims(&all).len(), expected);
            if s < all.len() {
                spec.set(&all[s], DimSelection::Index(0));
            }
        }
    }

    #[test]
    fn test_plot_shape_policy() {
        assert_eq!(PlotShape::from_free_count(0), PlotShape::Scalar);
        assert_eq!(PlotShape::from_free_count(1), PlotShape::Line);
        assert_eq!(PlotShape::from_free_count(2), PlotShape::Map);
        assert_eq!(PlotShape::from_free_count(5), PlotShape::NeedMoreSlices(3));
        assert!(PlotShape::from_free_count(1).is_plottable());
        assert!(!PlotShape::from_free_count(0).is_plottable());
    }

    #[test]
    fn test_auto_singletons() {
        let names = dims(&["time", "lat", "lon"]);
        let shape = vec![Some(10), Some(1), Some(1)];
        let spec = SliceSpec::auto_singletons(&names, &shape);
        assert_eq!(spec.get("lat"), Some(DimSelection::Index(0)));
        assert_eq!(spec.get("lon"), Some(DimSelection::Index(0)));
        assert!(!spec.contains("time"));
        assert_eq!(spec.free_dims(&names), dims(&["time"]));
    }

    #[test]
    fn test_range_selection_keeps_dimension_free_for_counting() {
        let names = dims(&["time", "depth"]);
        let mut spec = SliceSpec::new();
        spec.set("time", DimSelection::Range(3, 4));
        assert_eq!(spec.free_dims(&names).len(), 2);
        spec.set("time", DimSelection::Index(3));
        assert_eq!(spec.free_dims(&names).len(), 1);
    }
}
