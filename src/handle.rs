//! # Variable Handle Module
//!
//! Resolves an expression string against the registry of open sources into a
//! [`VariableHandle`]: either a plain variable reference or a full expression
//! tree. The handle exposes dimension bookkeeping (ordered names, shape,
//! unit) and slab evaluation under a [`SliceSpec`].
//!
//! Resolution is idempotent and side-effect free; it may be repeated for the
//! same text on every redraw. Expressions support native slicing (indices are
//! pushed into each variable reference and the tree is re-serialized); plain
//! variables do not, and get a bracketed suffix appended instead — the
//! distinction is surfaced through the [`NativeSlicing`] capability rather
//! than type inspection at call sites.

use crate::error::{NcplotError, Result};
use crate::expr::{self, BinaryOp, Expr, IndexSel, UnaryOp};
use crate::slice::{DimSelection, SliceSpec};
use crate::store::{DimExtent, NetcdfStore, StoreRegistry};
use ndarray::{ArrayD, IxDyn};
use std::collections::HashMap;

/// Synthetic length used for dimensions whose extent is indeterminate, purely
/// to build slicing index ranges without reading data.
pub const INDETERMINATE_LENGTH: usize = 1_000_000;

/// One evaluated slab: data values plus the per-dimension coordinates and
/// physical unit that later stages (title formatting, range scanning) need.
/// Masked values are NaN.
#[derive(Debug, Clone)]
pub struct DataSlab {
    pub dims: Vec<String>,
    pub data: ArrayD<f64>,
    /// Coordinate values per dimension, index-aligned with `dims`.
    pub coords: Vec<Vec<f64>>,
    /// Physical unit; empty when unknown or mixed.
    pub unit: String,
}

impl DataSlab {
    pub fn scalar(value: f64, unit: impl Into<String>) -> Self {
        Self {
            dims: Vec::new(),
            data: ArrayD::from_shape_vec(IxDyn(&[]), vec![value]).expect("scalar shape"),
            coords: Vec::new(),
            unit: unit.into(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// True when every value in the slab is masked.
    pub fn is_fully_masked(&self) -> bool {
        self.data.iter().all(|v| v.is_nan())
    }

    /// Minimum and maximum over unmasked values, if any exist.
    pub fn data_min_max(&self) -> Option<(f64, f64)> {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut seen = false;
        for &v in self.data.iter() {
            if v.is_finite() {
                min = min.min(v);
                max = max.max(v);
                seen = true;
            }
        }
        seen.then_some((min, max))
    }

    /// Coordinate bounds along one axis.
    pub fn coord_min_max(&self, axis: usize) -> Option<(f64, f64)> {
        let coords = self.coords.get(axis)?;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut seen = false;
        for &c in coords {
            if c.is_finite() {
                min = min.min(c);
                max = max.max(c);
                seen = true;
            }
        }
        seen.then_some((min, max))
    }

    pub fn first_value(&self) -> Option<f64> {
        self.data.iter().next().copied()
    }
}

/// Capability of deriving a sliced expression string by rewriting the
/// expression itself. Plain variables do not implement this; callers append
/// an explicit index suffix instead.
pub trait NativeSlicing {
    fn sliced_expression(&self, spec: &SliceSpec) -> String;
}

/// A bare reference to one variable in one source.
#[derive(Debug, Clone)]
pub struct PlainVariable {
    source: Option<String>,
    name: String,
    dims: Vec<String>,
    shape: Vec<Option<usize>>,
    unit: String,
}

/// A resolved expression tree over one or more variables.
#[derive(Debug, Clone)]
pub struct ExprHandle {
    ast: Expr,
    dims: Vec<String>,
    shape: Vec<Option<usize>>,
    unit: String,
    /// Dimensions of each referenced variable, keyed by reference text.
    var_dims: HashMap<String, Vec<String>>,
}

impl NativeSlicing for ExprHandle {
    fn sliced_expression(&self, spec: &SliceSpec) -> String {
        let rewritten = self.ast.map_variable_indices(&|source, name| {
            let key = reference_key(source, name);
            let var_dims = self.var_dims.get(&key)?;
            Some(
                var_dims
                    .iter()
                    .map(|dim| match spec.get(dim) {
                        Some(sel) => sel.to_index_sel(),
                        None => IndexSel::All,
                    })
                    .collect(),
            )
        });
        rewritten.to_string()
    }
}

/// A named variable or expression resolved against the open sources.
#[derive(Debug)]
pub enum VariableHandle {
    Plain(PlainVariable),
    Expression(ExprHandle),
}

impl VariableHandle {
    /// Ordered distinct dimension names.
    pub fn dimensions(&self) -> &[String] {
        match self {
            VariableHandle::Plain(v) => &v.dims,
            VariableHandle::Expression(e) => &e.dims,
        }
    }

    /// Length per dimension; `None` when indeterminate.
    pub fn shape(&self) -> &[Option<usize>] {
        match self {
            VariableHandle::Plain(v) => &v.shape,
            VariableHandle::Expression(e) => &e.shape,
        }
    }

    /// Shape with indeterminate lengths replaced by the synthetic sentinel,
    /// for building slicing index ranges.
    pub fn ui_shape(&self) -> Vec<usize> {
        self.shape()
            .iter()
            .map(|l| l.unwrap_or(INDETERMINATE_LENGTH))
            .collect()
    }

    pub fn unit(&self) -> &str {
        match self {
            VariableHandle::Plain(v) => &v.unit,
            VariableHandle::Expression(e) => &e.unit,
        }
    }

    /// Native slicing capability, present for expressions only.
    pub fn native_slicing(&self) -> Option<&dyn NativeSlicing> {
        match self {
            VariableHandle::Plain(_) => None,
            VariableHandle::Expression(e) => Some(e),
        }
    }

    /// Textual reference used when appending an index suffix to a plain
    /// variable.
    pub fn reference_text(&self) -> String {
        match self {
            VariableHandle::Plain(v) => reference_key(&v.source, &v.name),
            VariableHandle::Expression(e) => e.ast.to_string(),
        }
    }

    /// Evaluate under a slice spec, producing data plus coordinates and unit.
    pub fn slab(
        &self,
        registry: &StoreRegistry,
        default_source: &str,
        spec: &SliceSpec,
    ) -> Result<DataSlab> {
        match self {
            VariableHandle::Plain(v) => {
                let store = registry.resolve_source(v.source.as_deref(), default_source)?;
                read_variable_slab(store, &v.name, &None, spec)
            }
            VariableHandle::Expression(e) => {
                eval_expr(&e.ast, registry, default_source, spec)
            }
        }
    }

    /// Evaluate and return the raw values only.
    pub fn values(
        &self,
        registry: &StoreRegistry,
        default_source: &str,
        spec: &SliceSpec,
    ) -> Result<ArrayD<f64>> {
        Ok(self.slab(registry, default_source, spec)?.data)
    }
}

/// Resolve an expression string against the registry. Any failure is reported
/// as an expression error enumerating the variables present in the default
/// source.
pub fn resolve(
    expression: &str,
    registry: &StoreRegistry,
    default_source: &str,
) -> Result<VariableHandle> {
    let available = || {
        registry
            .get(default_source)
            .map(|s| s.variable_names())
            .unwrap_or_default()
    };

    let ast = expr::parse(expression).map_err(|message| {
        NcplotError::expression(message, default_source, available())
    })?;

    // Validate every variable reference and record its dimension order for
    // native slicing.
    let mut refs: Vec<(Option<String>, String, Option<Vec<IndexSel>>)> = Vec::new();
    collect_refs(&ast, &mut refs);

    let mut units: Vec<String> = Vec::new();
    let mut var_dims: HashMap<String, Vec<String>> = HashMap::new();

    for (source, name, _indices) in &refs {
        let store = registry.resolve_source(source.as_deref(), default_source)?;
        let Some(meta) = store.variable_meta(name) else {
            if source.is_none() && expr::constant(name).is_some() {
                continue;
            }
            return Err(NcplotError::expression(
                format!("variable '{name}' not found"),
                default_source,
                available(),
            ));
        };
        var_dims.insert(reference_key(source, name), meta.dimensions.clone());
        if !meta.unit.is_empty() {
            units.push(meta.unit);
        }
    }

    // Dimensions are structural: reducing functions collapse their argument,
    // binary operators take the union of both sides.
    let dimensioned = expr_dims(&ast, registry, default_source)?;
    let dims: Vec<String> = dimensioned.iter().map(|(d, _)| d.clone()).collect();
    let shape: Vec<Option<usize>> = dimensioned.iter().map(|(_, l)| Some(*l)).collect();

    let unit = match units.first() {
        Some(first) if units.iter().all(|u| u == first) => first.clone(),
        _ => String::new(),
    };

    if let Expr::Variable {
        source,
        name,
        indices: None,
    } = &ast
    {
        // A bare variable name: no native slicing support.
        if let Some(var_dims) = var_dims.get(&reference_key(source, name)) {
            return Ok(VariableHandle::Plain(PlainVariable {
                source: source.clone(),
                name: name.clone(),
                dims: var_dims.clone(),
                shape,
                unit,
            }));
        }
    }

    Ok(VariableHandle::Expression(ExprHandle {
        ast,
        dims,
        shape,
        unit,
        var_dims,
    }))
}

fn collect_refs(ast: &Expr, out: &mut Vec<(Option<String>, String, Option<Vec<IndexSel>>)>) {
    match ast {
        Expr::Number(_) => {}
        Expr::Variable {
            source,
            name,
            indices,
        } => out.push((source.clone(), name.clone(), indices.clone())),
        Expr::Unary { operand, .. } => collect_refs(operand, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_refs(lhs, out);
            collect_refs(rhs, out);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect_refs(arg, out);
            }
        }
    }
}

fn reference_key(source: &Option<String>, name: &str) -> String {
    match source {
        Some(s) => format!("{s}.{name}"),
        None => name.to_string(),
    }
}

/// Dimensions (with lengths) an expression evaluates over, in order of first
/// appearance. Shared dimensions must agree on length.
fn expr_dims(
    ast: &Expr,
    registry: &StoreRegistry,
    default_source: &str,
) -> Result<Vec<(String, usize)>> {
    match ast {
        Expr::Number(_) => Ok(Vec::new()),
        Expr::Variable {
            source,
            name,
            indices,
        } => {
            let store = registry.resolve_source(source.as_deref(), default_source)?;
            let Some(meta) = store.variable_meta(name) else {
                // Validated as a constant by the caller.
                return Ok(Vec::new());
            };
            let sels = positional_sels(&meta.dimensions, indices)?;
            let mut out = Vec::new();
            for ((dim, sel), &len) in meta.dimensions.iter().zip(&sels).zip(&meta.shape) {
                match sel {
                    IndexSel::Index(_) => {}
                    IndexSel::All => out.push((dim.clone(), len)),
                    IndexSel::Range(a, b) => {
                        let a = a.unwrap_or(0);
                        let b = b.unwrap_or(len).min(len);
                        out.push((dim.clone(), b.saturating_sub(a)));
                    }
                }
            }
            Ok(out)
        }
        Expr::Unary { operand, .. } => expr_dims(operand, registry, default_source),
        Expr::Binary { lhs, rhs, .. } => {
            let mut union = expr_dims(lhs, registry, default_source)?;
            for (dim, len) in expr_dims(rhs, registry, default_source)? {
                match union.iter().find(|(d, _)| *d == dim) {
                    Some((_, existing)) if *existing != len => {
                        return Err(NcplotError::Dimensionality(format!(
                            "dimension '{dim}' has conflicting lengths {existing} and {len} \
                             within the expression"
                        )));
                    }
                    Some(_) => {}
                    None => union.push((dim, len)),
                }
            }
            Ok(union)
        }
        Expr::Call { function, args } => {
            let inner = expr_dims(&args[0], registry, default_source)?;
            if expr::REDUCING_FUNCTIONS.contains(&function.as_str()) {
                Ok(Vec::new())
            } else {
                Ok(inner)
            }
        }
    }
}

/// Positional selections for a variable: either its explicit index suffix, or
/// one `All` per dimension.
fn positional_sels(
    var_dims: &[String],
    indices: &Option<Vec<IndexSel>>,
) -> Result<Vec<IndexSel>> {
    match indices {
        Some(sels) => {
            if sels.len() != var_dims.len() {
                return Err(NcplotError::Dimensionality(format!(
                    "index suffix has {} selections but the variable has {} dimensions",
                    sels.len(),
                    var_dims.len()
                )));
            }
            Ok(sels.clone())
        }
        None => Ok(vec![IndexSel::All; var_dims.len()]),
    }
}

/// Read one variable's slab, composing its explicit index suffix (if any)
/// with the ambient slice spec. Explicit fixed indices win; unconstrained
/// positions take the spec's selection for that dimension.
fn read_variable_slab(
    store: &NetcdfStore,
    name: &str,
    indices: &Option<Vec<IndexSel>>,
    spec: &SliceSpec,
) -> Result<DataSlab> {
    let meta = store.variable_meta(name).ok_or_else(|| {
        NcplotError::expression(
            format!("variable '{name}' not found"),
            store.path().display().to_string(),
            store.variable_names(),
        )
    })?;
    let sels = positional_sels(&meta.dimensions, indices)?;

    let mut extents = Vec::with_capacity(meta.dimensions.len());
    let mut kept_dims = Vec::new();
    let mut kept_ranges = Vec::new();
    for ((dim, sel), &len) in meta.dimensions.iter().zip(&sels).zip(&meta.shape) {
        let effective = match sel {
            IndexSel::Index(i) => IndexSel::Index(*i),
            IndexSel::All => match spec.get(dim) {
                Some(DimSelection::Index(i)) => IndexSel::Index(i),
                Some(DimSelection::Range(a, b)) => IndexSel::Range(Some(a), Some(b)),
                None => IndexSel::All,
            },
            IndexSel::Range(a, b) => IndexSel::Range(*a, *b),
        };
        match effective {
            IndexSel::Index(i) => {
                if i >= len {
                    return Err(NcplotError::Dimensionality(format!(
                        "index {i} is out of range for dimension '{dim}' (length {len})"
                    )));
                }
                extents.push(DimExtent::Index(i));
            }
            IndexSel::Range(a, b) => {
                let a = a.unwrap_or(0).min(len);
                let b = b.unwrap_or(len).min(len).max(a);
                extents.push(DimExtent::Range(a, b));
                kept_dims.push(dim.clone());
                kept_ranges.push((a, b));
            }
            IndexSel::All => {
                extents.push(DimExtent::All);
                kept_dims.push(dim.clone());
                kept_ranges.push((0, len));
            }
        }
    }

    let data = store.read_values(name, &extents)?;
    let mut coords = Vec::with_capacity(kept_dims.len());
    for (dim, &(a, b)) in kept_dims.iter().zip(&kept_ranges) {
        coords.push(store.coordinate_values(dim, a, b)?);
    }
    Ok(DataSlab {
        dims: kept_dims,
        data,
        coords,
        unit: meta.unit,
    })
}

fn eval_expr(
    ast: &Expr,
    registry: &StoreRegistry,
    default_source: &str,
    spec: &SliceSpec,
) -> Result<DataSlab> {
    match ast {
        Expr::Number(v) => Ok(DataSlab::scalar(*v, "")),
        Expr::Variable {
            source,
            name,
            indices,
        } => {
            let store = registry.resolve_source(source.as_deref(), default_source)?;
            if !store.has_variable(name)
                && source.is_none()
                && let Some(value) = expr::constant(name)
            {
                if indices.is_some() {
                    return Err(NcplotError::Dimensionality(format!(
                        "constant '{name}' cannot be indexed"
                    )));
                }
                return Ok(DataSlab::scalar(value, ""));
            }
            read_variable_slab(store, name, indices, spec)
        }
        Expr::Unary {
            op: UnaryOp::Neg,
            operand,
        } => {
            let mut slab = eval_expr(operand, registry, default_source, spec)?;
            slab.data.mapv_inplace(|v| -v);
            Ok(slab)
        }
        Expr::Binary { op, lhs, rhs } => {
            let a = eval_expr(lhs, registry, default_source, spec)?;
            let b = eval_expr(rhs, registry, default_source, spec)?;
            combine(a, b, *op)
        }
        Expr::Call { function, args } => {
            let slab = eval_expr(&args[0], registry, default_source, spec)?;
            apply_function(function, slab)
        }
    }
}

fn apply_function(function: &str, mut slab: DataSlab) -> Result<DataSlab> {
    let elementwise: Option<fn(f64) -> f64> = match function {
        "abs" => Some(f64::abs),
        "sqrt" => Some(f64::sqrt),
        "exp" => Some(f64::exp),
        "ln" => Some(f64::ln),
        "log10" => Some(f64::log10),
        "sin" => Some(f64::sin),
        "cos" => Some(f64::cos),
        "tan" => Some(f64::tan),
        _ => None,
    };
    if let Some(f) = elementwise {
        slab.data.mapv_inplace(f);
        return Ok(slab);
    }

    let finite: Vec<f64> = slab.data.iter().copied().filter(|v| v.is_finite()).collect();
    let value = match function {
        "min" => finite.iter().copied().fold(f64::INFINITY, f64::min),
        "max" => finite.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        "sum" => finite.iter().sum(),
        "mean" => {
            if finite.is_empty() {
                f64::NAN
            } else {
                finite.iter().sum::<f64>() / finite.len() as f64
            }
        }
        other => {
            return Err(NcplotError::Dimensionality(format!(
                "unknown function '{other}'"
            )));
        }
    };
    let value = if finite.is_empty() { f64::NAN } else { value };
    Ok(DataSlab::scalar(value, slab.unit))
}

/// Combine two slabs under a binary operator, broadcasting over the union of
/// their dimensions (order of first appearance, left operand first).
fn combine(a: DataSlab, b: DataSlab, op: BinaryOp) -> Result<DataSlab> {
    let f = |x: f64, y: f64| -> f64 {
        match op {
            BinaryOp::Add => x + y,
            BinaryOp::Sub => x - y,
            BinaryOp::Mul => x * y,
            BinaryOp::Div => x / y,
            BinaryOp::Pow => x.powf(y),
        }
    };

    let mut union: Vec<String> = a.dims.clone();
    for dim in &b.dims {
        if !union.contains(dim) {
            union.push(dim.clone());
        }
    }

    // Validate shared dimension lengths.
    let mut full_shape = Vec::with_capacity(union.len());
    for dim in &union {
        let la = a.dims.iter().position(|d| d == dim).map(|i| a.shape()[i]);
        let lb = b.dims.iter().position(|d| d == dim).map(|i| b.shape()[i]);
        match (la, lb) {
            (Some(x), Some(y)) if x != y => {
                return Err(NcplotError::Dimensionality(format!(
                    "dimension '{dim}' has conflicting lengths {x} and {y} within the expression"
                )));
            }
            (Some(x), _) => full_shape.push(x),
            (_, Some(y)) => full_shape.push(y),
            (None, None) => unreachable!(),
        }
    }

    let aligned_a = align(&a, &union, &full_shape)?;
    let aligned_b = align(&b, &union, &full_shape)?;
    let data = ndarray::Zip::from(&aligned_a)
        .and(&aligned_b)
        .map_collect(|&x, &y| f(x, y));

    let mut coords = Vec::with_capacity(union.len());
    for dim in &union {
        let coord = a
            .dims
            .iter()
            .position(|d| d == dim)
            .map(|i| a.coords[i].clone())
            .or_else(|| {
                b.dims
                    .iter()
                    .position(|d| d == dim)
                    .map(|i| b.coords[i].clone())
            })
            .unwrap_or_default();
        coords.push(coord);
    }

    let unit = match op {
        BinaryOp::Add | BinaryOp::Sub if a.unit == b.unit => a.unit.clone(),
        _ if b.dims.is_empty() && b.unit.is_empty() => a.unit.clone(),
        _ if a.dims.is_empty() && a.unit.is_empty() => b.unit.clone(),
        _ => String::new(),
    };

    Ok(DataSlab {
        dims: union,
        data,
        coords,
        unit,
    })
}

/// Permute and reshape a slab's data so its axes line up with the union
/// dimension order, then broadcast to the full shape.
fn align(slab: &DataSlab, union: &[String], full_shape: &[usize]) -> Result<ArrayD<f64>> {
    let perm: Vec<usize> = union
        .iter()
        .filter_map(|dim| slab.dims.iter().position(|d| d == dim))
        .collect();
    let permuted = slab.data.clone().permuted_axes(IxDyn(&perm));

    let mut padded_shape = Vec::with_capacity(union.len());
    let mut kept = permuted.shape().iter();
    for dim in union {
        if slab.dims.iter().any(|d| d == dim) {
            padded_shape.push(*kept.next().expect("axis count"));
        } else {
            padded_shape.push(1);
        }
    }
    let contiguous = permuted.as_standard_layout().into_owned();
    let reshaped = contiguous
        .into_shape_with_order(IxDyn(&padded_shape))
        .map_err(|e| NcplotError::Dimensionality(format!("broadcast failed: {e}")))?;
    let broadcast = reshaped
        .broadcast(IxDyn(full_shape))
        .ok_or_else(|| {
            NcplotError::Dimensionality("incompatible shapes in expression".to_string())
        })?
        .to_owned();
    Ok(broadcast)
}
