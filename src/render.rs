//! # Render Module
//!
//! Exports a figure to a raster file with `plotters`: a line chart when the
//! displayed slabs have one free dimension, a colormapped heatmap when they
//! have two. This is deliberately not a general charting engine — only the
//! figure model's properties (bounds, labels, styles, title, corner texts)
//! are honored.

use crate::error::{NcplotError, Result};
use crate::figure::{Figure, HAlign, LineStyle, SeriesStyle, VAlign};
use crate::handle::DataSlab;
use plotters::prelude::*;
use plotters::series::DashedLineSeries;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::path::Path;

/// Default series colors, cycled in order.
const DEFAULT_COLORS: &[RGBColor] = &[
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
];

/// Export the figure and its resolved slabs to `path` at the given DPI.
pub fn export_figure(
    figure: &Figure,
    slabs: &[(SeriesStyle, DataSlab)],
    path: &Path,
    dpi: u32,
) -> Result<()> {
    let width = (figure.width * dpi as f64).round().max(1.0) as u32;
    let height = (figure.height * dpi as f64).round().max(1.0) as u32;
    let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&WHITE).map_err(to_render_error)?;

    let ndim = slabs.first().map(|(_, s)| s.ndim()).unwrap_or(0);
    match ndim {
        1 => draw_lines(figure, slabs, &root)?,
        2 => draw_map(figure, &slabs[0].1, &root)?,
        _ => {}
    }

    draw_texts(figure, &root, width, height)?;
    root.present().map_err(to_render_error)?;
    Ok(())
}

fn to_render_error<E: std::fmt::Display>(e: E) -> NcplotError {
    NcplotError::render(e.to_string())
}

/// Expand a raw value range with padding, guarding against degenerate spans.
fn padded_range(min: f64, max: f64) -> (f64, f64) {
    let (min, max) = if min <= max { (min, max) } else { (max, min) };
    let span = (max - min).abs();
    let padding = if span < 1e-12 { 0.5 } else { span * 0.05 };
    (min - padding, max + padding)
}

/// Effective axis range: explicit bounds win, otherwise padded data bounds.
fn axis_range(
    figure: &Figure,
    axis_id: &str,
    data_min: f64,
    data_max: f64,
    pad: bool,
) -> (f64, f64) {
    let axis = figure.axis(axis_id);
    let explicit_min = axis.and_then(|a| a.minimum);
    let explicit_max = axis.and_then(|a| a.maximum);
    let (auto_min, auto_max) = if pad {
        padded_range(data_min, data_max)
    } else {
        (data_min, data_max)
    };
    (
        explicit_min.unwrap_or(auto_min),
        explicit_max.unwrap_or(auto_max),
    )
}

fn series_color(style: &SeriesStyle, index: usize) -> RGBColor {
    style
        .color
        .as_deref()
        .and_then(parse_hex_color)
        .unwrap_or(DEFAULT_COLORS[index % DEFAULT_COLORS.len()])
}

fn parse_hex_color(text: &str) -> Option<RGBColor> {
    let hex = text.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(RGBColor(r, g, b))
}

fn draw_lines(
    figure: &Figure,
    slabs: &[(SeriesStyle, DataSlab)],
    root: &DrawingArea<BitMapBackend, plotters::coord::Shift>,
) -> Result<()> {
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;
    for (_, slab) in slabs {
        if slab.ndim() != 1 {
            continue;
        }
        if let Some((lo, hi)) = slab.coord_min_max(0) {
            x_min = x_min.min(lo);
            x_max = x_max.max(hi);
        }
        if let Some((lo, hi)) = slab.data_min_max() {
            y_min = y_min.min(lo);
            y_max = y_max.max(hi);
        }
    }
    if !x_min.is_finite() {
        (x_min, x_max) = (0.0, 1.0);
    }
    if !y_min.is_finite() {
        (y_min, y_max) = (0.0, 1.0);
    }

    let (x_lo, x_hi) = axis_range(figure, "x", x_min, x_max, false);
    let (y_lo, y_hi) = axis_range(figure, "y", y_min, y_max, true);

    let mut builder = ChartBuilder::on(root);
    builder
        .margin(12)
        .x_label_area_size(46)
        .y_label_area_size(64);
    if let Some(title) = &figure.title {
        builder.caption(
            title,
            (figure.font_family.as_str(), figure.font_size * 1.4).into_font(),
        );
    }
    let mut chart = builder
        .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
        .map_err(to_render_error)?;

    let x_label = figure
        .axis("x")
        .and_then(|a| a.label.clone())
        .or_else(|| slabs.first().map(|(_, s)| s.dims[0].clone()))
        .unwrap_or_default();
    let y_label = figure
        .axis("y")
        .and_then(|a| a.label.clone())
        .or_else(|| {
            slabs
                .first()
                .map(|(_, s)| s.unit.clone())
                .filter(|u| !u.is_empty())
        })
        .unwrap_or_default();
    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc(y_label)
        .label_style((figure.font_family.as_str(), figure.font_size).into_font())
        .draw()
        .map_err(to_render_error)?;

    let mut labeled = false;
    for (index, (style, slab)) in slabs.iter().enumerate() {
        if slab.ndim() != 1 {
            continue;
        }
        let color = series_color(style, index);
        let stroke = style.line_width.unwrap_or(1.0).max(0.5) as u32;
        let shape_style = ShapeStyle::from(&color).stroke_width(stroke.max(1));

        // Masked values split the line into separate runs.
        for run in unmasked_runs(slab) {
            match style.line_style.unwrap_or_default() {
                LineStyle::Solid => {
                    chart
                        .draw_series(LineSeries::new(run, shape_style))
                        .map_err(to_render_error)?;
                }
                LineStyle::Dashed => {
                    chart
                        .draw_series(DashedLineSeries::new(run, 8, 4, shape_style))
                        .map_err(to_render_error)?;
                }
                LineStyle::Dotted => {
                    chart
                        .draw_series(DashedLineSeries::new(run, 2, 4, shape_style))
                        .map_err(to_render_error)?;
                }
            }
        }
        if let Some(label) = &style.label {
            labeled = true;
            // Invisible anchor so the legend entry gets its own swatch.
            chart
                .draw_series(std::iter::once(PathElement::new(
                    Vec::<(f64, f64)>::new(),
                    shape_style,
                )))
                .map_err(to_render_error)?
                .label(label.clone())
                .legend(move |(x, y)| {
                    PathElement::new(vec![(x, y), (x + 16, y)], shape_style)
                });
        }
    }

    if labeled {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.85))
            .border_style(BLACK)
            .draw()
            .map_err(to_render_error)?;
    }
    Ok(())
}

fn unmasked_runs(slab: &DataSlab) -> Vec<Vec<(f64, f64)>> {
    let coords = &slab.coords[0];
    let mut runs = Vec::new();
    let mut current = Vec::new();
    for (i, &value) in slab.data.iter().enumerate() {
        let coord = coords.get(i).copied().unwrap_or(i as f64);
        if value.is_finite() && coord.is_finite() {
            current.push((coord, value));
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

fn draw_map(
    figure: &Figure,
    slab: &DataSlab,
    root: &DrawingArea<BitMapBackend, plotters::coord::Shift>,
) -> Result<()> {
    // First slab dimension maps to y, second to x.
    let y_coords = &slab.coords[0];
    let x_coords = &slab.coords[1];
    let x_edges = cell_edges(x_coords);
    let y_edges = cell_edges(y_coords);

    let (x_lo, x_hi) = axis_range(
        figure,
        "x",
        *x_edges.first().unwrap_or(&0.0),
        *x_edges.last().unwrap_or(&1.0),
        false,
    );
    let (y_lo, y_hi) = axis_range(
        figure,
        "y",
        *y_edges.first().unwrap_or(&0.0),
        *y_edges.last().unwrap_or(&1.0),
        false,
    );
    let (data_lo, data_hi) = slab.data_min_max().unwrap_or((0.0, 1.0));
    let (c_lo, c_hi) = axis_range(figure, "c", data_lo, data_hi, false);
    let c_span = if (c_hi - c_lo).abs() < 1e-300 {
        1.0
    } else {
        c_hi - c_lo
    };

    let mut builder = ChartBuilder::on(root);
    builder
        .margin(12)
        .x_label_area_size(46)
        .y_label_area_size(64);
    if let Some(title) = &figure.title {
        builder.caption(
            title,
            (figure.font_family.as_str(), figure.font_size * 1.4).into_font(),
        );
    }
    let mut chart = builder
        .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
        .map_err(to_render_error)?;

    let x_label = figure
        .axis("x")
        .and_then(|a| a.label.clone())
        .unwrap_or_else(|| slab.dims[1].clone());
    let y_label = figure
        .axis("y")
        .and_then(|a| a.label.clone())
        .unwrap_or_else(|| slab.dims[0].clone());
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc(x_label)
        .y_desc(y_label)
        .label_style((figure.font_family.as_str(), figure.font_size).into_font())
        .draw()
        .map_err(to_render_error)?;

    let shape = slab.shape();
    let mut cells = Vec::with_capacity(shape[0] * shape[1]);
    for iy in 0..shape[0] {
        for ix in 0..shape[1] {
            let value = slab.data[[iy, ix]];
            if !value.is_finite() {
                continue;
            }
            let t = ((value - c_lo) / c_span).clamp(0.0, 1.0);
            let (r, g, b) = viridis(t);
            cells.push(Rectangle::new(
                [
                    (x_edges[ix], y_edges[iy]),
                    (x_edges[ix + 1], y_edges[iy + 1]),
                ],
                RGBColor(r, g, b).filled(),
            ));
        }
    }
    chart.draw_series(cells).map_err(to_render_error)?;
    Ok(())
}

/// Cell boundaries for heatmap rectangles: midpoints between neighboring
/// coordinates, extrapolated at both ends.
fn cell_edges(coords: &[f64]) -> Vec<f64> {
    match coords.len() {
        0 => vec![0.0, 1.0],
        1 => {
            let c = coords[0];
            vec![c - 0.5, c + 0.5]
        }
        n => {
            let mut edges = Vec::with_capacity(n + 1);
            edges.push(coords[0] - (coords[1] - coords[0]) / 2.0);
            for i in 1..n {
                edges.push((coords[i - 1] + coords[i]) / 2.0);
            }
            edges.push(coords[n - 1] + (coords[n - 1] - coords[n - 2]) / 2.0);
            edges
        }
    }
}

/// Viridis approximation via piecewise linear interpolation.
fn viridis(t: f64) -> (u8, u8, u8) {
    let t = t.clamp(0.0, 1.0);
    let lerp = |a: f64, b: f64, f: f64| a + (b - a) * f;
    let (r, g, b) = if t < 0.5 {
        let f = t * 2.0;
        (lerp(68.0, 33.0, f), lerp(1.0, 104.0, f), lerp(84.0, 109.0, f))
    } else {
        let f = (t - 0.5) * 2.0;
        (
            lerp(33.0, 253.0, f),
            lerp(104.0, 231.0, f),
            lerp(109.0, 37.0, f),
        )
    };
    (r as u8, g as u8, b as u8)
}

fn draw_texts(
    figure: &Figure,
    root: &DrawingArea<BitMapBackend, plotters::coord::Shift>,
    width: u32,
    height: u32,
) -> Result<()> {
    for text in &figure.texts {
        let px = (text.x * width as f64) as i32;
        // Figure coordinates measure y from the bottom.
        let py = ((1.0 - text.y) * height as f64) as i32;
        let h_pos = match text.horizontal {
            HAlign::Left => HPos::Left,
            HAlign::Center => HPos::Center,
            HAlign::Right => HPos::Right,
        };
        let v_pos = match text.vertical {
            VAlign::Top => VPos::Top,
            VAlign::Center => VPos::Center,
            VAlign::Bottom => VPos::Bottom,
        };
        let style = (figure.font_family.as_str(), figure.font_size)
            .into_font()
            .color(&BLACK)
            .pos(Pos::new(h_pos, v_pos));
        root.draw(&Text::new(text.text.clone(), (px, py), style))
            .map_err(to_render_error)?;
    }
    Ok(())
}
