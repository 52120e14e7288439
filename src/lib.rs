//! # ncplot
//!
//! A library and command-line toolkit for browsing and plotting variables
//! stored in NetCDF files.
//!
//! ## Features
//!
//! - **Expressions**: plot named variables or algebraic expressions over one
//!   or more data sources, with functions and named constants
//! - **Slicing**: reduce N-dimensional variables to 1 or 2 free dimensions
//!   via explicit slice specifications; singleton dimensions are sliced
//!   automatically
//! - **Consistent figures**: series display properties and axis bounds
//!   survive re-slicing; axis bounds can be set from the global value range
//!   across sliced dimensions
//! - **Animation**: drive a dimension index through its range and export one
//!   still image per frame
//! - **Companion tools**: descriptive statistics and series comparison over
//!   the same resolution/slicing core
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ncplot::{run_plot_job, PlotJob, SeriesDef, SourceBinding};
//! use ncplot::scan::NullProgress;
//! use ncplot::store::OpenOptions;
//!
//! let job = PlotJob {
//!     sources: vec![SourceBinding::new("source0", "temperature.nc")],
//!     series: vec![SeriesDef::plain("source0", "temp")],
//!     output: Some("out.png".into()),
//!     ..Default::default()
//! };
//! run_plot_job(&job, &OpenOptions::default(), &mut NullProgress)?;
//! # Ok::<(), ncplot::error::NcplotError>(())
//! ```

pub mod animate;
pub mod cli;
pub mod compare;
pub mod error;
pub mod expr;
pub mod figure;
pub mod handle;
pub mod info;
pub mod render;
pub mod scan;
pub mod settings;
pub mod slice;
pub mod stats;
pub mod store;
pub mod title;

#[cfg(test)]
mod tests;

#[cfg(test)]
mod cli_tests;

use crate::animate::{record_frames, AnimationConfig, FrameTemplate};
use crate::error::{NcplotError, Result};
use crate::figure::{AddSeriesOutcome, Figure, FigureSeriesController, FigureSettings};
use crate::scan::ProgressSink;
use crate::store::{NetcdfStore, OpenOptions, StoreRegistry};
use log::info;
use std::collections::VecDeque;
use std::path::PathBuf;

/// One `-s [NAME=]PATH` data source binding, with optional coordinate
/// reassignments.
#[derive(Debug, Clone)]
pub struct SourceBinding {
    pub name: String,
    pub path: PathBuf,
    /// Dimension -> coordinate-variable overrides (`OLD=NEW` pairs).
    pub reassignments: Vec<(String, String)>,
}

impl SourceBinding {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            reassignments: Vec::new(),
        }
    }
}

/// One data series to plot: an expression bound to a default source.
#[derive(Debug, Clone)]
pub struct SeriesDef {
    pub label: Option<String>,
    pub source: String,
    pub expression: String,
}

impl SeriesDef {
    pub fn plain(source: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            label: None,
            source: source.into(),
            expression: expression.into(),
        }
    }
}

/// A complete batch plotting job.
#[derive(Debug, Clone, Default)]
pub struct PlotJob {
    pub sources: Vec<SourceBinding>,
    pub series: Vec<SeriesDef>,
    /// Optional figure settings file (JSON or YAML).
    pub figure_settings: Option<PathBuf>,
    /// Trailing `PROPERTY=VALUE` plot property assignments.
    pub assignments: Vec<(String, String)>,
    /// Animate over this dimension; the output must then be a directory or a
    /// numeric filename template.
    pub animate: Option<String>,
    /// Export target; with no output the figure is described as text.
    pub output: Option<PathBuf>,
    pub dpi: u32,
    /// Identifier texts placed in the figure corner.
    pub ids: Vec<String>,
}

/// What a batch job produced.
#[derive(Debug, Clone, PartialEq)]
pub enum PlotOutcome {
    /// The figure was exported to this file.
    Exported(PathBuf),
    /// Animation stills were exported, one file per frame.
    Frames(Vec<PathBuf>),
    /// No output path was given: a textual description of the figure.
    Preview(String),
    /// Nothing was plottable; per-expression messages (scalar values etc.).
    Messages(Vec<String>),
}

/// Run a batch plotting job: open the sources, bind every series, apply
/// figure settings and property assignments, then export, animate or
/// describe the figure.
///
/// The figure stays in non-updating mode while series and properties are
/// assembled, so no intermediate state is ever observable.
pub fn run_plot_job(
    job: &PlotJob,
    open_options: &OpenOptions,
    sink: &mut dyn ProgressSink,
) -> Result<PlotOutcome> {
    let mut registry = StoreRegistry::new();
    for binding in &job.sources {
        info!("opening '{}'", binding.path.display());
        let mut store = NetcdfStore::open(&binding.path, open_options)?;
        for (dimension, coordinate) in &binding.reassignments {
            store.reassign_coordinate(dimension, coordinate)?;
        }
        registry.add(&binding.name, store);
    }
    let default_source = registry
        .default_name()
        .map(str::to_string)
        .unwrap_or_default();

    let mut controller = FigureSeriesController::new(Figure::new());
    let previous = controller.figure_mut().set_updating(false);

    // Figure settings may contribute both fully specified series and
    // "unlinked" display-property templates consumed by the -e series below.
    let mut series_defs: Vec<(SeriesDef, Option<figure::SeriesStyle>)> = Vec::new();
    let mut templates = VecDeque::new();
    if let Some(path) = &job.figure_settings {
        let figure_settings = FigureSettings::load(path)?;
        let (linked, unlinked) = figure_settings.apply_to(controller.figure_mut());
        templates.extend(unlinked);
        for entry in linked {
            let expression = entry.expression.clone().expect("linked series");
            let source = entry
                .source
                .clone()
                .unwrap_or_else(|| default_source.clone());
            series_defs.push((
                SeriesDef {
                    label: entry.label.clone(),
                    source,
                    expression,
                },
                Some(entry.style()),
            ));
        }
    }
    for def in &job.series {
        let template = templates.pop_front();
        series_defs.push((def.clone(), template));
    }

    for id in &job.ids {
        controller
            .figure_mut()
            .texts
            .push(figure::FigureText::corner_id(id));
    }

    let mut messages = Vec::new();
    for (def, template) in &series_defs {
        let outcome = controller.add_series(
            &registry,
            &def.source,
            &def.expression,
            def.label.as_deref(),
            template.as_ref(),
        )?;
        match outcome {
            AddSeriesOutcome::Plotted(_) => {}
            AddSeriesOutcome::Scalar(text) => {
                messages.push(format!(
                    "'{}' is a scalar with value {text}; only variables with 1 or 2 dimensions \
                     can be plotted",
                    def.expression
                ));
            }
            AddSeriesOutcome::NeedMoreSlices(n) => {
                return Err(NcplotError::Dimensionality(format!(
                    "'{}' has too many free dimensions; select at least {n} additional slice \
                     dimension(s) before plotting",
                    def.expression
                )));
            }
        }
    }

    for (path, value) in &job.assignments {
        info!("'{path}': assigning value '{value}'");
        controller.figure_mut().set_property(path, value)?;
    }

    if controller.figure().series().is_empty() {
        controller.figure_mut().set_updating(previous);
        return Ok(PlotOutcome::Messages(messages));
    }

    let dpi = if job.dpi == 0 { 96 } else { job.dpi };

    let Some(dimension) = &job.animate else {
        controller.figure_mut().set_updating(previous);
        return match &job.output {
            Some(output) => {
                info!("exporting figure to '{}'", output.display());
                controller.export(&registry, output, dpi)?;
                Ok(PlotOutcome::Exported(output.clone()))
            }
            None => Ok(PlotOutcome::Preview(controller.preview(&registry)?)),
        };
    };

    // Animation: the frame range comes from the first series spanning the
    // dimension.
    let (first_def, _) = series_defs.first().expect("series present");
    let resolved = handle::resolve(&first_def.expression, &registry, &first_def.source)?;
    let length = resolved
        .dimensions()
        .iter()
        .position(|d| d == dimension)
        .map(|i| resolved.ui_shape()[i])
        .ok_or_else(|| {
            NcplotError::Dimensionality(format!(
                "dimension '{dimension}' does not occur in '{}'",
                first_def.expression
            ))
        })?;
    let config = AnimationConfig::over(dimension.clone(), length);
    controller.figure_mut().set_updating(previous);

    match &job.output {
        Some(output) => {
            let template = FrameTemplate::for_output(output, config.end)?;
            let files = record_frames(&mut controller, &registry, &config, &template, dpi, sink)?;
            info!("wrote {} stills", files.len());
            Ok(PlotOutcome::Frames(files))
        }
        None => {
            // Only the first frame of the animation can be shown.
            controller.set_frame(&registry, dimension, config.start)?;
            Ok(PlotOutcome::Preview(controller.preview(&registry)?))
        }
    }
}
