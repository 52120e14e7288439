//! # CLI Module
//!
//! Command-line interface for ncplot:
//! - `plot`: batch plotting of expressions from NetCDF sources, with figure
//!   settings files, property assignments and animation export
//! - `stats`: descriptive statistics for an expression
//! - `compare`: difference statistics between two data series
//! - `info`: NetCDF file inspection
//! - `completions`: shell completion generation
//!
//! Exit codes follow the batch contract: 2 for argument/usage errors, 1 for
//! runtime errors, 0 on success.

use crate::compare::{compare_series, CompareOptions};
use crate::error::Result as NcResult;
use crate::info;
use crate::scan::ProgressSink;
use crate::settings::AppSettings;
use crate::stats::{describe, StatsOptions, StatsOutcome};
use crate::store::{NetcdfStore, OpenOptions, StoreRegistry};
use crate::title::format_number;
use crate::{run_plot_job, PlotJob, PlotOutcome, SeriesDef, SourceBinding};
use anyhow::Context;
use clap::{ArgMatches, Args, CommandFactory, FromArgMatches, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

/// Plot and inspect variables from NetCDF files
#[derive(Parser, Debug)]
#[command(name = "ncplot")]
#[command(about = "Plot variables and expressions from NetCDF files")]
#[command(version)]
#[command(long_about = "
ncplot plots one or more variables or algebraic expressions from NetCDF
files, reducing them to one or two free dimensions via slice specifications.
Singleton dimensions are sliced automatically.

EXAMPLES:
  # Plot a variable to a PNG
  ncplot plot -s temperature.nc -e temp -o out.png

  # Two sources, named series, custom title
  ncplot plot -s run=model.nc -e temp -s obs=observed.nc -E Observed temp \\
    -o cmp.png Title=\"model vs observations\"

  # Animate over the time dimension into a directory of stills
  ncplot plot -s model.nc -e temp -a time -o ./stills

  # Descriptive statistics with percentiles
  ncplot stats -s model.nc -p 'temp-273.15'

  # Compare two series
  ncplot compare model.nc temp observed.nc temp
")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode - suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plot expressions from NetCDF sources
    Plot(PlotArgs),

    /// Calculate descriptive statistics for an expression
    Stats(StatsArgs),

    /// Compare two one-dimensional data series
    Compare(CompareArgs),

    /// Show information about a NetCDF file
    Info(InfoArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
pub struct PlotArgs {
    /// NetCDF data source; subsequent -e/-E expressions resolve against the
    /// most recent one
    #[arg(short = 's', long = "source", value_name = "[NAME=]PATH")]
    pub sources: Vec<String>,

    /// Data series to plot: a variable name or mathematical expression
    #[arg(short = 'e', long = "expression", value_name = "EXPRESSION")]
    pub expressions: Vec<String>,

    /// Named data series: series name followed by the expression
    #[arg(
        short = 'E',
        long = "named-expression",
        num_args = 2,
        value_names = ["NAME", "EXPRESSION"]
    )]
    pub named_expressions: Vec<String>,

    /// Figure settings file (JSON or YAML)
    #[arg(short = 'x', long = "figure-settings", value_name = "PATH")]
    pub figure_settings: Option<PathBuf>,

    /// Create an animation by varying this dimension's index; the output
    /// path must be an existing directory or a numeric filename template
    /// such as './movie/still%05i.png'
    #[arg(short = 'a', long = "animate", value_name = "DIMENSION")]
    pub animate: Option<String>,

    /// Output path; omit to describe the figure instead of exporting it
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Resolution of the exported figure in dots per inch
    #[arg(short = 'd', long = "dpi", default_value_t = 96)]
    pub dpi: u32,

    /// Plot identifier shown in the figure corner
    #[arg(short = 'i', long = "id", value_name = "ID")]
    pub ids: Vec<String>,

    /// Reassign coordinate variables on the most recent source:
    /// OLD=NEW[,OLD2=NEW2,...]
    #[arg(long = "reassign", value_name = "OLD=NEW[,...]")]
    pub reassign: Vec<String>,

    /// Trailing PROPERTY=VALUE plot property assignments, e.g.
    /// Title="my plot", /Axes/y/Maximum=10
    #[arg(value_name = "PROPERTY=VALUE")]
    pub assignments: Vec<String>,
}

#[derive(Args, Debug)]
pub struct StatsArgs {
    /// NetCDF file from which variables will be used
    #[arg(
        short = 's',
        long = "source",
        value_name = "[NAME=]PATH",
        required = true
    )]
    pub sources: Vec<String>,

    /// List percentiles in addition to mean, sd, min, max
    #[arg(short = 'p', long = "percentiles")]
    pub percentiles: bool,

    /// Maximum number of data points to keep in memory per slab read
    #[arg(long = "maxslab", default_value_t = 1_000_000)]
    pub maxslab: usize,

    /// Expression to calculate statistics for
    #[arg(value_name = "EXPRESSION")]
    pub expression: String,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    /// Path to the first [reference] NetCDF file
    pub path1: PathBuf,
    /// Expression from the first file
    pub expression1: String,
    /// Path to the second NetCDF file
    pub path2: PathBuf,
    /// Expression from the second file, interpolated onto the first
    pub expression2: String,

    /// Dump the aligned series and their difference to this NetCDF path
    #[arg(long = "dump", value_name = "PATH")]
    pub dump: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// NetCDF file path
    pub file: PathBuf,

    /// Show detailed variable and global attribute information
    #[arg(long)]
    pub detailed: bool,

    /// Show only this variable
    #[arg(short = 'n', long)]
    pub variable: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON structured output
    Json,
    /// YAML structured output
    Yaml,
}

/// Entry point used by the binary; returns the process exit code.
pub fn run() -> i32 {
    let matches = match Cli::command().try_get_matches() {
        Ok(matches) => matches,
        Err(e) => {
            let code = if e.use_stderr() { 2 } else { 0 };
            let _ = e.print();
            return code;
        }
    };
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return 2;
        }
    };

    init_logging(cli.verbose, cli.quiet);

    match dispatch(&cli, &matches) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .try_init();
}

fn dispatch(cli: &Cli, matches: &ArgMatches) -> anyhow::Result<i32> {
    match &cli.command {
        Commands::Plot(plot) => {
            let plot_matches = matches
                .subcommand_matches("plot")
                .expect("plot subcommand matches");
            let job = match build_plot_job(plot, plot_matches) {
                Ok(job) => job,
                Err(usage) => {
                    eprintln!("{usage}");
                    return Ok(2);
                }
            };
            remember_paths(job.sources.iter().map(|s| s.path.clone()));

            let mut sink = bar_sink(cli.quiet);
            let outcome = run_plot_job(&job, &OpenOptions::default(), &mut sink)?;
            sink.finish();
            match outcome {
                PlotOutcome::Exported(path) => {
                    if !cli.quiet {
                        println!("Exported figure to '{}'.", path.display());
                    }
                }
                PlotOutcome::Frames(files) => {
                    if !cli.quiet {
                        println!("Wrote {} stills.", files.len());
                    }
                }
                PlotOutcome::Preview(text) => println!("{text}"),
                PlotOutcome::Messages(messages) => {
                    for message in messages {
                        println!("{message}");
                    }
                }
            }
            Ok(0)
        }
        Commands::Stats(args) => handle_stats(args),
        Commands::Compare(args) => handle_compare(args),
        Commands::Info(args) => handle_info(args),
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(*shell, &mut command, "ncplot", &mut std::io::stdout());
            Ok(0)
        }
    }
}

fn handle_stats(args: &StatsArgs) -> anyhow::Result<i32> {
    let registry = open_sources(&args.sources)?;
    remember_paths(registry.iter().map(|(_, s)| s.path().to_path_buf()));
    let default = registry
        .default_name()
        .context("at least one source is required")?
        .to_string();
    let options = StatsOptions {
        max_slab: args.maxslab,
        percentiles: args.percentiles,
    };
    let outcome = describe(&registry, &default, &args.expression, &options)?;
    match outcome {
        StatsOutcome::Scalar(text) => {
            println!("Data consists of a scalar with value {text}");
        }
        StatsOutcome::Empty => {
            println!("No data available (or all are masked).");
        }
        StatsOutcome::Summary(summary) => {
            let unit = if summary.unit.is_empty() {
                String::new()
            } else {
                format!(" {}", summary.unit)
            };
            println!("Mean = {}{unit}", format_number("%g", summary.mean));
            println!("S.d. = {}{unit}", format_number("%g", summary.std));
            println!("Minimum = {}{unit}", format_number("%g", summary.min));
            if let Some(p) = &summary.percentiles {
                println!("2.5th percentile = {}{unit}", format_number("%g", p.p2_5));
                println!("25th percentile = {}{unit}", format_number("%g", p.p25));
                println!("Median = {}{unit}", format_number("%g", p.median));
                println!("75th percentile = {}{unit}", format_number("%g", p.p75));
                println!("97.5th percentile = {}{unit}", format_number("%g", p.p97_5));
            }
            println!("Maximum = {}{unit}", format_number("%g", summary.max));
        }
    }
    Ok(0)
}

fn handle_compare(args: &CompareArgs) -> anyhow::Result<i32> {
    let mut registry = StoreRegistry::new();
    let options = OpenOptions::default();
    registry.add("source0", NetcdfStore::open(&args.path1, &options)?);
    let source2 = if args.path2 == args.path1 {
        "source0".to_string()
    } else {
        registry.add("source1", NetcdfStore::open(&args.path2, &options)?);
        "source1".to_string()
    };
    remember_paths([args.path1.clone(), args.path2.clone()]);

    let report = compare_series(
        &registry,
        "source0",
        &args.expression1,
        &source2,
        &args.expression2,
        &CompareOptions {
            dump: args.dump.clone(),
        },
    )?;

    let unit = if report.unit.is_empty() {
        String::new()
    } else {
        format!(" {}", report.unit)
    };
    log::info!("using {} data points", report.points);
    log::info!(
        "range for series 1: {} - {}",
        report.coordinate_range1.0,
        report.coordinate_range1.1
    );
    log::info!(
        "range for series 2: {} - {}",
        report.coordinate_range2.0,
        report.coordinate_range2.1
    );
    println!("Bias = {}{unit}", format_number("%g", report.bias));
    println!("RMSE = {}{unit}", format_number("%g", report.rmse));
    println!("MAE = {}{unit}", format_number("%g", report.mae));
    println!("Correlation = {}", format_number("%g", report.correlation));
    println!(
        "Coefficient of determination (R2) = {}",
        format_number("%g", report.r_squared)
    );
    Ok(0)
}

fn handle_info(args: &InfoArgs) -> anyhow::Result<i32> {
    let info = info::file_info(&args.file, args.variable.as_deref(), args.detailed)?;
    remember_paths([args.file.clone()]);
    match args.format {
        OutputFormat::Human => info::print_file_info_human(&info),
        OutputFormat::Json => info::print_file_info_json(&info)?,
        OutputFormat::Yaml => info::print_file_info_yaml(&info)?,
    }
    Ok(0)
}

/// Record opened paths in the persisted most-recently-used list.
fn remember_paths(paths: impl IntoIterator<Item = PathBuf>) {
    let mut settings = AppSettings::load_default();
    for path in paths {
        settings.add_recent_path(&path);
    }
    if let Err(e) = settings.save_if_modified() {
        log::warn!("could not save settings: {e}");
    }
}

/// Progress bar sink for range scans and animation recording.
struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for BarSink {
    fn progress(&mut self, fraction: f64) {
        self.bar
            .set_position((fraction.clamp(0.0, 1.0) * 100.0) as u64);
    }
}

fn bar_sink(quiet: bool) -> BarSink {
    let bar = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(100).with_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {percent:>3}%")
                .expect("progress template"),
        )
    };
    BarSink { bar }
}

/// One positional event on the plot command line, ordered by argv index.
/// Expressions and reassignments bind to the most recent source.
#[derive(Debug, Clone, PartialEq)]
enum ArgEvent {
    Source(String),
    Expression { label: Option<String>, text: String },
    Reassign(String),
}

/// Build a plotting job from parsed arguments, pairing each -e/-E/--reassign
/// with the -s source that precedes it on the command line. Returns a usage
/// message on error (exit code 2).
pub fn build_plot_job(plot: &PlotArgs, matches: &ArgMatches) -> Result<PlotJob, String> {
    if plot.expressions.is_empty()
        && plot.named_expressions.is_empty()
        && plot.figure_settings.is_none()
    {
        return Err("No data to plot specified via -e or -x switch. Exiting.".to_string());
    }

    let mut events: Vec<(usize, ArgEvent)> = Vec::new();
    if let Some(indices) = matches.indices_of("sources") {
        for (index, value) in indices.zip(&plot.sources) {
            events.push((index, ArgEvent::Source(value.clone())));
        }
    }
    if let Some(indices) = matches.indices_of("expressions") {
        for (index, value) in indices.zip(&plot.expressions) {
            events.push((
                index,
                ArgEvent::Expression {
                    label: None,
                    text: value.clone(),
                },
            ));
        }
    }
    if let Some(indices) = matches.indices_of("named_expressions") {
        let indices: Vec<usize> = indices.collect();
        for (pair, index) in plot.named_expressions.chunks(2).zip(indices.chunks(2)) {
            if let [name, text] = pair {
                events.push((
                    index[0],
                    ArgEvent::Expression {
                        label: Some(name.clone()),
                        text: text.clone(),
                    },
                ));
            }
        }
    }
    if let Some(indices) = matches.indices_of("reassign") {
        for (index, value) in indices.zip(&plot.reassign) {
            events.push((index, ArgEvent::Reassign(value.clone())));
        }
    }
    events.sort_by_key(|(index, _)| *index);

    let (sources, series) = pair_events(events.into_iter().map(|(_, e)| e))?;

    let mut assignments = Vec::new();
    for assignment in &plot.assignments {
        let Some((name, value)) = assignment.split_once('=') else {
            return Err(format!(
                "Optional arguments should be PROPERTY=VALUE assignments for plot properties, \
                 e.g., Font/Size=12. \"{assignment}\" is not an assignment."
            ));
        };
        assignments.push((name.to_string(), value.to_string()));
    }

    Ok(PlotJob {
        sources,
        series,
        figure_settings: plot.figure_settings.clone(),
        assignments,
        animate: plot.animate.clone(),
        output: plot.output.clone(),
        dpi: plot.dpi,
        ids: plot.ids.clone(),
    })
}

/// Fold the ordered event stream into source bindings and series
/// definitions.
fn pair_events(
    events: impl Iterator<Item = ArgEvent>,
) -> Result<(Vec<SourceBinding>, Vec<SeriesDef>), String> {
    let mut sources: Vec<SourceBinding> = Vec::new();
    let mut series = Vec::new();
    for event in events {
        match event {
            ArgEvent::Source(value) => {
                sources.push(parse_source_binding(&value, sources.len()));
            }
            ArgEvent::Expression { label, text } => {
                let Some(last) = sources.last() else {
                    return Err(
                        "-e/--expression must be preceded by a -s/--source option.".to_string()
                    );
                };
                series.push(SeriesDef {
                    label,
                    source: last.name.clone(),
                    expression: text,
                });
            }
            ArgEvent::Reassign(value) => {
                let Some(last) = sources.last_mut() else {
                    return Err("--reassign must be preceded by a -s/--source option.".to_string());
                };
                last.reassignments.extend(parse_reassignments(&value)?);
            }
        }
    }
    Ok((sources, series))
}

/// Parse a `[NAME=]PATH` source argument. A prefix that is not a plain
/// alphanumeric name is treated as part of the path and an automatic
/// `source<N>` name is assigned.
pub fn parse_source_binding(value: &str, count: usize) -> SourceBinding {
    match value.split_once('=') {
        Some((name, path))
            if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            SourceBinding::new(name, path)
        }
        Some((_, path)) => SourceBinding::new(format!("source{count}"), path),
        None => SourceBinding::new(format!("source{count}"), value),
    }
}

/// Parse `OLD=NEW[,OLD2=NEW2,...]` dimension reassignment syntax.
pub fn parse_reassignments(value: &str) -> Result<Vec<(String, String)>, String> {
    let mut pairs = Vec::new();
    for part in value.split(',') {
        let Some((old, new)) = part.split_once('=') else {
            return Err(format!(
                "Reassignment must be in OLD=NEW[,OLD2=NEW2,...] format; \"{part}\" is not an \
                 assignment."
            ));
        };
        if old.trim().is_empty() || new.trim().is_empty() {
            return Err("Reassignment names cannot be empty.".to_string());
        }
        pairs.push((old.trim().to_string(), new.trim().to_string()));
    }
    Ok(pairs)
}

/// Parse stats-style source arguments into a registry.
fn open_sources(values: &[String]) -> NcResult<StoreRegistry> {
    let options = OpenOptions::default();
    let mut registry = StoreRegistry::new();
    for (count, value) in values.iter().enumerate() {
        let binding = parse_source_binding(value, count);
        log::info!("opening '{}'", binding.path.display());
        registry.add(&binding.name, NetcdfStore::open(&binding.path, &options)?);
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source_binding() {
        let binding = parse_source_binding("run=model.nc", 0);
        assert_eq!(binding.name, "run");
        assert_eq!(binding.path, PathBuf::from("model.nc"));

        let binding = parse_source_binding("model.nc", 2);
        assert_eq!(binding.name, "source2");
        assert_eq!(binding.path, PathBuf::from("model.nc"));

        // A non-alphanumeric prefix is not a name.
        let binding = parse_source_binding("./data=weird/file.nc", 1);
        assert_eq!(binding.name, "source1");
        assert_eq!(binding.path, PathBuf::from("weird/file.nc"));
    }

    #[test]
    fn test_parse_reassignments() {
        let pairs = parse_reassignments("time=time2,depth=z").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("time".to_string(), "time2".to_string()),
                ("depth".to_string(), "z".to_string()),
            ]
        );
        assert!(parse_reassignments("time").is_err());
        assert!(parse_reassignments("=x").is_err());
    }

    #[test]
    fn test_pair_events_binds_to_most_recent_source() {
        let events = vec![
            ArgEvent::Source("a.nc".to_string()),
            ArgEvent::Expression {
                label: None,
                text: "temp".to_string(),
            },
            ArgEvent::Source("obs=b.nc".to_string()),
            ArgEvent::Expression {
                label: Some("Observed".to_string()),
                text: "temp".to_string(),
            },
            ArgEvent::Reassign("time=time2".to_string()),
        ];
        let (sources, series) = pair_events(events.into_iter()).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].name, "source0");
        assert_eq!(sources[1].name, "obs");
        assert_eq!(
            sources[1].reassignments,
            vec![("time".to_string(), "time2".to_string())]
        );
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].source, "source0");
        assert_eq!(series[1].source, "obs");
        assert_eq!(series[1].label.as_deref(), Some("Observed"));
    }

    #[test]
    fn test_pair_events_expression_without_source() {
        let events = vec![ArgEvent::Expression {
            label: None,
            text: "temp".to_string(),
        }];
        assert!(pair_events(events.into_iter()).is_err());
    }
}
