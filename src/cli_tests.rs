//! # CLI Integration Tests
//!
//! End-to-end argument parsing tests: source/expression pairing across the
//! raw command line, usage-error detection, and subcommand surfaces.

use crate::cli::{build_plot_job, Cli, Commands};
use clap::CommandFactory;
use clap::FromArgMatches;

fn parse(args: &[&str]) -> (Cli, clap::ArgMatches) {
    let matches = Cli::command()
        .try_get_matches_from(args)
        .expect("arguments should parse");
    let cli = Cli::from_arg_matches(&matches).expect("cli should build");
    (cli, matches)
}

fn plot_job(args: &[&str]) -> Result<crate::PlotJob, String> {
    let (cli, matches) = parse(args);
    let Commands::Plot(plot) = &cli.command else {
        panic!("expected plot subcommand");
    };
    build_plot_job(plot, matches.subcommand_matches("plot").unwrap())
}

#[test]
fn test_basic_batch_invocation() {
    let job = plot_job(&[
        "ncplot",
        "plot",
        "-s",
        "temperature.nc",
        "-e",
        "temp",
        "-o",
        "out.png",
    ])
    .unwrap();
    assert_eq!(job.sources.len(), 1);
    assert_eq!(job.sources[0].name, "source0");
    assert_eq!(job.series.len(), 1);
    assert_eq!(job.series[0].expression, "temp");
    assert_eq!(job.series[0].source, "source0");
    assert_eq!(job.output.as_deref(), Some(std::path::Path::new("out.png")));
    assert_eq!(job.dpi, 96);
}

#[test]
fn test_expressions_bind_to_preceding_source() {
    let job = plot_job(&[
        "ncplot",
        "plot",
        "-s",
        "run=model.nc",
        "-e",
        "temp",
        "-s",
        "obs=observed.nc",
        "-e",
        "temp",
        "-E",
        "Salinity",
        "salt",
    ])
    .unwrap();
    assert_eq!(job.sources.len(), 2);
    assert_eq!(job.series.len(), 3);
    assert_eq!(job.series[0].source, "run");
    assert_eq!(job.series[1].source, "obs");
    assert_eq!(job.series[2].source, "obs");
    assert_eq!(job.series[2].label.as_deref(), Some("Salinity"));
    assert_eq!(job.series[2].expression, "salt");
}

#[test]
fn test_reassignment_attaches_to_preceding_source() {
    let job = plot_job(&[
        "ncplot",
        "plot",
        "-s",
        "a.nc",
        "--reassign",
        "time=time2,depth=z",
        "-e",
        "temp",
        "-s",
        "b.nc",
        "-e",
        "temp",
    ])
    .unwrap();
    assert_eq!(
        job.sources[0].reassignments,
        vec![
            ("time".to_string(), "time2".to_string()),
            ("depth".to_string(), "z".to_string()),
        ]
    );
    assert!(job.sources[1].reassignments.is_empty());
}

#[test]
fn test_missing_expression_and_settings_is_usage_error() {
    let err = plot_job(&["ncplot", "plot", "-s", "temperature.nc", "-o", "out.png"]).unwrap_err();
    assert!(err.contains("-e or -x"));
}

#[test]
fn test_expression_before_source_is_usage_error() {
    let err = plot_job(&["ncplot", "plot", "-e", "temp", "-s", "temperature.nc"]).unwrap_err();
    assert!(err.contains("preceded by a -s"));
}

#[test]
fn test_property_assignments_are_split() {
    let job = plot_job(&[
        "ncplot",
        "plot",
        "-s",
        "t.nc",
        "-e",
        "temp",
        "Title=my plot",
        "/Axes/y/Maximum=10",
    ])
    .unwrap();
    assert_eq!(
        job.assignments,
        vec![
            ("Title".to_string(), "my plot".to_string()),
            ("/Axes/y/Maximum".to_string(), "10".to_string()),
        ]
    );
}

#[test]
fn test_malformed_assignment_is_usage_error() {
    let err = plot_job(&["ncplot", "plot", "-s", "t.nc", "-e", "temp", "not-an-assignment"])
        .unwrap_err();
    assert!(err.contains("not an assignment"));
}

#[test]
fn test_animate_and_ids() {
    let job = plot_job(&[
        "ncplot",
        "plot",
        "-s",
        "t.nc",
        "-e",
        "temp",
        "-a",
        "time",
        "-o",
        "./stills",
        "-i",
        "fig-3a",
        "-d",
        "150",
    ])
    .unwrap();
    assert_eq!(job.animate.as_deref(), Some("time"));
    assert_eq!(job.ids, vec!["fig-3a".to_string()]);
    assert_eq!(job.dpi, 150);
}

#[test]
fn test_figure_settings_alone_is_sufficient() {
    let job = plot_job(&["ncplot", "plot", "-s", "t.nc", "-x", "figure.json"]).unwrap();
    assert!(job.series.is_empty());
    assert_eq!(
        job.figure_settings.as_deref(),
        Some(std::path::Path::new("figure.json"))
    );
}

#[test]
fn test_unknown_flag_is_a_clap_error() {
    let result = Cli::command().try_get_matches_from(["ncplot", "plot", "--bogus"]);
    let err = result.unwrap_err();
    assert!(err.use_stderr());
}

#[test]
fn test_stats_arguments() {
    let (cli, _) = parse(&[
        "ncplot",
        "stats",
        "-s",
        "model.nc",
        "-p",
        "--maxslab",
        "500",
        "temp-273.15",
    ]);
    let Commands::Stats(args) = &cli.command else {
        panic!("expected stats subcommand");
    };
    assert_eq!(args.sources, vec!["model.nc".to_string()]);
    assert!(args.percentiles);
    assert_eq!(args.maxslab, 500);
    assert_eq!(args.expression, "temp-273.15");
}

#[test]
fn test_stats_requires_a_source() {
    let result = Cli::command().try_get_matches_from(["ncplot", "stats", "temp"]);
    assert!(result.is_err());
}

#[test]
fn test_compare_arguments() {
    let (cli, _) = parse(&[
        "ncplot",
        "compare",
        "model.nc",
        "temp",
        "observed.nc",
        "temp",
        "--dump",
        "diff.nc",
    ]);
    let Commands::Compare(args) = &cli.command else {
        panic!("expected compare subcommand");
    };
    assert_eq!(args.expression1, "temp");
    assert_eq!(args.expression2, "temp");
    assert_eq!(args.dump.as_deref(), Some(std::path::Path::new("diff.nc")));
}

#[test]
fn test_compare_requires_four_positionals() {
    let result = Cli::command().try_get_matches_from(["ncplot", "compare", "model.nc", "temp"]);
    assert!(result.is_err());
}

#[test]
fn test_info_arguments() {
    let (cli, _) = parse(&["ncplot", "info", "data.nc", "--detailed", "-n", "temp"]);
    let Commands::Info(args) = &cli.command else {
        panic!("expected info subcommand");
    };
    assert!(args.detailed);
    assert_eq!(args.variable.as_deref(), Some("temp"));
}
