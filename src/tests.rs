use crate::animate::{record_frames, AnimationConfig, FrameTemplate};
use crate::error::NcplotError;
use crate::figure::{AddSeriesOutcome, Figure, FigureSeriesController, RedrawOutcome};
use crate::handle;
use crate::scan::{NullProgress, ProgressSink, RangeScanner};
use crate::slice::{apply_slice, DimSelection, SliceSpec};
use crate::stats::{describe, StatsOptions, StatsOutcome};
use crate::store::{DimensionDatatype, NetcdfStore, OpenOptions, StoreRegistry};
use crate::title::format_title;
use crate::{run_plot_job, PlotJob, PlotOutcome, SeriesDef, SourceBinding};
use ndarray::Array;
use std::path::Path;

/// Create a file with a variable `temp(time, lat, lon)` where lat and lon
/// are singletons, `time` carries a datetime coordinate, and values are
/// `280 + i` along time.
fn create_temperature_file(path: &Path, time_len: usize) {
    let mut file = netcdf::create(path).unwrap();
    file.add_dimension("time", time_len).unwrap();
    file.add_dimension("lat", 1).unwrap();
    file.add_dimension("lon", 1).unwrap();

    {
        let mut time = file.add_variable::<f64>("time", &["time"]).unwrap();
        time.put_attribute("units", "days since 2020-01-01").unwrap();
        let values: Vec<f64> = (0..time_len).map(|i| 14.0 + i as f64).collect();
        time.put(Array::from_vec(values).view(), ..).unwrap();
    }
    {
        let mut lat = file.add_variable::<f64>("lat", &["lat"]).unwrap();
        lat.put_attribute("units", "degrees_north").unwrap();
        lat.put(Array::from_vec(vec![52.0]).view(), ..).unwrap();
    }
    {
        let mut lon = file.add_variable::<f64>("lon", &["lon"]).unwrap();
        lon.put_attribute("units", "degrees_east").unwrap();
        lon.put(Array::from_vec(vec![4.0]).view(), ..).unwrap();
    }
    {
        let mut temp = file
            .add_variable::<f64>("temp", &["time", "lat", "lon"])
            .unwrap();
        temp.put_attribute("units", "K").unwrap();
        let values: Vec<f64> = (0..time_len).map(|i| 280.0 + i as f64).collect();
        let array = Array::from_shape_vec((time_len, 1, 1), values).unwrap();
        temp.put(array.view(), ..).unwrap();
    }
}

/// Create a file with `temp(time, depth)` including one masked value, plus a
/// numeric depth coordinate whose first entry is 3.456.
fn create_profile_file(path: &Path) {
    let mut file = netcdf::create(path).unwrap();
    file.add_dimension("time", 4).unwrap();
    file.add_dimension("depth", 3).unwrap();

    {
        let mut time = file.add_variable::<f64>("time", &["time"]).unwrap();
        time.put_attribute("units", "days").unwrap();
        time.put(Array::from_vec(vec![0.0, 1.0, 2.0, 3.0]).view(), ..)
            .unwrap();
    }
    {
        let mut depth = file.add_variable::<f64>("depth", &["depth"]).unwrap();
        depth.put_attribute("units", "m").unwrap();
        depth
            .put(Array::from_vec(vec![3.456, 5.0, 10.0]).view(), ..)
            .unwrap();
    }
    {
        let mut temp = file.add_variable::<f64>("temp", &["time", "depth"]).unwrap();
        temp.put_attribute("units", "degC").unwrap();
        temp.put_attribute("_FillValue", -999.0).unwrap();
        let mut values: Vec<f64> = (0..12).map(|i| 10.0 + i as f64).collect();
        values[5] = -999.0;
        let array = Array::from_shape_vec((4, 3), values).unwrap();
        temp.put(array.view(), ..).unwrap();
    }
}

fn registry_with(path: &Path) -> StoreRegistry {
    let mut registry = StoreRegistry::new();
    registry.add(
        "source0",
        NetcdfStore::open(path, &OpenOptions::default()).unwrap(),
    );
    registry
}

#[cfg(test)]
mod resolution_tests {
    use super::*;

    #[test]
    fn test_resolve_plain_variable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.nc");
        create_temperature_file(&path, 10);
        let registry = registry_with(&path);

        let resolved = handle::resolve("temp", &registry, "source0").unwrap();
        assert_eq!(resolved.dimensions(), &["time", "lat", "lon"]);
        assert_eq!(resolved.ui_shape(), vec![10, 1, 1]);
        assert_eq!(resolved.unit(), "K");
        assert!(resolved.native_slicing().is_none());
    }

    #[test]
    fn test_resolve_unknown_variable_lists_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.nc");
        create_temperature_file(&path, 4);
        let registry = registry_with(&path);

        let err = handle::resolve("nonsense", &registry, "source0").unwrap_err();
        match err {
            NcplotError::Expression { available, .. } => {
                assert!(available.contains(&"temp".to_string()));
                assert!(available.contains(&"time".to_string()));
            }
            other => panic!("expected expression error, got {other:?}"),
        }
    }

    #[test]
    fn test_expression_handle_supports_native_slicing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.nc");
        create_temperature_file(&path, 6);
        let registry = registry_with(&path);

        let resolved = handle::resolve("temp-273.15", &registry, "source0").unwrap();
        assert_eq!(resolved.dimensions(), &["time", "lat", "lon"]);
        assert!(resolved.native_slicing().is_some());

        let mut spec = SliceSpec::auto_singletons(resolved.dimensions(), resolved.shape());
        spec.set("time", DimSelection::Index(2));
        let sliced = apply_slice("temp-273.15", &resolved, &spec);
        assert_eq!(sliced, "temp[2,0,0]-273.15");
    }

    #[test]
    fn test_apply_slice_appends_suffix_for_plain_variables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.nc");
        create_temperature_file(&path, 6);
        let registry = registry_with(&path);

        let resolved = handle::resolve("temp", &registry, "source0").unwrap();
        let spec = SliceSpec::auto_singletons(resolved.dimensions(), resolved.shape());
        let sliced = apply_slice("temp", &resolved, &spec);
        assert_eq!(sliced, "temp[:,0,0]");

        // Re-resolving the sliced expression drops exactly the sliced
        // dimensions, in original relative order.
        let sliced_handle = handle::resolve(&sliced, &registry, "source0").unwrap();
        assert_eq!(sliced_handle.dimensions(), &["time"]);
    }

    #[test]
    fn test_sliced_dimensions_preserve_relative_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.nc");
        create_profile_file(&path);
        let registry = registry_with(&path);

        let resolved = handle::resolve("temp[:,1]", &registry, "source0").unwrap();
        assert_eq!(resolved.dimensions(), &["time"]);

        let resolved = handle::resolve("temp[2,:]", &registry, "source0").unwrap();
        assert_eq!(resolved.dimensions(), &["depth"]);
    }

    #[test]
    fn test_slab_carries_coordinates_and_unit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.nc");
        create_temperature_file(&path, 5);
        let registry = registry_with(&path);

        let resolved = handle::resolve("temp-273.15", &registry, "source0").unwrap();
        let mut spec = SliceSpec::new();
        spec.set("lat", DimSelection::Index(0));
        spec.set("lon", DimSelection::Index(0));
        let slab = resolved.slab(&registry, "source0", &spec).unwrap();
        assert_eq!(slab.dims, vec!["time"]);
        assert_eq!(slab.shape(), &[5]);
        assert_eq!(slab.coords[0], vec![14.0, 15.0, 16.0, 17.0, 18.0]);
        assert_eq!(slab.unit, "K");
        assert!((slab.data[[0]] - (280.0 - 273.15)).abs() < 1e-9);
    }

    #[test]
    fn test_fill_values_are_masked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.nc");
        create_profile_file(&path);
        let registry = registry_with(&path);

        let resolved = handle::resolve("temp", &registry, "source0").unwrap();
        let slab = resolved
            .slab(&registry, "source0", &SliceSpec::new())
            .unwrap();
        assert!(slab.data[[1, 2]].is_nan());
        assert_eq!(slab.data[[0, 0]], 10.0);
    }

    #[test]
    fn test_datetime_dimension_detection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.nc");
        create_temperature_file(&path, 3);
        let store = NetcdfStore::open(&path, &OpenOptions::default()).unwrap();
        assert_eq!(
            store.dimension_info("time").unwrap().datatype,
            DimensionDatatype::Datetime
        );
        assert_eq!(
            store.dimension_info("lat").unwrap().datatype,
            DimensionDatatype::Float
        );
    }

    #[test]
    fn test_coordinate_reassignment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.nc");
        create_profile_file(&path);
        let mut store = NetcdfStore::open(&path, &OpenOptions::default()).unwrap();
        assert_eq!(store.coordinate_for("depth"), "depth");
        store.reassign_coordinate("depth", "time").unwrap();
        assert_eq!(store.coordinate_for("depth"), "time");
        assert!(store.reassign_coordinate("depth", "missing").is_err());
        store.reset_reassignments();
        assert_eq!(store.coordinate_for("depth"), "depth");
    }
}

#[cfg(test)]
mod scan_tests {
    use super::*;

    #[test]
    fn test_scan_bounds_cover_all_slabs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.nc");
        create_profile_file(&path);
        let registry = registry_with(&path);

        let scanner = RangeScanner::new(&registry, "source0");
        let bounds = scanner
            .scan(
                "temp",
                &["time".to_string()],
                &SliceSpec::new(),
                &mut NullProgress,
            )
            .unwrap();
        assert!(bounds.completed);
        // Values are 10..21 with index 5 masked.
        assert_eq!(bounds.data_min, Some(10.0));
        assert_eq!(bounds.data_max, Some(21.0));
        let (lo, hi) = bounds.dim_bounds("time").unwrap();
        assert_eq!((lo, hi), (Some(0.0), Some(3.0)));
        let (lo, hi) = bounds.dim_bounds("depth").unwrap();
        assert_eq!((lo, hi), (Some(3.456), Some(10.0)));
    }

    #[test]
    fn test_scan_with_no_iterated_dims_returns_fixed_slab_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.nc");
        create_profile_file(&path);
        let registry = registry_with(&path);

        let mut fixed = SliceSpec::new();
        fixed.set("time", DimSelection::Index(0));
        let scanner = RangeScanner::new(&registry, "source0");
        let bounds = scanner.scan("temp", &[], &fixed, &mut NullProgress).unwrap();
        // First time slab holds 10, 11, 12.
        assert_eq!(bounds.data_min, Some(10.0));
        assert_eq!(bounds.data_max, Some(12.0));
    }

    struct CancelAfter {
        leaves: usize,
        seen: usize,
    }

    impl ProgressSink for CancelAfter {
        fn progress(&mut self, _fraction: f64) {
            self.seen += 1;
        }

        fn canceled(&self) -> bool {
            self.seen >= self.leaves
        }
    }

    #[test]
    fn test_canceled_scan_returns_partial_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.nc");
        create_profile_file(&path);
        let registry = registry_with(&path);

        let mut sink = CancelAfter { leaves: 1, seen: 0 };
        let scanner = RangeScanner::new(&registry, "source0");
        let bounds = scanner
            .scan("temp", &["time".to_string()], &SliceSpec::new(), &mut sink)
            .unwrap();
        assert!(!bounds.completed);
        // Only the first time slab was folded in.
        assert_eq!(bounds.data_min, Some(10.0));
        assert_eq!(bounds.data_max, Some(12.0));
    }
}

#[cfg(test)]
mod controller_tests {
    use super::*;

    #[test]
    fn test_redraw_preserves_display_properties_across_slice_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.nc");
        create_profile_file(&path);
        let registry = registry_with(&path);

        let mut controller = FigureSeriesController::new(Figure::new());
        let outcome = controller
            .add_series(&registry, "source0", "temp", None, None)
            .unwrap();
        assert!(matches!(outcome, AddSeriesOutcome::Plotted(0)));
        assert_eq!(controller.figure().series()[0].secondary_id(), "temp");

        controller.figure_mut().series_mut(0).unwrap().style.label =
            Some("my profile".to_string());

        let outcome = controller
            .set_slice(&registry, "time", Some(DimSelection::Index(1)))
            .unwrap();
        assert_eq!(outcome, RedrawOutcome::Plotted);
        let series = &controller.figure().series()[0];
        assert_eq!(series.secondary_id(), "temp[1,:]");
        assert_eq!(series.style.label.as_deref(), Some("my profile"));
    }

    #[test]
    fn test_changing_sliced_dimensions_clears_axis_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.nc");
        create_profile_file(&path);
        let registry = registry_with(&path);

        let mut controller = FigureSeriesController::new(Figure::new());
        controller
            .add_series(&registry, "source0", "temp", None, None)
            .unwrap();
        controller.figure_mut().axis_mut("y").minimum = Some(-5.0);

        // Moving the index along an already-sliced dimension keeps bounds.
        controller
            .set_slice(&registry, "time", Some(DimSelection::Index(0)))
            .unwrap();
        assert_eq!(controller.figure().axis("y").unwrap().minimum, None);

        controller.figure_mut().axis_mut("y").minimum = Some(-5.0);
        controller
            .set_slice(&registry, "time", Some(DimSelection::Index(2)))
            .unwrap();
        assert_eq!(controller.figure().axis("y").unwrap().minimum, Some(-5.0));
    }

    #[test]
    fn test_scalar_and_need_more_slices_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.nc");
        create_profile_file(&path);
        let registry = registry_with(&path);

        let mut controller = FigureSeriesController::new(Figure::new());
        let outcome = controller
            .add_series(&registry, "source0", "temp[0,1]", None, None)
            .unwrap();
        match outcome {
            AddSeriesOutcome::Scalar(text) => assert!(text.contains("degC")),
            other => panic!("expected scalar, got {other:?}"),
        }

        let free = crate::slice::PlotShape::from_free_count(4);
        assert_eq!(free, crate::slice::PlotShape::NeedMoreSlices(2));
    }

    #[test]
    fn test_resolution_failure_keeps_last_good_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.nc");
        create_profile_file(&path);
        let registry = registry_with(&path);

        let mut controller = FigureSeriesController::new(Figure::new());
        controller
            .add_series(&registry, "source0", "temp", None, None)
            .unwrap();
        let bound = controller.figure().series()[0].secondary_id().to_string();

        // Point the registry at a store without the variable.
        let empty_dir = tempfile::tempdir().unwrap();
        let other = empty_dir.path().join("o.nc");
        {
            let mut file = netcdf::create(&other).unwrap();
            file.add_dimension("x", 2).unwrap();
            let mut var = file.add_variable::<f64>("pressure", &["x"]).unwrap();
            var.put(Array::from_vec(vec![1.0, 2.0]).view(), ..).unwrap();
        }
        let broken = registry_with(&other);
        assert!(controller.redraw(&broken, true, true).is_err());
        assert_eq!(controller.figure().series()[0].secondary_id(), bound);
    }

    #[test]
    fn test_set_axes_bounds_scans_sliced_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.nc");
        create_profile_file(&path);
        let registry = registry_with(&path);

        let mut controller = FigureSeriesController::new(Figure::new());
        controller
            .add_series(&registry, "source0", "temp", None, None)
            .unwrap();
        controller
            .set_slice(&registry, "time", Some(DimSelection::Index(0)))
            .unwrap();

        controller
            .set_axes_bounds(&registry, None, &mut NullProgress)
            .unwrap();
        // Data axis bounds cover the range across every time index, not just
        // the displayed slab.
        let y = controller.figure().axis("y").unwrap();
        assert_eq!(y.minimum, Some(10.0));
        assert_eq!(y.maximum, Some(21.0));
        let x = controller.figure().axis("x").unwrap();
        assert_eq!(x.minimum, Some(3.456));
        assert_eq!(x.maximum, Some(10.0));
    }

    #[test]
    fn test_set_frame_rebinds_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.nc");
        create_profile_file(&path);
        let registry = registry_with(&path);

        let mut controller = FigureSeriesController::new(Figure::new());
        controller
            .add_series(&registry, "source0", "temp", None, None)
            .unwrap();
        assert!(controller.set_frame(&registry, "time", 1).unwrap());
        assert_eq!(
            controller.figure().series()[0].secondary_id(),
            "temp[1,:]"
        );
        // The same index derives the same expression: no rebinding.
        assert!(!controller.set_frame(&registry, "time", 1).unwrap());
    }
}

#[cfg(test)]
mod title_tests {
    use super::*;

    #[test]
    fn test_datetime_title() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.nc");
        create_temperature_file(&path, 5);
        let store = NetcdfStore::open(&path, &OpenOptions::default()).unwrap();

        // Coordinate value 14 days after 2020-01-01 is 2020-01-15.
        let mut spec = SliceSpec::new();
        spec.set("time", DimSelection::Index(0));
        let title = format_title(&store, &spec, "time", "%Y-%m-%d").unwrap();
        assert_eq!(title.as_deref(), Some("2020-01-15"));
    }

    #[test]
    fn test_numeric_title() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.nc");
        create_profile_file(&path);
        let store = NetcdfStore::open(&path, &OpenOptions::default()).unwrap();

        let mut spec = SliceSpec::new();
        spec.set("depth", DimSelection::Index(0));
        let title = format_title(&store, &spec, "depth", "depth=%.1f").unwrap();
        assert_eq!(title.as_deref(), Some("depth=3.5"));
    }

    #[test]
    fn test_malformed_coordinate_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.nc");
        create_profile_file(&path);
        let mut store = NetcdfStore::open(&path, &OpenOptions::default()).unwrap();

        // Reassigning depth's coordinate to the time variable makes the
        // coordinate not span its own dimension.
        store.reassign_coordinate("depth", "time").unwrap();
        let err = format_title(&store, &SliceSpec::new(), "depth", "%.1f").unwrap_err();
        assert!(matches!(err, NcplotError::CoordinateConsistency { .. }));
    }
}

#[cfg(test)]
mod batch_tests {
    use super::*;

    #[test]
    fn test_batch_plot_singletons_auto_sliced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temperature.nc");
        create_temperature_file(&path, 10);
        let out = dir.path().join("out.png");

        let job = PlotJob {
            sources: vec![SourceBinding::new("source0", &path)],
            series: vec![SeriesDef::plain("source0", "temp")],
            output: Some(out.clone()),
            dpi: 96,
            ..Default::default()
        };
        let outcome = run_plot_job(&job, &OpenOptions::default(), &mut NullProgress).unwrap();
        assert_eq!(outcome, PlotOutcome::Exported(out.clone()));
        assert!(out.exists());
        assert!(std::fs::metadata(&out).unwrap().len() > 0);
    }

    #[test]
    fn test_batch_preview_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temperature.nc");
        create_temperature_file(&path, 6);

        let job = PlotJob {
            sources: vec![SourceBinding::new("source0", &path)],
            series: vec![SeriesDef::plain("source0", "temp")],
            ..Default::default()
        };
        let outcome = run_plot_job(&job, &OpenOptions::default(), &mut NullProgress).unwrap();
        match outcome {
            PlotOutcome::Preview(text) => {
                assert!(text.contains("line"));
                assert!(text.contains("time"));
            }
            other => panic!("expected preview, got {other:?}"),
        }
    }

    #[test]
    fn test_batch_scalar_reports_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temperature.nc");
        create_temperature_file(&path, 4);

        let job = PlotJob {
            sources: vec![SourceBinding::new("source0", &path)],
            series: vec![SeriesDef::plain("source0", "temp[0,0,0]")],
            ..Default::default()
        };
        let outcome = run_plot_job(&job, &OpenOptions::default(), &mut NullProgress).unwrap();
        match outcome {
            PlotOutcome::Messages(messages) => {
                assert_eq!(messages.len(), 1);
                assert!(messages[0].contains("scalar"));
            }
            other => panic!("expected messages, got {other:?}"),
        }
    }

    #[test]
    fn test_batch_unknown_expression_fails_with_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temperature.nc");
        create_temperature_file(&path, 4);

        let job = PlotJob {
            sources: vec![SourceBinding::new("source0", &path)],
            series: vec![SeriesDef::plain("source0", "missing_var")],
            ..Default::default()
        };
        let err = run_plot_job(&job, &OpenOptions::default(), &mut NullProgress).unwrap_err();
        assert!(err.to_string().contains("temp"));
    }

    /// A variable with a free dimension left over once the animated one is
    /// sliced: `temp(time=5, depth=3)`.
    fn create_animation_file(path: &Path) {
        let mut file = netcdf::create(path).unwrap();
        file.add_dimension("time", 5).unwrap();
        file.add_dimension("depth", 3).unwrap();
        let mut depth = file.add_variable::<f64>("depth", &["depth"]).unwrap();
        depth
            .put(Array::from_vec(vec![0.0, 5.0, 10.0]).view(), ..)
            .unwrap();
        drop(depth);
        let mut temp = file.add_variable::<f64>("temp", &["time", "depth"]).unwrap();
        let values: Vec<f64> = (0..15).map(|i| i as f64).collect();
        temp.put(Array::from_shape_vec((5, 3), values).unwrap().view(), ..)
            .unwrap();
    }

    #[test]
    fn test_animation_export_writes_one_file_per_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.nc");
        create_animation_file(&path);
        let stills = dir.path().join("out");
        std::fs::create_dir(&stills).unwrap();

        let job = PlotJob {
            sources: vec![SourceBinding::new("source0", &path)],
            series: vec![SeriesDef::plain("source0", "temp")],
            animate: Some("time".to_string()),
            output: Some(stills.clone()),
            dpi: 96,
            ..Default::default()
        };
        let outcome = run_plot_job(&job, &OpenOptions::default(), &mut NullProgress).unwrap();
        match outcome {
            PlotOutcome::Frames(files) => {
                assert_eq!(files.len(), 5);
                for i in 0..5 {
                    let expected = stills.join(format!("{i}.png"));
                    assert!(expected.exists(), "missing {}", expected.display());
                }
            }
            other => panic!("expected frames, got {other:?}"),
        }
    }

    #[test]
    fn test_canceled_recording_leaves_partial_file_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temperature.nc");
        create_temperature_file(&path, 6);
        let stills = dir.path().join("frames");
        std::fs::create_dir(&stills).unwrap();
        let registry = registry_with(&path);

        struct CancelAfterTwo {
            frames: usize,
        }
        impl ProgressSink for CancelAfterTwo {
            fn progress(&mut self, _fraction: f64) {
                self.frames += 1;
            }
            fn canceled(&self) -> bool {
                self.frames >= 2
            }
        }

        let mut controller = FigureSeriesController::new(Figure::new());
        controller
            .add_series(&registry, "source0", "temp", None, None)
            .unwrap();
        let config = AnimationConfig::over("time", 6);
        let template = FrameTemplate::for_output(&stills, config.end).unwrap();
        let mut sink = CancelAfterTwo { frames: 0 };
        let files =
            record_frames(&mut controller, &registry, &config, &template, 96, &mut sink).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_recording_stops_running_member_of_same_group() {
        use crate::animate::{AnimationGroup, AnimationSequencer, SequencerState};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.nc");
        create_profile_file(&path);
        let registry = registry_with(&path);
        let stills = dir.path().join("rec");
        std::fs::create_dir(&stills).unwrap();

        let mut controller = FigureSeriesController::new(Figure::new());
        controller
            .add_series(&registry, "source0", "temp", None, None)
            .unwrap();

        struct CanceledImmediately;
        impl ProgressSink for CanceledImmediately {
            fn canceled(&self) -> bool {
                true
            }
        }

        let mut group = AnimationGroup::new();
        let a = group.add(AnimationSequencer::new());
        let b = group.add(AnimationSequencer::new());
        group
            .get_mut(a)
            .unwrap()
            .configure(AnimationConfig::over("depth", 3));
        group
            .get_mut(b)
            .unwrap()
            .configure(AnimationConfig::over("time", 4));
        group.play(a).unwrap();
        assert_eq!(group.get(a).unwrap().state(), SequencerState::Running);

        let template = FrameTemplate::for_output(&stills, 3).unwrap();
        let files = group
            .record(
                b,
                &mut controller,
                &registry,
                &template,
                96,
                &mut CanceledImmediately,
            )
            .unwrap();
        // The immediately-canceled recording wrote nothing, but it still
        // stopped the other running member first.
        assert!(files.is_empty());
        assert_eq!(group.get(a).unwrap().state(), SequencerState::Configured);
        assert_eq!(group.get(b).unwrap().state(), SequencerState::Configured);
    }

    #[test]
    fn test_animation_requires_valid_output_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temperature.nc");
        create_temperature_file(&path, 3);

        let job = PlotJob {
            sources: vec![SourceBinding::new("source0", &path)],
            series: vec![SeriesDef::plain("source0", "temp")],
            animate: Some("time".to_string()),
            output: Some(dir.path().join("missing-dir").join("plain.png")),
            ..Default::default()
        };
        assert!(run_plot_job(&job, &OpenOptions::default(), &mut NullProgress).is_err());
    }
}

#[cfg(test)]
mod stats_tests {
    use super::*;

    #[test]
    fn test_describe_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temperature.nc");
        create_temperature_file(&path, 5);
        let registry = registry_with(&path);

        let outcome = describe(
            &registry,
            "source0",
            "temp",
            &StatsOptions::default(),
        )
        .unwrap();
        match outcome {
            StatsOutcome::Summary(summary) => {
                assert_eq!(summary.count, 5);
                assert!((summary.mean - 282.0).abs() < 1e-9);
                assert_eq!(summary.min, 280.0);
                assert_eq!(summary.max, 284.0);
                assert_eq!(summary.unit, "K");
                assert!(summary.percentiles.is_none());
            }
            other => panic!("expected summary, got {other:?}"),
        }
    }

    #[test]
    fn test_describe_with_chunked_iteration_matches_single_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.nc");
        create_profile_file(&path);
        let registry = registry_with(&path);

        // A tiny slab budget forces iteration over the outer dimension.
        let chunked = describe(
            &registry,
            "source0",
            "temp",
            &StatsOptions {
                max_slab: 4,
                percentiles: false,
            },
        )
        .unwrap();
        let whole = describe(&registry, "source0", "temp", &StatsOptions::default()).unwrap();
        assert_eq!(chunked, whole);
    }

    #[test]
    fn test_describe_percentiles_and_masking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.nc");
        create_profile_file(&path);
        let registry = registry_with(&path);

        let outcome = describe(
            &registry,
            "source0",
            "temp",
            &StatsOptions {
                max_slab: 1_000_000,
                percentiles: true,
            },
        )
        .unwrap();
        match outcome {
            StatsOutcome::Summary(summary) => {
                // One of the 12 values is masked.
                assert_eq!(summary.count, 11);
                assert!(summary.percentiles.is_some());
                let p = summary.percentiles.unwrap();
                assert!(p.p2_5 <= p.p25 && p.p25 <= p.median);
                assert!(p.median <= p.p75 && p.p75 <= p.p97_5);
            }
            other => panic!("expected summary, got {other:?}"),
        }
    }

    #[test]
    fn test_describe_scalar_short_circuit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.nc");
        create_temperature_file(&path, 3);
        let registry = registry_with(&path);

        let outcome = describe(
            &registry,
            "source0",
            "temp[0,0,0]",
            &StatsOptions::default(),
        )
        .unwrap();
        match outcome {
            StatsOutcome::Scalar(text) => assert!(text.starts_with("280")),
            other => panic!("expected scalar, got {other:?}"),
        }
    }
}

#[cfg(test)]
mod compare_tests {
    use super::*;
    use crate::compare::{compare_series, CompareOptions};

    #[test]
    fn test_compare_identical_shifted_series() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.nc");
        create_temperature_file(&path, 5);
        let registry = registry_with(&path);

        let report = compare_series(
            &registry,
            "source0",
            "temp",
            "source0",
            "temp+1",
            &CompareOptions::default(),
        )
        .unwrap();
        assert_eq!(report.points, 5);
        assert!((report.bias - 1.0).abs() < 1e-9);
        assert!((report.rmse - 1.0).abs() < 1e-9);
        assert!((report.mae - 1.0).abs() < 1e-9);
        assert!((report.correlation - 1.0).abs() < 1e-9);
        // Values 280..284: SSQ(total) = 10, residual = 5 => R2 = 0.5.
        assert!((report.r_squared - 0.5).abs() < 1e-9);
        assert_eq!(report.unit, "K");
    }

    #[test]
    fn test_compare_trims_reference_outside_second_series_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.nc");
        create_temperature_file(&path, 5);
        let registry = registry_with(&path);

        // The second series only covers time indices 1..4, so the first and
        // last reference points are trimmed before interpolation.
        let report = compare_series(
            &registry,
            "source0",
            "temp",
            "source0",
            "temp[1:4,0,0]",
            &CompareOptions::default(),
        )
        .unwrap();
        assert_eq!(report.points, 3);
        assert!(report.bias.abs() < 1e-9);
        assert!(report.rmse.abs() < 1e-9);
        assert_eq!(report.coordinate_range1, (15.0, 17.0));
        assert_eq!(report.coordinate_range2, (15.0, 17.0));
    }

    #[test]
    fn test_compare_dump_writes_difference_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.nc");
        create_temperature_file(&path, 5);
        let registry = registry_with(&path);
        let dump = dir.path().join("diff.nc");

        compare_series(
            &registry,
            "source0",
            "temp",
            "source0",
            "temp+1",
            &CompareOptions {
                dump: Some(dump.clone()),
            },
        )
        .unwrap();

        let store = NetcdfStore::open(&dump, &OpenOptions::default()).unwrap();
        assert!(store.has_variable("difference"));
        assert!(store.has_variable("source1"));
        assert!(store.has_variable("source2"));
        let diff = store
            .read_values("difference", &[crate::store::DimExtent::All])
            .unwrap();
        assert!(diff.iter().all(|v| (v - 1.0).abs() < 1e-9));
    }
}
