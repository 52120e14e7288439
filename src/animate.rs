//! # Animation Module
//!
//! Drives a dimension index through its range: interactively (a timer-driven
//! Running state advancing frames at a target interval) or exhaustively (a
//! synchronous Recording path exporting every frame in range to sequential
//! image files). Within a group of dimension controls, at most one sequencer
//! may be Running at a time; starting one stops the others.

use crate::error::{NcplotError, Result};
use crate::figure::{DynamicTitle, FigureSeriesController};
use crate::scan::ProgressSink;
use crate::store::StoreRegistry;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration of one animation: the dimension, its frame range (inclusive
/// bounds), a stride, the interactive frame interval, and the dynamic-title
/// toggle with its format string.
#[derive(Debug, Clone)]
pub struct AnimationConfig {
    pub dimension: String,
    pub start: usize,
    pub end: usize,
    pub stride: usize,
    pub frame_interval: Duration,
    pub dynamic_title: bool,
    pub title_format: String,
}

impl AnimationConfig {
    /// Animate a dimension over all `length` indices at the default 24
    /// frames per second.
    pub fn over(dimension: impl Into<String>, length: usize) -> Self {
        Self {
            dimension: dimension.into(),
            start: 0,
            end: length.saturating_sub(1),
            stride: 1,
            frame_interval: Duration::from_millis(1000 / 24),
            dynamic_title: false,
            title_format: String::new(),
        }
    }

    pub fn dynamic_title(&self) -> Option<DynamicTitle> {
        self.dynamic_title.then(|| DynamicTitle {
            dimension: self.dimension.clone(),
            format: self.title_format.clone(),
        })
    }

    fn frames(&self) -> impl Iterator<Item = usize> + use<> {
        (self.start..=self.end).step_by(self.stride.max(1))
    }

    fn frame_count(&self) -> usize {
        self.frames().count()
    }
}

/// Lifecycle of one animation controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// No animation object exists.
    Idle,
    /// Dimension, range, stride and interval chosen; not running.
    Configured,
    /// A timer is advancing frames at the configured interval.
    Running,
    /// Exhaustive synchronous export in progress.
    Recording,
}

/// State machine sequencing animation frames for one dimension control.
pub struct AnimationSequencer {
    state: SequencerState,
    config: Option<AnimationConfig>,
    frame: usize,
}

impl Default for AnimationSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl AnimationSequencer {
    pub fn new() -> Self {
        Self {
            state: SequencerState::Idle,
            config: None,
            frame: 0,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn config(&self) -> Option<&AnimationConfig> {
        self.config.as_ref()
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    /// Idle/Configured -> Configured with a new configuration.
    pub fn configure(&mut self, config: AnimationConfig) {
        self.frame = config.start;
        self.config = Some(config);
        self.state = SequencerState::Configured;
    }

    /// Configured -> Running.
    pub fn play(&mut self) -> Result<()> {
        match self.state {
            SequencerState::Configured => {
                self.state = SequencerState::Running;
                Ok(())
            }
            SequencerState::Running => Ok(()),
            _ => Err(NcplotError::Dimensionality(
                "no animation has been configured".to_string(),
            )),
        }
    }

    /// Running -> Configured.
    pub fn pause(&mut self) {
        if self.state == SequencerState::Running {
            self.state = SequencerState::Configured;
        }
    }

    /// Any state -> Idle; the animation state is destroyed.
    pub fn close(&mut self) {
        self.state = SequencerState::Idle;
        self.config = None;
        self.frame = 0;
    }

    /// Destroy the animation when its dimension is deselected as a slice.
    pub fn deselect_dimension(&mut self, dimension: &str) {
        if self
            .config
            .as_ref()
            .is_some_and(|c| c.dimension == dimension)
        {
            self.close();
        }
    }

    /// Advance one frame while Running: apply the new index to the slice
    /// spec and rebind the series only if the derived expression differs
    /// (stride rounding may land on the same index). Pauses at the end of
    /// the range. Returns whether the figure changed.
    pub fn step(
        &mut self,
        controller: &mut FigureSeriesController,
        registry: &StoreRegistry,
    ) -> Result<bool> {
        if self.state != SequencerState::Running {
            return Ok(false);
        }
        let config = self.config.as_ref().expect("running without config");
        let dimension = config.dimension.clone();
        let end = config.end;
        self.frame = (self.frame + config.stride.max(1)).min(end);
        let changed = controller.set_frame(registry, &dimension, self.frame)?;
        if self.frame >= end {
            self.pause();
        }
        Ok(changed)
    }

    /// Jump back to the first frame, stopping playback first.
    pub fn rewind(&mut self) {
        self.pause();
        if let Some(config) = &self.config {
            self.frame = config.start;
        }
    }
}

/// A group of sequencers sharing the invariant that only one may be Running
/// (or Recording) at a time.
#[derive(Default)]
pub struct AnimationGroup {
    members: Vec<AnimationSequencer>,
}

impl AnimationGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sequencer: AnimationSequencer) -> usize {
        self.members.push(sequencer);
        self.members.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&AnimationSequencer> {
        self.members.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut AnimationSequencer> {
        self.members.get_mut(index)
    }

    fn stop_others(&mut self, index: usize) {
        for (i, member) in self.members.iter_mut().enumerate() {
            if i != index {
                member.pause();
            }
        }
    }

    /// Start playback on one member, stopping any other running member
    /// first.
    pub fn play(&mut self, index: usize) -> Result<()> {
        self.stop_others(index);
        self.members[index].play()
    }

    /// Record one member's full frame range to disk, stopping any other
    /// running member first. Returns the files written; cancellation leaves
    /// a partial file set.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        index: usize,
        controller: &mut FigureSeriesController,
        registry: &StoreRegistry,
        template: &FrameTemplate,
        dpi: u32,
        sink: &mut dyn ProgressSink,
    ) -> Result<Vec<PathBuf>> {
        self.stop_others(index);
        let member = &mut self.members[index];
        let config = member
            .config
            .clone()
            .ok_or_else(|| {
                NcplotError::Dimensionality("no animation has been configured".to_string())
            })?;
        member.state = SequencerState::Recording;
        let result = record_frames(controller, registry, &config, template, dpi, sink);
        self.members[index].state = SequencerState::Configured;
        result
    }
}

/// Export every frame of an animation to sequential image files. This is the
/// synchronous, non-interactive path: it blocks until the range is exhausted
/// or the sink reports cancellation, in which case the files written so far
/// remain on disk as a valid partial set.
pub fn record_frames(
    controller: &mut FigureSeriesController,
    registry: &StoreRegistry,
    config: &AnimationConfig,
    template: &FrameTemplate,
    dpi: u32,
    sink: &mut dyn ProgressSink,
) -> Result<Vec<PathBuf>> {
    controller.set_dynamic_title(config.dynamic_title());
    let total = config.frame_count().max(1);
    let mut written = Vec::new();
    for (step, frame) in config.frames().enumerate() {
        if sink.canceled() {
            break;
        }
        controller.set_frame(registry, &config.dimension, frame)?;
        let path = template.frame_path(frame);
        controller.export(registry, &path, dpi)?;
        written.push(path);
        sink.progress((step + 1) as f64 / total as f64);
    }
    Ok(written)
}

/// Filename template for recorded frames: either a directory (frames become
/// zero-padded `N.png` files sized to the largest frame index) or an
/// explicit `%0Ni`-style pattern.
#[derive(Debug, Clone)]
pub struct FrameTemplate {
    prefix: PathBuf,
    width: usize,
    suffix: String,
}

impl FrameTemplate {
    /// Build a template from an animation output path.
    pub fn for_output(output: &Path, max_index: usize) -> Result<Self> {
        if output.is_dir() {
            return Ok(Self {
                prefix: output.join(""),
                width: index_width(max_index),
                suffix: ".png".to_string(),
            });
        }
        let text = output.to_string_lossy();
        if let Some(parsed) = parse_numeric_template(&text) {
            return Ok(parsed);
        }
        Err(NcplotError::render(format!(
            "animation output '{}' must be an existing directory or a filename template \
             containing a numeric placeholder such as '%05i'",
            output.display()
        )))
    }

    /// Path of the file for one frame index.
    pub fn frame_path(&self, frame: usize) -> PathBuf {
        let mut text = self.prefix.as_os_str().to_os_string();
        text.push(format!("{frame:0width$}", width = self.width));
        text.push(&self.suffix);
        PathBuf::from(text)
    }
}

/// Zero-padding width covering the largest frame index.
fn index_width(max_index: usize) -> usize {
    1 + (max_index.max(1) as f64).log10().floor() as usize
}

fn parse_numeric_template(text: &str) -> Option<FrameTemplate> {
    let percent = text.find('%')?;
    let rest = &text[percent + 1..];
    let digits_end = rest
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)?;
    let conv = rest[digits_end..].chars().next()?;
    if conv != 'i' && conv != 'd' {
        return None;
    }
    let width = rest[..digits_end].trim_start_matches('0');
    let width: usize = if digits_end == 0 {
        0
    } else {
        width.parse().unwrap_or(0)
    };
    Some(FrameTemplate {
        prefix: PathBuf::from(&text[..percent]),
        width,
        suffix: rest[digits_end + conv.len_utf8()..].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut seq = AnimationSequencer::new();
        assert_eq!(seq.state(), SequencerState::Idle);
        assert!(seq.play().is_err());

        seq.configure(AnimationConfig::over("time", 10));
        assert_eq!(seq.state(), SequencerState::Configured);
        seq.play().unwrap();
        assert_eq!(seq.state(), SequencerState::Running);
        seq.pause();
        assert_eq!(seq.state(), SequencerState::Configured);
        seq.close();
        assert_eq!(seq.state(), SequencerState::Idle);
        assert!(seq.config().is_none());
    }

    #[test]
    fn test_deselecting_dimension_destroys_animation() {
        let mut seq = AnimationSequencer::new();
        seq.configure(AnimationConfig::over("time", 5));
        seq.deselect_dimension("depth");
        assert_eq!(seq.state(), SequencerState::Configured);
        seq.deselect_dimension("time");
        assert_eq!(seq.state(), SequencerState::Idle);
    }

    #[test]
    fn test_group_play_is_mutually_exclusive() {
        let mut group = AnimationGroup::new();
        let a = group.add(AnimationSequencer::new());
        let b = group.add(AnimationSequencer::new());
        group
            .get_mut(a)
            .unwrap()
            .configure(AnimationConfig::over("time", 5));
        group
            .get_mut(b)
            .unwrap()
            .configure(AnimationConfig::over("depth", 3));

        group.play(a).unwrap();
        assert_eq!(group.get(a).unwrap().state(), SequencerState::Running);
        group.play(b).unwrap();
        assert_eq!(group.get(a).unwrap().state(), SequencerState::Configured);
        assert_eq!(group.get(b).unwrap().state(), SequencerState::Running);
    }

    #[test]
    fn test_frame_template_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let template = FrameTemplate::for_output(dir.path(), 4).unwrap();
        assert_eq!(
            template.frame_path(0),
            dir.path().join("0.png")
        );
        assert_eq!(
            template.frame_path(4),
            dir.path().join("4.png")
        );

        let template = FrameTemplate::for_output(dir.path(), 12).unwrap();
        assert_eq!(template.frame_path(3), dir.path().join("03.png"));
    }

    #[test]
    fn test_frame_template_from_pattern() {
        let template = FrameTemplate::for_output(Path::new("./movie/still%05i.png"), 10).unwrap();
        assert_eq!(
            template.frame_path(7),
            PathBuf::from("./movie/still00007.png")
        );

        let template = FrameTemplate::for_output(Path::new("frame%i.png"), 10).unwrap();
        assert_eq!(template.frame_path(7), PathBuf::from("frame7.png"));

        assert!(FrameTemplate::for_output(Path::new("no-placeholder.png"), 10).is_err());
    }

    #[test]
    fn test_animation_frames_and_stride() {
        let mut config = AnimationConfig::over("time", 10);
        config.stride = 3;
        let frames: Vec<usize> = config.frames().collect();
        assert_eq!(frames, vec![0, 3, 6, 9]);
        assert_eq!(config.frame_count(), 4);
    }
}
