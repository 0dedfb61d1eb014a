use crate::frames::{FrameLoader, FrameSequence};
use crate::output::Surface;
use crate::render::{Figure, Visualizer, DEFAULT_MARKER_SIZE};
use crate::segmentation::{
    logits_to_mask, FrameMasks, Mask, ObjectId, PointLabel, SegmentMap, VideoPredictor,
};
use anyhow::{bail, Result};
use ndarray::{ArrayView2, Axis};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("no frames found in {0}")]
    EmptyDirectory(PathBuf),

    #[error("frame index {index} out of range ({len} frames)")]
    FrameOutOfRange { index: usize, len: usize },

    #[error("{points} click points but {labels} labels")]
    LengthMismatch { points: usize, labels: usize },

    #[error("at least one click point is required")]
    NoPoints,

    #[error("stride must be at least 1")]
    ZeroStride,

    #[error("video has already been propagated in this session")]
    AlreadyPropagated,
}

/// One segmentation session over one frame directory
///
/// Clicks seed masks through the predictor, a single propagation pass
/// collects masks for every frame, and the results are drawn onto a
/// [`Surface`].
pub struct Sam2Processor<P: VideoPredictor> {
    predictor: P,
    state: P::State,
    frames: FrameSequence,
    visualizer: Visualizer,
    /// frame -> boxes drawn with that frame's clicks, as (x0, y0, x1, y1)
    boxes: BTreeMap<usize, Vec<[f32; 4]>>,
    propagated: bool,
}

impl<P: VideoPredictor> Sam2Processor<P> {
    /// List the frames in `video_directory` and bind the predictor to them
    pub fn new<D: AsRef<Path>>(predictor: P, video_directory: D) -> Result<Self> {
        let frames = FrameLoader::new(video_directory).load()?;
        Self::with_frames(predictor, frames)
    }

    pub fn with_frames(mut predictor: P, frames: FrameSequence) -> Result<Self> {
        if frames.is_empty() {
            return Err(ProcessorError::EmptyDirectory(frames.directory().to_path_buf()).into());
        }

        tracing::info!(
            "Found {} frames in {}",
            frames.len(),
            frames.directory().display()
        );
        tracing::debug!("Frame order: {:?}", frames.names());
        let state = predictor.init_state(&frames)?;

        Ok(Self {
            predictor,
            state,
            frames,
            visualizer: Visualizer::new(),
            boxes: BTreeMap::new(),
            propagated: false,
        })
    }

    pub fn frames(&self) -> &FrameSequence {
        &self.frames
    }

    /// Forward labelled clicks for one object on one frame to the predictor
    pub fn apply_clicks_to_predictor(
        &mut self,
        frame_index: usize,
        object_id: ObjectId,
        click_points: &[[f32; 2]],
        click_labels: &[PointLabel],
    ) -> Result<FrameMasks> {
        self.check_frame(frame_index)?;
        if click_points.len() != click_labels.len() {
            return Err(ProcessorError::LengthMismatch {
                points: click_points.len(),
                labels: click_labels.len(),
            }
            .into());
        }
        if click_points.is_empty() {
            return Err(ProcessorError::NoPoints.into());
        }

        tracing::info!(
            "Adding {} click(s) for object {} on frame {}",
            click_points.len(),
            object_id,
            frame_index
        );

        self.predictor.add_new_points(
            &mut self.state,
            frame_index,
            object_id,
            click_points,
            click_labels,
        )
    }

    /// Mark a box to draw whenever `frame_index` is displayed with its clicks
    pub fn add_box(&mut self, frame_index: usize, bbox: [f32; 4]) -> Result<()> {
        self.check_frame(frame_index)?;
        self.boxes.entry(frame_index).or_default().push(bbox);
        Ok(())
    }

    /// Draw the clicks and a mask over one frame
    #[allow(clippy::too_many_arguments)]
    pub fn display_mask_on_frame(
        &self,
        surface: &mut dyn Surface,
        frame_index: usize,
        points: &[[f32; 2]],
        labels: &[PointLabel],
        mask: &Mask,
        object_id: ObjectId,
        show: bool,
    ) -> Result<()> {
        self.check_frame(frame_index)?;
        let image = self.frames.open(frame_index)?;

        if show {
            let mut figure = Figure::new(format!("Frame {}", frame_index), &image);
            self.visualizer
                .show_points(points, labels, &mut figure, DEFAULT_MARKER_SIZE)?;
            self.visualizer
                .show_mask(mask, &mut figure, Some(object_id), false)?;
            for bbox in self.boxes.get(&frame_index).into_iter().flatten() {
                self.visualizer.show_box(*bbox, &mut figure);
            }
            surface.show(&figure)?;
        }

        Ok(())
    }

    /// Threshold mask logits at 0.0
    pub fn convert_mask_logits(logits: ArrayView2<f32>) -> Mask {
        logits_to_mask(logits)
    }

    /// Run the predictor's propagation once and collect every frame's masks
    ///
    /// A session propagates at most once; a second call fails.
    pub fn propagate_and_segment_video(&mut self) -> Result<SegmentMap> {
        if self.propagated {
            return Err(ProcessorError::AlreadyPropagated.into());
        }

        let propagation = self.predictor.propagate_in_video(&mut self.state)?;
        self.propagated = true;

        let mut segments = SegmentMap::new();
        for step in propagation {
            let step = step?;

            let objects = step.mask_logits.len_of(Axis(0));
            if step.object_ids.len() != objects {
                bail!(
                    "frame {}: {} object ids but {} masks",
                    step.frame_index,
                    step.object_ids.len(),
                    objects
                );
            }

            let masks: BTreeMap<ObjectId, Mask> = step
                .object_ids
                .iter()
                .zip(step.mask_logits.axis_iter(Axis(0)))
                .map(|(object_id, logits)| (*object_id, Self::convert_mask_logits(logits)))
                .collect();

            tracing::debug!(
                "Segmented frame {} ({} objects)",
                step.frame_index,
                masks.len()
            );
            segments.insert(step.frame_index, masks);
        }

        tracing::info!("Propagation finished: {} frames segmented", segments.len());
        Ok(segments)
    }

    /// Draw every `stride`-th frame with its object masks
    pub fn visualize_segments(
        &self,
        surface: &mut dyn Surface,
        segments: &SegmentMap,
        stride: usize,
        show: bool,
    ) -> Result<()> {
        if stride == 0 {
            return Err(ProcessorError::ZeroStride.into());
        }

        if show {
            surface.close_all()?;
        }

        for index in (0..self.frames.len()).step_by(stride) {
            let image = self.frames.open(index)?;
            let mut figure = Figure::new(format!("Frame {}", index), &image);

            if let Some(masks) = segments.get(&index) {
                for (object_id, mask) in masks {
                    self.visualizer
                        .show_mask(mask, &mut figure, Some(*object_id), false)?;
                }
            }

            if show {
                surface.show(&figure)?;
            }
        }

        Ok(())
    }

    fn check_frame(&self, frame_index: usize) -> Result<(), ProcessorError> {
        if frame_index >= self.frames.len() {
            return Err(ProcessorError::FrameOutOfRange {
                index: frame_index,
                len: self.frames.len(),
            });
        }
        Ok(())
    }
}
