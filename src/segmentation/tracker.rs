use super::preprocess::Preprocessor;
use super::types::{FrameMasks, ObjectId, PointLabel, Propagation, VideoPredictor};
use crate::frames::FrameSequence;
use anyhow::{bail, Context, Result};
use image::RgbImage;
use ndarray::{Array2, Array3, Axis};
use std::collections::{BTreeMap, HashMap};

/// Side of the low-resolution mask the decoder consumes and produces
pub const LOW_RES_SIZE: usize = 256;

/// Logit used for objects that have no prompt yet on or before a frame
pub const NO_OBJECT_LOGIT: f32 = -1024.0;

/// Prompt inputs of one mask decoder call
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderPrompt {
    /// Flattened [x0, y0, x1, y1, ...] on the model grid, padding point included
    pub point_coords: Vec<f32>,
    pub point_labels: Vec<f32>,
    /// Row-major `LOW_RES_SIZE`² logits, zeros when there is no mask prompt
    pub mask_input: Vec<f32>,
    pub has_mask_input: f32,
}

impl DecoderPrompt {
    fn new(
        preprocessor: &Preprocessor,
        video_size: (u32, u32),
        clicks: &[([f32; 2], PointLabel)],
        mask_prompt: Option<&Array2<f32>>,
    ) -> Self {
        let points: Vec<[f32; 2]> = clicks.iter().map(|(point, _)| *point).collect();
        let mut point_coords = preprocessor.scale_points(&points, video_size);
        let mut point_labels: Vec<f32> = clicks.iter().map(|(_, label)| label.as_f32()).collect();

        // Padding point: the decoder always expects a box slot or a -1 point
        point_coords.extend([0.0, 0.0]);
        point_labels.push(-1.0);

        let (mask_input, has_mask_input) = match mask_prompt {
            Some(mask) => (mask.iter().copied().collect(), 1.0),
            None => (vec![0.0; LOW_RES_SIZE * LOW_RES_SIZE], 0.0),
        };

        Self {
            point_coords,
            point_labels,
            mask_input,
            has_mask_input,
        }
    }

    pub fn num_points(&self) -> usize {
        self.point_labels.len()
    }
}

/// Image encoder plus promptable mask decoder
pub trait MaskModel {
    type Embedding: 'static;

    /// Side of the square grid click coordinates are scaled to
    fn input_size(&self) -> u32;

    /// Encode one frame into decoder features
    fn encode(&mut self, frame: &RgbImage) -> Result<Self::Embedding>;

    /// Decode the best mask for a prompt, as low-resolution logits
    fn decode(&mut self, embedding: &Self::Embedding, prompt: &DecoderPrompt)
        -> Result<Array2<f32>>;
}

/// Per-video state of a [`Sam2Tracker`] session
pub struct Sam2State<E> {
    frames: FrameSequence,
    video_size: (u32, u32),
    embeddings: HashMap<usize, E>,
    /// object -> frame -> accumulated clicks
    clicks: BTreeMap<ObjectId, BTreeMap<usize, Vec<([f32; 2], PointLabel)>>>,
    /// low-resolution logits decoded from clicks, keyed by (object, frame)
    conditioned: BTreeMap<(ObjectId, usize), Array2<f32>>,
}

impl<E> Sam2State<E> {
    fn embedding<M>(&mut self, model: &mut M, frame_index: usize) -> Result<&E>
    where
        M: MaskModel<Embedding = E>,
    {
        if !self.embeddings.contains_key(&frame_index) {
            let frame = self.frames.open(frame_index)?;
            let embedding = model.encode(&frame)?;
            self.embeddings.insert(frame_index, embedding);
        }

        self.embeddings
            .get(&frame_index)
            .context("frame embedding missing after encoding")
    }
}

/// Click-prompted video tracking on top of a [`MaskModel`]
///
/// Tracking reuses the previous frame's low-resolution logits as the mask
/// prompt for the next frame, so no memory-attention graph is needed.
pub struct Sam2Tracker<M> {
    model: M,
    preprocessor: Preprocessor,
}

impl<M: MaskModel> Sam2Tracker<M> {
    pub fn new(model: M) -> Self {
        let preprocessor = Preprocessor::new(model.input_size());
        Self {
            model,
            preprocessor,
        }
    }

    /// Upsample and stack low-resolution logits in object order
    fn frame_masks(
        frame_index: usize,
        video_size: (u32, u32),
        low_res: Vec<(ObjectId, Array2<f32>)>,
    ) -> Result<FrameMasks> {
        let (width, height) = video_size;
        let mut object_ids = Vec::with_capacity(low_res.len());
        let mut mask_logits = Array3::<f32>::zeros((low_res.len(), height as usize, width as usize));

        for (slot, (object_id, logits)) in low_res.into_iter().enumerate() {
            let full = Preprocessor::postprocess_logits(logits.view(), width, height)?;
            mask_logits.index_axis_mut(Axis(0), slot).assign(&full);
            object_ids.push(object_id);
        }

        Ok(FrameMasks {
            frame_index,
            object_ids,
            mask_logits,
        })
    }
}

impl<M: MaskModel> VideoPredictor for Sam2Tracker<M> {
    type State = Sam2State<M::Embedding>;

    fn init_state(&mut self, frames: &FrameSequence) -> Result<Self::State> {
        if frames.is_empty() {
            bail!("no frames found in {}", frames.directory().display());
        }

        let video_size = frames.open(0)?.dimensions();
        tracing::info!(
            "Initialized inference state: {} frames at {}x{}",
            frames.len(),
            video_size.0,
            video_size.1
        );

        Ok(Sam2State {
            frames: frames.clone(),
            video_size,
            embeddings: HashMap::new(),
            clicks: BTreeMap::new(),
            conditioned: BTreeMap::new(),
        })
    }

    fn add_new_points(
        &mut self,
        state: &mut Self::State,
        frame_index: usize,
        object_id: ObjectId,
        points: &[[f32; 2]],
        labels: &[PointLabel],
    ) -> Result<FrameMasks> {
        let clicks = state
            .clicks
            .entry(object_id)
            .or_default()
            .entry(frame_index)
            .or_default();
        clicks.extend(points.iter().copied().zip(labels.iter().copied()));
        let clicks = clicks.clone();

        let prompt = DecoderPrompt::new(
            &self.preprocessor,
            state.video_size,
            &clicks,
            state.conditioned.get(&(object_id, frame_index)),
        );
        let embedding = state.embedding(&mut self.model, frame_index)?;
        let logits = self.model.decode(embedding, &prompt)?;
        state.conditioned.insert((object_id, frame_index), logits);

        let low_res = state
            .conditioned
            .iter()
            .filter(|((_, frame), _)| *frame == frame_index)
            .map(|((object, _), logits)| (*object, logits.clone()))
            .collect();

        Self::frame_masks(frame_index, state.video_size, low_res)
    }

    fn propagate_in_video<'a>(&'a mut self, state: &'a mut Self::State) -> Result<Propagation<'a>> {
        let start = state
            .conditioned
            .keys()
            .map(|(_, frame)| *frame)
            .min()
            .context("no points provided; add points before propagating")?;
        let objects: Vec<ObjectId> = state.clicks.keys().copied().collect();

        tracing::info!(
            "Propagating {} object(s) from frame {} to {}",
            objects.len(),
            start,
            state.frames.len() - 1
        );

        Ok(Box::new(Sam2Propagation {
            model: &mut self.model,
            preprocessor: &self.preprocessor,
            state,
            objects,
            next_frame: start,
            previous: HashMap::new(),
        }))
    }
}

/// Forward pass over the frames, one decoder call per object and frame
struct Sam2Propagation<'a, M: MaskModel> {
    model: &'a mut M,
    preprocessor: &'a Preprocessor,
    state: &'a mut Sam2State<M::Embedding>,
    objects: Vec<ObjectId>,
    next_frame: usize,
    previous: HashMap<ObjectId, Array2<f32>>,
}

impl<M: MaskModel> Sam2Propagation<'_, M> {
    fn step(&mut self, frame_index: usize) -> Result<FrameMasks> {
        let _span = tracing::debug_span!("propagate", frame_index).entered();

        let video_size = self.state.video_size;
        let mut low_res = Vec::with_capacity(self.objects.len());

        for &object_id in &self.objects {
            let logits = if let Some(conditioned) =
                self.state.conditioned.get(&(object_id, frame_index))
            {
                conditioned.clone()
            } else if let Some(previous) = self.previous.get(&object_id) {
                let prompt = DecoderPrompt::new(self.preprocessor, video_size, &[], Some(previous));
                let embedding = self.state.embedding(&mut *self.model, frame_index)?;
                self.model.decode(embedding, &prompt)?
            } else {
                low_res.push((
                    object_id,
                    Array2::from_elem((LOW_RES_SIZE, LOW_RES_SIZE), NO_OBJECT_LOGIT),
                ));
                continue;
            };

            self.previous.insert(object_id, logits.clone());
            low_res.push((object_id, logits));
        }

        Sam2Tracker::<M>::frame_masks(frame_index, video_size, low_res)
    }
}

impl<M: MaskModel> Iterator for Sam2Propagation<'_, M> {
    type Item = Result<FrameMasks>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_frame >= self.state.frames.len() {
            return None;
        }

        let frame_index = self.next_frame;
        self.next_frame += 1;

        let result = self.step(frame_index);
        if result.is_err() {
            self.next_frame = self.state.frames.len();
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::FrameLoader;
    use image::Rgb;
    use tempfile::TempDir;

    const WIDTH: u32 = 8;
    const HEIGHT: u32 = 4;

    /// Returns `calls` as a constant logit plane and records every prompt
    #[derive(Default)]
    struct CountingModel {
        encodes: usize,
        prompts: Vec<DecoderPrompt>,
        fail_on_call: Option<usize>,
    }

    impl MaskModel for CountingModel {
        type Embedding = ();

        fn input_size(&self) -> u32 {
            16
        }

        fn encode(&mut self, _frame: &RgbImage) -> Result<()> {
            self.encodes += 1;
            Ok(())
        }

        fn decode(&mut self, _embedding: &(), prompt: &DecoderPrompt) -> Result<Array2<f32>> {
            self.prompts.push(prompt.clone());
            let call = self.prompts.len();
            if self.fail_on_call == Some(call) {
                bail!("decoder failed on call {}", call);
            }
            Ok(Array2::from_elem((4, 4), call as f32))
        }
    }

    fn frames(count: usize) -> (TempDir, FrameSequence) {
        let dir = tempfile::tempdir().unwrap();
        for index in 0..count {
            RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([90, 90, 90]))
                .save(dir.path().join(format!("{}.jpg", index)))
                .unwrap();
        }
        let frames = FrameLoader::new(dir.path()).load().unwrap();
        (dir, frames)
    }

    fn plane(masks: &FrameMasks, object_id: ObjectId) -> ndarray::ArrayView2<'_, f32> {
        let slot = masks
            .object_ids
            .iter()
            .position(|id| *id == object_id)
            .unwrap();
        masks.mask_logits.index_axis(Axis(0), slot)
    }

    fn all_close(masks: &FrameMasks, object_id: ObjectId, value: f32) -> bool {
        plane(masks, object_id)
            .iter()
            .all(|logit| (logit - value).abs() < 1e-3)
    }

    fn logits_empty(masks: &FrameMasks, object_id: ObjectId) -> bool {
        plane(masks, object_id).iter().all(|logit| *logit <= 0.0)
    }

    #[test]
    fn first_click_sends_padding_point_and_no_mask() {
        let (_dir, sequence) = frames(2);
        let mut tracker = Sam2Tracker::new(CountingModel::default());
        let mut state = tracker.init_state(&sequence).unwrap();

        let masks = tracker
            .add_new_points(&mut state, 0, 1, &[[4.0, 3.0]], &[PointLabel::Positive])
            .unwrap();

        assert_eq!(masks.frame_index, 0);
        assert_eq!(masks.object_ids, vec![1]);
        assert_eq!(masks.mask_logits.dim(), (1, HEIGHT as usize, WIDTH as usize));

        let prompt = &tracker.model.prompts[0];
        assert_eq!(prompt.point_coords, vec![8.0, 12.0, 0.0, 0.0]);
        assert_eq!(prompt.point_labels, vec![1.0, -1.0]);
        assert_eq!(prompt.has_mask_input, 0.0);
        assert_eq!(prompt.mask_input.len(), LOW_RES_SIZE * LOW_RES_SIZE);
        assert!(prompt.mask_input.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn repeated_clicks_merge_and_refine_previous_mask() {
        let (_dir, sequence) = frames(2);
        let mut tracker = Sam2Tracker::new(CountingModel::default());
        let mut state = tracker.init_state(&sequence).unwrap();

        tracker
            .add_new_points(&mut state, 1, 7, &[[1.0, 1.0]], &[PointLabel::Positive])
            .unwrap();
        let masks = tracker
            .add_new_points(&mut state, 1, 7, &[[2.0, 2.0]], &[PointLabel::Negative])
            .unwrap();

        let second = &tracker.model.prompts[1];
        assert_eq!(second.num_points(), 3);
        assert_eq!(second.point_labels, vec![1.0, 0.0, -1.0]);
        assert_eq!(second.has_mask_input, 1.0);
        assert_eq!(second.mask_input, vec![1.0; 16]);

        // one frame, encoded once
        assert_eq!(tracker.model.encodes, 1);
        assert!(all_close(&masks, 7, 2.0));
    }

    #[test]
    fn clicked_frame_returns_every_object_prompted_there() {
        let (_dir, sequence) = frames(1);
        let mut tracker = Sam2Tracker::new(CountingModel::default());
        let mut state = tracker.init_state(&sequence).unwrap();

        tracker
            .add_new_points(&mut state, 0, 2, &[[1.0, 1.0]], &[PointLabel::Positive])
            .unwrap();
        let masks = tracker
            .add_new_points(&mut state, 0, 1, &[[5.0, 5.0]], &[PointLabel::Positive])
            .unwrap();

        assert_eq!(masks.object_ids, vec![1, 2]);
        assert!(all_close(&masks, 1, 2.0));
        assert!(all_close(&masks, 2, 1.0));
    }

    #[test]
    fn propagation_schedules_objects_by_first_click() {
        let (_dir, sequence) = frames(5);
        let mut tracker = Sam2Tracker::new(CountingModel::default());
        let mut state = tracker.init_state(&sequence).unwrap();

        // decoder calls 1 and 2
        tracker
            .add_new_points(&mut state, 1, 1, &[[1.0, 1.0]], &[PointLabel::Positive])
            .unwrap();
        tracker
            .add_new_points(&mut state, 3, 2, &[[6.0, 3.0]], &[PointLabel::Positive])
            .unwrap();

        let steps: Vec<FrameMasks> = tracker
            .propagate_in_video(&mut state)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        let indices: Vec<usize> = steps.iter().map(|s| s.frame_index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
        assert!(steps.iter().all(|s| s.object_ids == vec![1, 2]));

        // object 2 has no clicks yet on frames 1 and 2
        assert!(all_close(&steps[0], 2, NO_OBJECT_LOGIT));
        assert!(all_close(&steps[1], 2, NO_OBJECT_LOGIT));
        assert!(logits_empty(&steps[1], 2));

        // object 1: stored seed on frame 1, then tracked (call 3 on frame 2, call 4 on frame 3)
        assert!(all_close(&steps[0], 1, 1.0));
        assert!(all_close(&steps[1], 1, 3.0));
        assert!(all_close(&steps[2], 1, 4.0));

        // frame 3 returns object 2's stored logits rather than a new decode
        assert!(all_close(&steps[2], 2, 2.0));

        // frame 4 tracks both, prompting with the previous frame's logits
        let prompts = &tracker.model.prompts;
        assert_eq!(prompts.len(), 6);
        for prompt in &prompts[2..] {
            assert_eq!(prompt.point_labels, vec![-1.0]);
            assert_eq!(prompt.has_mask_input, 1.0);
        }
        assert_eq!(prompts[4].mask_input, vec![4.0; 16]);
        assert_eq!(prompts[5].mask_input, vec![2.0; 16]);
    }

    #[test]
    fn propagation_stops_after_first_error() {
        let (_dir, sequence) = frames(4);
        let model = CountingModel {
            fail_on_call: Some(3),
            ..CountingModel::default()
        };
        let mut tracker = Sam2Tracker::new(model);
        let mut state = tracker.init_state(&sequence).unwrap();
        tracker
            .add_new_points(&mut state, 0, 1, &[[1.0, 1.0]], &[PointLabel::Positive])
            .unwrap();

        let mut propagation = tracker.propagate_in_video(&mut state).unwrap();
        assert_eq!(propagation.next().unwrap().unwrap().frame_index, 0);
        assert_eq!(propagation.next().unwrap().unwrap().frame_index, 1);
        assert!(propagation.next().unwrap().is_err());
        assert!(propagation.next().is_none());
    }

    #[test]
    fn propagation_requires_clicks() {
        let (_dir, sequence) = frames(2);
        let mut tracker = Sam2Tracker::new(CountingModel::default());
        let mut state = tracker.init_state(&sequence).unwrap();

        assert!(tracker.propagate_in_video(&mut state).is_err());
    }
}
