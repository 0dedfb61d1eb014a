use super::preprocess::Preprocessor;
use super::tracker::{DecoderPrompt, MaskModel, LOW_RES_SIZE};
use crate::device::Device;
use anyhow::{bail, Context, Result};
use image::RgbImage;
use ndarray::Array2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionOutputs};
use ort::value::Tensor;
use std::path::Path;

/// Side of the square image the encoder consumes
const INPUT_SIZE: u32 = 1024;

const ENCODER_INPUT: &str = "image";
const IMAGE_EMBED: &str = "image_embed";
const HIGH_RES_FEATS_0: &str = "high_res_feats_0";
const HIGH_RES_FEATS_1: &str = "high_res_feats_1";
const DECODER_MASKS: &str = "masks";
const DECODER_IOU: &str = "iou_predictions";

/// Flat copy of one encoder output, fed back into the decoder
#[derive(Clone)]
struct FeatureMap {
    shape: Vec<i64>,
    data: Vec<f32>,
}

impl FeatureMap {
    fn extract(outputs: &SessionOutputs, name: &str) -> Result<Self> {
        let value = outputs
            .get(name)
            .with_context(|| format!("encoder produced no {:?} output", name))?;
        let (shape, data) = value.try_extract_tensor::<f32>()?;

        Ok(Self {
            shape: shape.to_vec(),
            data: data.to_vec(),
        })
    }

    fn tensor(&self) -> Result<Tensor<f32>> {
        Ok(Tensor::from_array((self.shape.clone(), self.data.clone()))?)
    }
}

/// Encoder features of one frame
pub struct ImageEmbedding {
    image_embed: FeatureMap,
    high_res_0: FeatureMap,
    high_res_1: FeatureMap,
}

/// SAM2 image encoder and mask decoder exported to ONNX
pub struct Sam2Onnx {
    encoder: Session,
    decoder: Session,
    preprocessor: Preprocessor,
}

impl Sam2Onnx {
    /// Load the encoder and decoder graphs onto `device`
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        encoder_path: P,
        decoder_path: Q,
        device: Device,
    ) -> Result<Self> {
        let encoder = Self::load_session(encoder_path.as_ref(), device)?;
        let decoder = Self::load_session(decoder_path.as_ref(), device)?;

        Ok(Self {
            encoder,
            decoder,
            preprocessor: Preprocessor::new(INPUT_SIZE),
        })
    }

    fn load_session(path: &Path, device: Device) -> Result<Session> {
        tracing::info!("Loading SAM2 graph from {}", path.display());

        let session = Session::builder()?
            .with_execution_providers([device.execution_provider()])?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        Ok(session)
    }
}

impl MaskModel for Sam2Onnx {
    type Embedding = ImageEmbedding;

    fn input_size(&self) -> u32 {
        self.preprocessor.input_size()
    }

    fn encode(&mut self, frame: &RgbImage) -> Result<ImageEmbedding> {
        let _span = tracing::debug_span!("sam2_encode").entered();

        let size = self.preprocessor.input_size() as usize;
        let input = self.preprocessor.preprocess(frame);
        let input = Tensor::from_array(([1usize, 3, size, size], input.into_raw_vec()))?;

        let outputs = self
            .encoder
            .run(ort::inputs![ENCODER_INPUT => input])
            .context("Failed to run image encoder")?;

        Ok(ImageEmbedding {
            image_embed: FeatureMap::extract(&outputs, IMAGE_EMBED)?,
            high_res_0: FeatureMap::extract(&outputs, HIGH_RES_FEATS_0)?,
            high_res_1: FeatureMap::extract(&outputs, HIGH_RES_FEATS_1)?,
        })
    }

    /// Run the mask decoder and return the low-resolution logits of the best mask
    fn decode(&mut self, embedding: &ImageEmbedding, prompt: &DecoderPrompt) -> Result<Array2<f32>> {
        let num_points = prompt.num_points();
        let _span = tracing::debug_span!("sam2_decode", num_points).entered();

        let outputs = self
            .decoder
            .run(ort::inputs![
                IMAGE_EMBED => embedding.image_embed.tensor()?,
                HIGH_RES_FEATS_0 => embedding.high_res_0.tensor()?,
                HIGH_RES_FEATS_1 => embedding.high_res_1.tensor()?,
                "point_coords" => Tensor::from_array(([1usize, num_points, 2], prompt.point_coords.clone()))?,
                "point_labels" => Tensor::from_array(([1usize, num_points], prompt.point_labels.clone()))?,
                "mask_input" => Tensor::from_array(([1usize, 1, LOW_RES_SIZE, LOW_RES_SIZE], prompt.mask_input.clone()))?,
                "has_mask_input" => Tensor::from_array(([1usize], vec![prompt.has_mask_input]))?
            ])
            .context("Failed to run mask decoder")?;

        let (mask_shape, masks) = outputs
            .get(DECODER_MASKS)
            .context("decoder produced no masks output")?
            .try_extract_tensor::<f32>()?;
        let (_, scores) = outputs
            .get(DECODER_IOU)
            .context("decoder produced no iou_predictions output")?
            .try_extract_tensor::<f32>()?;

        // masks: [1, M, H, W], iou_predictions: [1, M]
        if mask_shape.len() != 4 {
            bail!("unexpected decoder mask shape {:?}", mask_shape.to_vec());
        }
        let height = mask_shape[2] as usize;
        let width = mask_shape[3] as usize;

        let best = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(index, _)| index)
            .unwrap_or(0);

        let plane = height * width;
        let slice = masks
            .get(best * plane..(best + 1) * plane)
            .context("decoder mask output shorter than its shape")?;

        Ok(Array2::from_shape_vec((height, width), slice.to_vec())?)
    }
}
