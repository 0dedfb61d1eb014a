mod preprocess;
mod sam2;
mod tracker;
pub mod types;

pub use preprocess::logits_to_mask;
pub use sam2::Sam2Onnx;
pub use tracker::Sam2Tracker;
pub use types::{
    BoundingBox, ClickPoint, FrameMasks, Mask, ObjectId, PointLabel, Propagation, SegmentMap,
    VideoPredictor,
};

use crate::device::Device;
use anyhow::Result;

/// Create the default predictor (SAM2 exported to ONNX)
pub fn create_default_predictor(
    encoder_path: &str,
    decoder_path: &str,
    device: Device,
) -> Result<Sam2Tracker<Sam2Onnx>> {
    let model = Sam2Onnx::new(encoder_path, decoder_path, device)?;
    Ok(Sam2Tracker::new(model))
}
