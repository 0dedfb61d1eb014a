use super::types::Mask;
use anyhow::{bail, Result};
use image::{imageops, RgbImage};
use ndarray::{Array2, Array4, ArrayView2};

pub const IMAGE_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGE_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Preprocessor for converting frames to SAM2 encoder input and back
pub struct Preprocessor {
    input_size: u32,
}

impl Preprocessor {
    pub fn new(input_size: u32) -> Self {
        Self { input_size }
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Preprocess an RGB frame into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Bilinear resize to a square of `input_size`
    /// 2. Scale to [0, 1] and normalize with ImageNet mean/std
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, input_size, input_size]
    pub fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized = if image.dimensions() != (self.input_size, self.input_size) {
            imageops::resize(
                image,
                self.input_size,
                self.input_size,
                imageops::FilterType::Triangle,
            )
        } else {
            image.clone()
        };

        let size = self.input_size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                let value = pixel[channel] as f32 / 255.0;
                tensor[[0, channel, y as usize, x as usize]] =
                    (value - IMAGE_MEAN[channel]) / IMAGE_STD[channel];
            }
        }

        tensor
    }

    /// Map frame pixel coordinates onto the square model grid
    ///
    /// Returns the coordinates flattened as [x0, y0, x1, y1, ...].
    pub fn scale_points(&self, points: &[[f32; 2]], frame_size: (u32, u32)) -> Vec<f32> {
        let (width, height) = frame_size;
        let sx = self.input_size as f32 / width as f32;
        let sy = self.input_size as f32 / height as f32;

        points
            .iter()
            .flat_map(|[x, y]| [x * sx, y * sy])
            .collect()
    }

    /// Resize low-resolution mask logits to the frame size
    ///
    /// Bilinear with half-pixel centres (align_corners = false). Values are
    /// not clamped, so logits keep their sign and magnitude.
    pub fn postprocess_logits(
        logits: ArrayView2<f32>,
        target_width: u32,
        target_height: u32,
    ) -> Result<Array2<f32>> {
        let _span = tracing::debug_span!("postprocess").entered();

        let (in_h, in_w) = logits.dim();
        let (out_h, out_w) = (target_height as usize, target_width as usize);
        if in_h == 0 || in_w == 0 {
            bail!("cannot resize empty {}x{} logits", in_w, in_h);
        }
        if (in_h, in_w) == (out_h, out_w) {
            return Ok(logits.to_owned());
        }

        let scale_h = in_h as f32 / out_h as f32;
        let scale_w = in_w as f32 / out_w as f32;

        let output = Array2::from_shape_fn((out_h, out_w), |(y, x)| {
            let y_in = ((y as f32 + 0.5) * scale_h - 0.5).clamp(0.0, (in_h - 1) as f32);
            let x_in = ((x as f32 + 0.5) * scale_w - 0.5).clamp(0.0, (in_w - 1) as f32);

            let y0 = y_in.floor() as usize;
            let x0 = x_in.floor() as usize;
            let y1 = (y0 + 1).min(in_h - 1);
            let x1 = (x0 + 1).min(in_w - 1);
            let dy = y_in - y0 as f32;
            let dx = x_in - x0 as f32;

            (1.0 - dx) * (1.0 - dy) * logits[[y0, x0]]
                + dx * (1.0 - dy) * logits[[y0, x1]]
                + (1.0 - dx) * dy * logits[[y1, x0]]
                + dx * dy * logits[[y1, x1]]
        });

        Ok(output)
    }
}

/// Threshold mask logits: a pixel is in the mask iff its logit is > 0.0
pub fn logits_to_mask(logits: ArrayView2<f32>) -> Mask {
    logits.mapv(|logit| logit > 0.0)
}
