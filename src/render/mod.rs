mod figure;
mod font;

pub use figure::Figure;

use crate::segmentation::{Mask, ObjectId, PointLabel};
use anyhow::{bail, Result};
use image::Rgba;
use ndarray::Array3;

/// Alpha of every mask overlay
pub const MASK_ALPHA: f32 = 0.6;

/// Default star marker size (area, in points squared)
pub const DEFAULT_MARKER_SIZE: f32 = 200.0;

/// Categorical palette for object ids (tab10)
pub const PALETTE: [[u8; 3]; 10] = [
    [31, 119, 180],
    [255, 127, 14],
    [44, 160, 44],
    [214, 39, 40],
    [148, 103, 189],
    [140, 86, 75],
    [227, 119, 194],
    [127, 127, 127],
    [188, 189, 34],
    [23, 190, 207],
];

const POSITIVE_COLOR: Rgba<u8> = Rgba([0, 128, 0, 255]);
const NEGATIVE_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
const MARKER_EDGE_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const MARKER_EDGE_WIDTH: f32 = 1.25;
const BOX_COLOR: Rgba<u8> = Rgba([0, 128, 0, 255]);
const BOX_LINE_WIDTH: u32 = 2;

/// Stateless drawing helpers for masks, clicks and boxes
#[derive(Debug, Default, Clone, Copy)]
pub struct Visualizer;

impl Visualizer {
    pub fn new() -> Self {
        Self
    }

    /// Overlay `mask` on `figure` in the object's colour (or a random one)
    pub fn show_mask(
        &self,
        mask: &Mask,
        figure: &mut Figure,
        object_id: Option<ObjectId>,
        random_color: bool,
    ) -> Result<()> {
        let color = mask_color(object_id, random_color);
        figure.blend(&mask_overlay(mask, color))
    }

    /// Draw clicks as stars: green for positive, red for negative
    pub fn show_points(
        &self,
        points: &[[f32; 2]],
        labels: &[PointLabel],
        figure: &mut Figure,
        marker_size: f32,
    ) -> Result<()> {
        let (positive, negative) = partition_points(points, labels)?;
        let radius = marker_radius(marker_size);

        for point in positive {
            figure.star(point, radius, POSITIVE_COLOR, MARKER_EDGE_COLOR, MARKER_EDGE_WIDTH);
        }
        for point in negative {
            figure.star(point, radius, NEGATIVE_COLOR, MARKER_EDGE_COLOR, MARKER_EDGE_WIDTH);
        }

        Ok(())
    }

    /// Draw an unfilled box given as (x0, y0, x1, y1)
    pub fn show_box(&self, bbox: [f32; 4], figure: &mut Figure) {
        figure.rectangle(
            [bbox[0], bbox[1]],
            [bbox[2], bbox[3]],
            BOX_COLOR,
            BOX_LINE_WIDTH,
        );
    }
}

/// RGBA overlay colour with channels in [0, 1]
///
/// Ids past the end of the palette take its last colour.
pub fn mask_color(object_id: Option<ObjectId>, random_color: bool) -> [f32; 4] {
    if random_color {
        let [r, g, b]: [f32; 3] = rand::random();
        return [r, g, b, MASK_ALPHA];
    }

    let index = (object_id.unwrap_or(0) as usize).min(PALETTE.len() - 1);
    let [r, g, b] = PALETTE[index];
    [
        r as f32 / 255.0,
        g as f32 / 255.0,
        b as f32 / 255.0,
        MASK_ALPHA,
    ]
}

/// Broadcast mask x colour into an (H, W, 4) image
pub fn mask_overlay(mask: &Mask, color: [f32; 4]) -> Array3<f32> {
    let (height, width) = mask.dim();
    Array3::from_shape_fn((height, width, 4), |(y, x, channel)| {
        if mask[[y, x]] {
            color[channel]
        } else {
            0.0
        }
    })
}

/// Split clicks into (positive, negative), keeping their order
pub fn partition_points(
    points: &[[f32; 2]],
    labels: &[PointLabel],
) -> Result<(Vec<[f32; 2]>, Vec<[f32; 2]>)> {
    if points.len() != labels.len() {
        bail!(
            "{} points but {} labels",
            points.len(),
            labels.len()
        );
    }

    let (positive, negative): (Vec<_>, Vec<_>) = points
        .iter()
        .zip(labels)
        .partition(|(_, label)| **label == PointLabel::Positive);

    Ok((
        positive.into_iter().map(|(point, _)| *point).collect(),
        negative.into_iter().map(|(point, _)| *point).collect(),
    ))
}

/// Star radius in pixels for a marker area given in points squared
fn marker_radius(marker_size: f32) -> f32 {
    marker_size.max(0.0).sqrt() * 0.75
}
