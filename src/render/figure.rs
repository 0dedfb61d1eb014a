use super::font::{glyph_bits, GLYPH_ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH};
use anyhow::{bail, Result};
use image::{Rgba, RgbaImage, RgbImage};
use ndarray::{Array3, Axis};

/// Pixel scale of the title glyphs
const TITLE_SCALE: u32 = 2;
const TITLE_MARGIN: i32 = 4;

/// Inner/outer radius ratio of the star marker
const STAR_INNER_RATIO: f32 = 0.382;

/// A titled frame that overlays and markers are drawn onto
#[derive(Debug, Clone)]
pub struct Figure {
    title: String,
    canvas: RgbaImage,
}

impl Figure {
    /// Start a figure showing `frame`
    pub fn new(title: impl Into<String>, frame: &RgbImage) -> Self {
        let canvas = RgbaImage::from_fn(frame.width(), frame.height(), |x, y| {
            let [r, g, b] = frame.get_pixel(x, y).0;
            Rgba([r, g, b, 255])
        });

        Self {
            title: title.into(),
            canvas,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    /// Canvas with the title stamped into the top-left corner
    pub fn render(&self) -> RgbaImage {
        let mut image = self.canvas.clone();
        draw_text(
            &mut image,
            TITLE_MARGIN,
            TITLE_MARGIN,
            &self.title.to_uppercase(),
            Rgba([255, 255, 255, 255]),
        );
        image
    }

    /// Alpha-blend an (H, W, 4) RGBA overlay with channels in [0, 1]
    pub fn blend(&mut self, overlay: &Array3<f32>) -> Result<()> {
        let (height, width, channels) = overlay.dim();
        if channels != 4 || (width as u32, height as u32) != self.canvas.dimensions() {
            bail!(
                "overlay of shape ({}, {}, {}) does not fit a {}x{} figure",
                height,
                width,
                channels,
                self.canvas.width(),
                self.canvas.height()
            );
        }

        for (y, row) in overlay.axis_iter(Axis(0)).enumerate() {
            for (x, rgba) in row.axis_iter(Axis(0)).enumerate() {
                let alpha = rgba[3].clamp(0.0, 1.0);
                if alpha == 0.0 {
                    continue;
                }

                let pixel = self.canvas.get_pixel_mut(x as u32, y as u32);
                for channel in 0..3 {
                    let src = rgba[channel].clamp(0.0, 1.0) * 255.0;
                    let dst = pixel[channel] as f32;
                    pixel[channel] = (alpha * src + (1.0 - alpha) * dst).round() as u8;
                }
            }
        }

        Ok(())
    }

    /// Filled five-pointed star with an outline
    pub fn star(
        &mut self,
        center: [f32; 2],
        radius: f32,
        fill: Rgba<u8>,
        edge: Rgba<u8>,
        edge_width: f32,
    ) {
        let outline = star_polygon(center, radius + edge_width);
        let body = star_polygon(center, radius);
        self.fill_polygon(&outline, edge);
        self.fill_polygon(&body, fill);
    }

    /// Unfilled rectangle between two corners
    pub fn rectangle(&mut self, corner0: [f32; 2], corner1: [f32; 2], color: Rgba<u8>, line_width: u32) {
        let left = corner0[0].min(corner1[0]).round() as i32;
        let right = corner0[0].max(corner1[0]).round() as i32;
        let top = corner0[1].min(corner1[1]).round() as i32;
        let bottom = corner0[1].max(corner1[1]).round() as i32;

        for inset in 0..line_width as i32 {
            draw_rectangle(
                &mut self.canvas,
                left + inset,
                top + inset,
                right - inset,
                bottom - inset,
                color,
            );
        }
    }

    fn fill_polygon(&mut self, polygon: &[[f32; 2]], color: Rgba<u8>) {
        let (width, height) = self.canvas.dimensions();
        if width == 0 || height == 0 {
            return;
        }

        let min_x = polygon.iter().map(|p| p[0]).fold(f32::INFINITY, f32::min);
        let max_x = polygon.iter().map(|p| p[0]).fold(f32::NEG_INFINITY, f32::max);
        let min_y = polygon.iter().map(|p| p[1]).fold(f32::INFINITY, f32::min);
        let max_y = polygon.iter().map(|p| p[1]).fold(f32::NEG_INFINITY, f32::max);

        let x0 = min_x.floor().max(0.0) as u32;
        let y0 = min_y.floor().max(0.0) as u32;
        let x1 = (max_x.ceil().max(0.0) as u32).min(width - 1);
        let y1 = (max_y.ceil().max(0.0) as u32).min(height - 1);

        for y in y0..=y1 {
            for x in x0..=x1 {
                if contains(polygon, [x as f32 + 0.5, y as f32 + 0.5]) {
                    self.canvas.put_pixel(x, y, color);
                }
            }
        }
    }
}

fn star_polygon(center: [f32; 2], radius: f32) -> Vec<[f32; 2]> {
    (0..10)
        .map(|i| {
            let r = if i % 2 == 0 {
                radius
            } else {
                radius * STAR_INNER_RATIO
            };
            // First tip points straight up
            let angle = -std::f32::consts::FRAC_PI_2 + i as f32 * std::f32::consts::PI / 5.0;
            [center[0] + r * angle.cos(), center[1] + r * angle.sin()]
        })
        .collect()
}

/// Even-odd point-in-polygon test
fn contains(polygon: &[[f32; 2]], point: [f32; 2]) -> bool {
    let mut inside = false;
    let mut j = polygon.len() - 1;

    for i in 0..polygon.len() {
        let [xi, yi] = polygon[i];
        let [xj, yj] = polygon[j];
        if (yi > point[1]) != (yj > point[1])
            && point[0] < (xj - xi) * (point[1] - yi) / (yj - yi) + xi
        {
            inside = !inside;
        }
        j = i;
    }

    inside
}

fn draw_rectangle(image: &mut RgbaImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgba<u8>) {
    if left > right || top > bottom {
        return;
    }

    let width = image.width() as i32;
    let height = image.height() as i32;

    for x in left.max(0)..=right.min(width - 1) {
        if top >= 0 && top < height {
            image.put_pixel(x as u32, top as u32, color);
        }
        if bottom >= 0 && bottom < height {
            image.put_pixel(x as u32, bottom as u32, color);
        }
    }
    for y in top.max(0)..=bottom.min(height - 1) {
        if left >= 0 && left < width {
            image.put_pixel(left as u32, y as u32, color);
        }
        if right >= 0 && right < width {
            image.put_pixel(right as u32, y as u32, color);
        }
    }
}

fn draw_text(image: &mut RgbaImage, mut x: i32, y: i32, text: &str, color: Rgba<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let scale = TITLE_SCALE as i32;

    for ch in text.chars() {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate().take(GLYPH_HEIGHT as usize) {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    for dy in 0..scale {
                        for dx in 0..scale {
                            let px = x + col as i32 * scale + dx;
                            let py = y + row as i32 * scale + dy;
                            if px >= 0 && px < width && py >= 0 && py < height {
                                image.put_pixel(px as u32, py as u32, color);
                            }
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE as i32 * scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn black(width: u32, height: u32) -> Figure {
        Figure::new("Frame 0", &RgbImage::new(width, height))
    }

    #[test]
    fn blend_mixes_by_alpha() {
        let mut figure = black(2, 1);
        let mut overlay = Array3::<f32>::zeros((1, 2, 4));
        overlay[[0, 0, 0]] = 1.0;
        overlay[[0, 0, 3]] = 0.6;

        figure.blend(&overlay).unwrap();
        assert_eq!(figure.canvas().get_pixel(0, 0), &Rgba([153, 0, 0, 255]));
        assert_eq!(figure.canvas().get_pixel(1, 0), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn blend_rejects_wrong_size() {
        let mut figure = black(2, 2);
        assert!(figure.blend(&Array3::zeros((3, 2, 4))).is_err());
    }

    #[test]
    fn star_fills_center_and_leaves_corners() {
        let mut figure = black(40, 40);
        let fill = Rgba([0, 128, 0, 255]);
        figure.star([20.0, 20.0], 10.0, fill, Rgba([255, 255, 255, 255]), 1.25);

        assert_eq!(figure.canvas().get_pixel(20, 20), &fill);
        assert_eq!(figure.canvas().get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn star_near_edge_is_clipped() {
        let mut figure = black(10, 10);
        figure.star([0.0, 0.0], 8.0, Rgba([255, 0, 0, 255]), Rgba([255, 255, 255, 255]), 1.0);
        assert_eq!(figure.canvas().get_pixel(9, 9), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn rectangle_is_unfilled() {
        let mut figure = black(20, 20);
        let green = Rgba([0, 128, 0, 255]);
        figure.rectangle([2.0, 3.0], [15.0, 12.0], green, 2);

        assert_eq!(figure.canvas().get_pixel(2, 3), &green);
        assert_eq!(figure.canvas().get_pixel(3, 4), &green);
        assert_eq!(figure.canvas().get_pixel(15, 12), &green);
        assert_eq!(figure.canvas().get_pixel(8, 8), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn render_stamps_title_without_touching_canvas() {
        let figure = black(64, 32);
        let rendered = figure.render();

        assert!(rendered.pixels().any(|p| p == &Rgba([255, 255, 255, 255])));
        assert!(figure.canvas().pixels().all(|p| p == &Rgba([0, 0, 0, 255])));
    }
}
