use super::{ClickSession, PointerState};
use crate::output::to_framebuffer;
use anyhow::{Context, Result};
use image::DynamicImage;
use minifb::{KeyRepeat, MouseButton, MouseMode, Window, WindowOptions};
use std::path::Path;

const WINDOW_TITLE: &str = "Select Points";
const TARGET_FPS: usize = 60;

/// Interactive window that collects left-clicks on one image
pub struct SeedPicker {
    image: DynamicImage,
}

impl SeedPicker {
    pub fn open<P: AsRef<Path>>(image_path: P) -> Result<Self> {
        let path = image_path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("Failed to open image {}", path.display()))?;

        Ok(Self { image })
    }

    /// Show the image and block until a key is pressed or the window closes
    ///
    /// Returns the clicked points in image pixel coordinates.
    pub fn run(&self) -> Result<Vec<(u32, u32)>> {
        let rgba = self.image.to_rgba8();
        let (width, height) = (rgba.width() as usize, rgba.height() as usize);
        let buffer = to_framebuffer(&rgba);

        let mut session = ClickSession::new();
        {
            let mut window = Window::new(WINDOW_TITLE, width, height, WindowOptions::default())
                .context("Failed to open point selection window")?;
            window.set_target_fps(TARGET_FPS);

            tracing::info!("Click seed points, then press any key");

            while window.is_open() {
                window
                    .update_with_buffer(&buffer, width, height)
                    .context("Failed to draw image")?;

                let state = PointerState {
                    position: window.get_mouse_pos(MouseMode::Discard),
                    left_down: window.get_mouse_down(MouseButton::Left),
                };
                if let Some((x, y)) = session.observe(state) {
                    tracing::info!(
                        "Point selected: ({}, {}), {} so far",
                        x,
                        y,
                        session.points().len()
                    );
                }

                if !window.get_keys_pressed(KeyRepeat::No).is_empty() {
                    break;
                }
            }
        }

        Ok(session.into_points())
    }
}
