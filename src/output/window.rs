use super::{to_framebuffer, Surface};
use crate::render::Figure;
use anyhow::{Context, Result};
use minifb::{KeyRepeat, Window, WindowOptions};

const TARGET_FPS: usize = 30;

/// Shows figures in a window, blocking until a key press or close
///
/// The last window stays on screen until the next figure or `close_all`.
pub struct WindowSurface {
    window: Option<Window>,
}

impl WindowSurface {
    pub fn new() -> Self {
        Self { window: None }
    }
}

impl Default for WindowSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl Surface for WindowSurface {
    fn show(&mut self, figure: &Figure) -> Result<()> {
        self.window = None;

        let image = figure.render();
        let (width, height) = (image.width() as usize, image.height() as usize);
        let buffer = to_framebuffer(&image);

        let mut window = Window::new(figure.title(), width, height, WindowOptions::default())
            .with_context(|| format!("Failed to open window for {:?}", figure.title()))?;
        window.set_target_fps(TARGET_FPS);

        tracing::info!("Showing {:?}; press any key to continue", figure.title());

        while window.is_open() {
            window
                .update_with_buffer(&buffer, width, height)
                .context("Failed to draw figure")?;
            if !window.get_keys_pressed(KeyRepeat::No).is_empty() {
                break;
            }
        }

        if window.is_open() {
            self.window = Some(window);
        }

        Ok(())
    }

    fn close_all(&mut self) -> Result<()> {
        if self.window.take().is_some() {
            tracing::debug!("Closed figure window");
        }
        Ok(())
    }
}
