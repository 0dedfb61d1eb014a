mod png;
mod window;

pub use png::PngDirectory;
pub use window::WindowSurface;

use crate::render::Figure;
use anyhow::Result;

/// Trait for places a finished figure can be shown
pub trait Surface {
    /// Present one figure
    fn show(&mut self, figure: &Figure) -> Result<()>;

    /// Close every figure this surface still holds open
    fn close_all(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Pack an RGBA canvas into 0RGB words for a framebuffer window
pub(crate) fn to_framebuffer(image: &image::RgbaImage) -> Vec<u32> {
    image
        .pixels()
        .map(|p| ((p[0] as u32) << 16) | ((p[1] as u32) << 8) | p[2] as u32)
        .collect()
}
