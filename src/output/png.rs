use super::Surface;
use crate::render::Figure;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Writes each shown figure as a numbered PNG file
pub struct PngDirectory {
    directory: PathBuf,
    written: usize,
}

impl PngDirectory {
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory)
            .with_context(|| format!("Failed to create output directory {}", directory.display()))?;

        tracing::info!("Writing figures to {}", directory.display());

        Ok(Self {
            directory,
            written: 0,
        })
    }

    fn file_name(&self, title: &str) -> String {
        let slug: String = title
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{:04}_{}.png", self.written, slug)
    }
}

impl Surface for PngDirectory {
    fn show(&mut self, figure: &Figure) -> Result<()> {
        let path = self.directory.join(self.file_name(figure.title()));

        figure
            .render()
            .save(&path)
            .with_context(|| format!("Failed to write figure to {}", path.display()))?;

        tracing::debug!("Wrote {}", path.display());
        self.written += 1;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn writes_numbered_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut surface = PngDirectory::new(dir.path().join("figures")).unwrap();
        let figure = Figure::new("Frame 3", &RgbImage::new(8, 8));

        surface.show(&figure).unwrap();
        surface.show(&figure).unwrap();

        let first = dir.path().join("figures/0000_frame_3.png");
        assert!(first.exists());
        assert!(dir.path().join("figures/0001_frame_3.png").exists());
        assert_eq!(image::open(first).unwrap().width(), 8);
    }
}
