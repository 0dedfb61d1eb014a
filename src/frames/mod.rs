use anyhow::{Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

const FRAME_EXTENSIONS: [&str; 2] = ["jpg", "jpeg"];

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to list frame directory {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("frame file name {name:?} does not have a numeric stem")]
    NonNumericStem { name: String },
}

/// Lists the frames of a video directory in playback order
pub struct FrameLoader {
    directory: PathBuf,
}

impl FrameLoader {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    /// Read the directory and return its `.jpg`/`.jpeg` frames sorted by frame number
    pub fn load(&self) -> Result<FrameSequence, FrameError> {
        let entries = std::fs::read_dir(&self.directory).map_err(|source| FrameError::Io {
            path: self.directory.clone(),
            source,
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| FrameError::Io {
                path: self.directory.clone(),
                source,
            })?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }

        let files = sort_numerically(filter_frame_files(names))?;
        tracing::debug!(
            "Found {} frames in {}",
            files.len(),
            self.directory.display()
        );

        Ok(FrameSequence {
            directory: self.directory.clone(),
            files,
        })
    }
}

/// Keep only names with a (case-insensitive) `.jpg` or `.jpeg` extension
pub fn filter_frame_files(names: Vec<String>) -> Vec<String> {
    names
        .into_iter()
        .filter(|name| {
            Path::new(name)
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect()
}

/// Order frame names by the integer value of their stem
pub fn sort_numerically(names: Vec<String>) -> Result<Vec<String>, FrameError> {
    let mut keyed = names
        .into_iter()
        .map(|name| frame_number(&name).map(|number| (number, name)))
        .collect::<Result<Vec<_>, _>>()?;

    // Ties ("1.jpg" / "01.jpg") fall back to the name so directory order never leaks through
    keyed.sort();

    Ok(keyed.into_iter().map(|(_, name)| name).collect())
}

fn frame_number(name: &str) -> Result<u64, FrameError> {
    Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.parse::<u64>().ok())
        .ok_or_else(|| FrameError::NonNumericStem {
            name: name.to_string(),
        })
}

/// Ordered frame file names of one video directory
#[derive(Debug, Clone)]
pub struct FrameSequence {
    directory: PathBuf,
    files: Vec<String>,
}

impl FrameSequence {
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn names(&self) -> &[String] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn path(&self, index: usize) -> Option<PathBuf> {
        self.files.get(index).map(|name| self.directory.join(name))
    }

    /// Decode the frame at `index` as RGB
    pub fn open(&self, index: usize) -> Result<RgbImage> {
        let path = self.path(index).with_context(|| {
            format!("frame index {} out of range ({} frames)", index, self.len())
        })?;

        let image = image::open(&path)
            .with_context(|| format!("Failed to open frame {}", path.display()))?;

        Ok(image.to_rgb8())
    }
}
