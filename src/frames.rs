use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use tiny_skia::Pixmap;

use crate::schema::{SequenceSettings, FRAME_NUMBER_WIDTH};

/// Load state of a single frame asset. Each asset transitions exactly once,
/// Pending -> Loaded or Pending -> Failed, and is never destroyed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Pending,
    Loaded,
    Failed,
}

#[derive(Debug)]
pub struct FrameAsset {
    pub index: usize,
    pub state: LoadState,
    image: Option<Pixmap>,
}

impl FrameAsset {
    pub fn image(&self) -> Option<&Pixmap> {
        self.image.as_ref()
    }
}

/// Builds the file name for a frame: 1-based number, zero-padded to three
/// digits, e.g. index 0 -> `frame-001.jpg`, index 119 -> `frame-120.jpg`.
pub fn frame_file_name(prefix: &str, extension: &str, index: usize) -> String {
    format!(
        "{prefix}{number:0width$}.{extension}",
        number = index + 1,
        width = FRAME_NUMBER_WIDTH
    )
}

/// Owns every frame asset for the lifetime of the experience.
#[derive(Debug)]
pub struct FrameStore {
    root: PathBuf,
    sequence: SequenceSettings,
    assets: Vec<FrameAsset>,
}

impl FrameStore {
    pub fn new(root: &Path, sequence: SequenceSettings) -> Result<Self> {
        sequence.validate()?;
        let assets = (0..sequence.frame_count)
            .map(|index| FrameAsset {
                index,
                state: LoadState::Pending,
                image: None,
            })
            .collect();
        Ok(Self {
            root: root.to_path_buf(),
            sequence,
            assets,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn frame_count(&self) -> usize {
        self.assets.len()
    }

    pub fn frame_path(&self, index: usize) -> Result<PathBuf> {
        if index >= self.frame_count() {
            bail!(
                "frame index {} out of range (sequence has {} frames)",
                index,
                self.frame_count()
            );
        }
        Ok(self.root.join(frame_file_name(
            &self.sequence.prefix,
            &self.sequence.extension,
            index,
        )))
    }

    pub fn get(&self, index: usize) -> Option<&FrameAsset> {
        self.assets.get(index)
    }

    /// A frame may only be drawn when it loaded AND decoded to non-zero
    /// dimensions. A resource that exists but carries no pixels is treated
    /// as broken, distinct from Failed.
    pub fn is_drawable(&self, index: usize) -> bool {
        self.drawable_image(index).is_some()
    }

    pub fn drawable_image(&self, index: usize) -> Option<&Pixmap> {
        let asset = self.assets.get(index)?;
        if asset.state != LoadState::Loaded {
            return None;
        }
        asset
            .image
            .as_ref()
            .filter(|image| image.width() > 0 && image.height() > 0)
    }

    /// Returns true when the transition was applied; a late duplicate report
    /// for an already-settled asset is ignored.
    pub fn mark_loaded(&mut self, index: usize, image: Pixmap) -> bool {
        match self.assets.get_mut(index) {
            Some(asset) if asset.state == LoadState::Pending => {
                asset.state = LoadState::Loaded;
                asset.image = Some(image);
                true
            }
            _ => false,
        }
    }

    pub fn mark_failed(&mut self, index: usize) -> bool {
        match self.assets.get_mut(index) {
            Some(asset) if asset.state == LoadState::Pending => {
                asset.state = LoadState::Failed;
                true
            }
            _ => false,
        }
    }

    pub fn pending_indices(&self) -> Vec<usize> {
        self.assets
            .iter()
            .filter(|asset| asset.state == LoadState::Pending)
            .map(|asset| asset.index)
            .collect()
    }

    pub fn counts(&self) -> StoreCounts {
        let mut counts = StoreCounts::default();
        for asset in &self.assets {
            match asset.state {
                LoadState::Pending => counts.pending += 1,
                LoadState::Loaded => counts.loaded += 1,
                LoadState::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub pending: usize,
    pub loaded: usize,
    pub failed: usize,
}
