/// Segmentation samples held in memory
use super::{Sample, SegmentationDataset};

/// Dataset backed by a vector of samples
///
/// Used for synthetic data and as the storage behind [`super::NumpyDataset`].
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    samples: Vec<Sample>,
    channels: usize,
    height: usize,
    width: usize,
}

impl InMemoryDataset {
    /// Create dataset, validating every sample against the layout
    pub fn new(
        samples: Vec<Sample>,
        channels: usize,
        height: usize,
        width: usize,
        num_classes: usize,
    ) -> crate::Result<Self> {
        for (i, sample) in samples.iter().enumerate() {
            sample
                .validate(channels, height, width, num_classes)
                .map_err(|e| crate::FloodNetError::Data(format!("sample {}: {}", i, e)))?;
        }

        Ok(Self {
            samples,
            channels,
            height,
            width,
        })
    }

    /// Borrow all samples
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

impl SegmentationDataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn image_size(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn get(&self, idx: usize) -> crate::Result<Sample> {
        self.samples.get(idx).cloned().ok_or_else(|| {
            crate::FloodNetError::Data(format!(
                "index {} out of range for {} samples",
                idx,
                self.samples.len()
            ))
        })
    }
}
