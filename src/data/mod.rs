/// Data loading modules for segmentation training
pub mod classes;
pub mod floodnet;
pub mod loader;
pub mod memory;
pub mod numpy_dataset;

pub use classes::FloodNetClass;
pub use floodnet::{FloodNetDataset, Split};
pub use loader::SegmentationLoader;
pub use memory::InMemoryDataset;
pub use numpy_dataset::{DatasetMetadata, NumpyDataset};

use candle_core::{Device, Tensor};

/// One image/mask pair
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Pixel values in channel-major order [channels, H, W], scaled to [0, 1]
    pub image: Vec<f32>,
    /// Class ID per pixel [H, W]
    pub mask: Vec<u32>,
}

impl Sample {
    pub fn new(image: Vec<f32>, mask: Vec<u32>) -> Self {
        Self { image, mask }
    }

    /// Check buffer sizes and label range against the expected layout
    pub fn validate(
        &self,
        channels: usize,
        height: usize,
        width: usize,
        num_classes: usize,
    ) -> crate::Result<()> {
        if self.image.len() != channels * height * width {
            return Err(crate::FloodNetError::Data(format!(
                "image has {} values, expected {}x{}x{}",
                self.image.len(),
                channels,
                height,
                width
            )));
        }

        if self.mask.len() != height * width {
            return Err(crate::FloodNetError::Data(format!(
                "mask has {} values, expected {}x{}",
                self.mask.len(),
                height,
                width
            )));
        }

        if let Some(&bad) = self.mask.iter().find(|&&c| c as usize >= num_classes) {
            return Err(crate::FloodNetError::Data(format!(
                "mask contains class {} but only {} classes are configured",
                bad, num_classes
            )));
        }

        Ok(())
    }
}

/// Random-access collection of segmentation samples
pub trait SegmentationDataset {
    /// Number of samples
    fn len(&self) -> usize;

    /// Check if empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (height, width) shared by every sample
    fn image_size(&self) -> (usize, usize);

    /// Image channels
    fn channels(&self) -> usize {
        3
    }

    /// Load sample at index
    fn get(&self, idx: usize) -> crate::Result<Sample>;
}

/// Generic batch loader consumed by the trainer
pub trait BatchDataLoader {
    /// Next batch of (images [N, C, H, W] f32, masks [N, 1, H, W] u32)
    fn next_batch(&mut self, device: &Device) -> crate::Result<Option<(Tensor, Tensor)>>;

    /// Reset loader for new epoch
    fn reset(&mut self);

    /// Get total number of batches
    fn num_batches(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_validation() {
        let sample = Sample::new(vec![0.5; 3 * 2 * 2], vec![0, 1, 1, 0]);
        assert!(sample.validate(3, 2, 2, 2).is_ok());

        // Wrong image size
        assert!(sample.validate(3, 2, 3, 2).is_err());

        // Label out of range
        let sample = Sample::new(vec![0.5; 3 * 2 * 2], vec![0, 1, 2, 0]);
        assert!(sample.validate(3, 2, 2, 2).is_err());
    }
}
