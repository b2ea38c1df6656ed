/// Batching loader over any segmentation dataset
use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{BatchDataLoader, SegmentationDataset};

/// Data loader producing (images, masks) tensor batches
pub struct SegmentationLoader<D: SegmentationDataset> {
    dataset: D,
    batch_size: usize,
    current_idx: usize,
    indices: Vec<usize>,
    shuffle: bool,
    rng: StdRng,
}

impl<D: SegmentationDataset> SegmentationLoader<D> {
    /// Create new data loader
    ///
    /// # Arguments
    /// * `dataset` - Samples to batch
    /// * `batch_size` - Samples per batch; the last batch may be smaller
    /// * `shuffle` - Reshuffle sample order on every reset
    /// * `seed` - Fixed shuffle seed, or entropy when `None`
    pub fn new(dataset: D, batch_size: usize, shuffle: bool, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        if shuffle {
            indices.shuffle(&mut rng);
        }

        Self {
            dataset,
            batch_size: batch_size.max(1),
            current_idx: 0,
            indices,
            shuffle,
            rng,
        }
    }

    /// Get dataset reference
    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    /// Get batch size
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl<D: SegmentationDataset> BatchDataLoader for SegmentationLoader<D> {
    fn next_batch(&mut self, device: &Device) -> crate::Result<Option<(Tensor, Tensor)>> {
        if self.current_idx >= self.indices.len() {
            return Ok(None);
        }

        let end_idx = (self.current_idx + self.batch_size).min(self.indices.len());
        let batch_indices = &self.indices[self.current_idx..end_idx];
        let actual_batch_size = batch_indices.len();

        let (height, width) = self.dataset.image_size();
        let channels = self.dataset.channels();

        let mut image_data = Vec::with_capacity(actual_batch_size * channels * height * width);
        let mut mask_data = Vec::with_capacity(actual_batch_size * height * width);

        for &idx in batch_indices {
            let sample = self.dataset.get(idx)?;
            image_data.extend_from_slice(&sample.image);
            mask_data.extend_from_slice(&sample.mask);
        }

        self.current_idx = end_idx;

        let images = Tensor::from_vec(
            image_data,
            (actual_batch_size, channels, height, width),
            device,
        )?;

        let masks = Tensor::from_vec(
            mask_data,
            (actual_batch_size, 1, height, width),
            device,
        )?
        .to_dtype(DType::U32)?;

        Ok(Some((images, masks)))
    }

    fn reset(&mut self) {
        self.current_idx = 0;

        if self.shuffle {
            self.indices.shuffle(&mut self.rng);
        }
    }

    fn num_batches(&self) -> usize {
        (self.dataset.len() + self.batch_size - 1) / self.batch_size
    }
}
