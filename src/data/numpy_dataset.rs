/// NumPy dataset loader for pre-processed segmentation arrays (.npy format)
use ndarray::{Array3, Array4, Axis};
use ndarray_npy::ReadNpyExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::{InMemoryDataset, Sample, SegmentationDataset};

/// Metadata from dataset.json
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatasetMetadata {
    #[serde(default)]
    pub num_classes: usize,
    #[serde(default)]
    pub num_examples: usize,
    #[serde(default)]
    pub description: String,
}

/// Dataset loaded from `images.npy` [N, C, H, W] (f32) and
/// `masks.npy` [N, H, W] (int64 or uint8)
pub struct NumpyDataset {
    inner: InMemoryDataset,
    metadata: Option<DatasetMetadata>,
}

impl NumpyDataset {
    /// Load from directory containing .npy files and an optional dataset.json
    pub fn from_directory<P: AsRef<Path>>(path: P, num_classes: usize) -> crate::Result<Self> {
        let dir = path.as_ref();

        log::info!("Loading NumPy dataset from: {:?}", dir);

        let metadata_path = dir.join("dataset.json");
        let metadata: Option<DatasetMetadata> = if metadata_path.exists() {
            let reader = BufReader::new(File::open(&metadata_path)?);
            Some(serde_json::from_reader(reader)?)
        } else {
            log::warn!("dataset.json not found, continuing without metadata");
            None
        };

        if let Some(meta) = &metadata {
            if meta.num_classes != 0 && meta.num_classes != num_classes {
                log::warn!(
                    "dataset.json declares {} classes, model is configured for {}",
                    meta.num_classes,
                    num_classes
                );
            }
        }

        let images_path = dir.join("images.npy");
        let images = <Array4<f32> as ReadNpyExt>::read_npy(File::open(&images_path)?)
            .map_err(|e| crate::FloodNetError::Data(format!(
                "Failed to read images.npy: {}", e
            )))?;

        log::info!("Loaded images: shape {:?}", images.shape());

        let masks = read_masks(&dir.join("masks.npy"))?;

        log::info!("Loaded masks: shape {:?}", masks.shape());

        let (n, channels, height, width) = images.dim();
        if masks.dim() != (n, height, width) {
            return Err(crate::FloodNetError::Data(format!(
                "Shape mismatch: images {:?} vs masks {:?}",
                images.shape(),
                masks.shape()
            )));
        }

        let mut samples = Vec::with_capacity(n);
        for (i, (image, mask)) in images
            .axis_iter(Axis(0))
            .zip(masks.axis_iter(Axis(0)))
            .enumerate()
        {
            let mut labels = Vec::with_capacity(height * width);
            for &value in mask.iter() {
                if value < 0 {
                    return Err(crate::FloodNetError::Data(format!(
                        "sample {} has negative class ID {}",
                        i, value
                    )));
                }
                labels.push(value as u32);
            }
            samples.push(Sample::new(image.iter().copied().collect(), labels));
        }

        let inner = InMemoryDataset::new(samples, channels, height, width, num_classes)?;

        log::info!(
            "Dataset loaded: {} examples, {}x{}, {} channels",
            n,
            height,
            width,
            channels
        );

        Ok(Self { inner, metadata })
    }

    /// Get metadata
    pub fn metadata(&self) -> Option<&DatasetMetadata> {
        self.metadata.as_ref()
    }

    /// Unwrap into the in-memory samples
    pub fn into_inner(self) -> InMemoryDataset {
        self.inner
    }
}

impl SegmentationDataset for NumpyDataset {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn image_size(&self) -> (usize, usize) {
        self.inner.image_size()
    }

    fn channels(&self) -> usize {
        self.inner.channels()
    }

    fn get(&self, idx: usize) -> crate::Result<Sample> {
        self.inner.get(idx)
    }
}

/// Masks are stored either as int64 or, when taken straight from label PNGs, as uint8
fn read_masks(path: &Path) -> crate::Result<Array3<i64>> {
    match <Array3<i64> as ReadNpyExt>::read_npy(File::open(path)?) {
        Ok(masks) => Ok(masks),
        Err(wide_err) => {
            let narrow = <Array3<u8> as ReadNpyExt>::read_npy(File::open(path)?).map_err(|_| {
                crate::FloodNetError::Data(format!("Failed to read masks.npy: {}", wide_err))
            })?;
            Ok(narrow.mapv(i64::from))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    #[test]
    fn test_metadata_deserialization() {
        let json = r#"{
            "num_classes": 10,
            "num_examples": 1445,
            "description": "FloodNet train 256x256"
        }"#;

        let metadata: DatasetMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.num_classes, 10);
        assert_eq!(metadata.num_examples, 1445);
    }

    #[test]
    fn test_load_from_directory() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let images = Array::from_shape_fn((3, 3, 2, 2), |(n, c, h, w)| {
            (n + c + h + w) as f32 / 10.0
        });
        let masks = Array::from_shape_fn((3, 2, 2), |(n, h, w)| ((n + h + w) % 2) as i64);

        ndarray_npy::write_npy(dir.path().join("images.npy"), &images)
            .map_err(|e| crate::FloodNetError::Data(e.to_string()))?;
        ndarray_npy::write_npy(dir.path().join("masks.npy"), &masks)
            .map_err(|e| crate::FloodNetError::Data(e.to_string()))?;

        let dataset = NumpyDataset::from_directory(dir.path(), 2)?;

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.image_size(), (2, 2));
        assert!(dataset.metadata().is_none());

        let sample = dataset.get(1)?;
        assert_eq!(sample.mask, vec![1, 0, 0, 1]);
        assert_eq!(sample.image.len(), 12);
        assert!((sample.image[0] - 0.1).abs() < 1e-6);

        Ok(())
    }

    #[test]
    fn test_uint8_masks() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let images = Array4::<f32>::zeros((1, 3, 2, 2));
        let masks = Array3::<u8>::from_elem((1, 2, 2), 4);

        ndarray_npy::write_npy(dir.path().join("images.npy"), &images)
            .map_err(|e| crate::FloodNetError::Data(e.to_string()))?;
        ndarray_npy::write_npy(dir.path().join("masks.npy"), &masks)
            .map_err(|e| crate::FloodNetError::Data(e.to_string()))?;

        let dataset = NumpyDataset::from_directory(dir.path(), 10)?;
        assert_eq!(dataset.get(0)?.mask, vec![4; 4]);

        // Same masks, too few classes configured
        assert!(NumpyDataset::from_directory(dir.path(), 3).is_err());

        Ok(())
    }
}
