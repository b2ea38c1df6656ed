/// FloodNet image/label directory dataset
use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};

use super::{Sample, SegmentationDataset};

/// Dataset partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub fn name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }

    /// Directory with RGB images, e.g. `train/train-org-img`
    fn image_dir(self, root: &Path) -> PathBuf {
        root.join(self.name()).join(format!("{}-org-img", self.name()))
    }

    /// Directory with label images, e.g. `train/train-label-img`
    fn label_dir(self, root: &Path) -> PathBuf {
        root.join(self.name()).join(format!("{}-label-img", self.name()))
    }
}

/// FloodNet split read lazily from disk
///
/// Each `<stem>.jpg` (or `.png`) under `<split>/<split>-org-img` is paired with
/// `<stem>_lab.png` under `<split>/<split>-label-img`. Images are resized
/// bilinearly, masks with nearest-neighbour so class IDs stay intact.
pub struct FloodNetDataset {
    pairs: Vec<(PathBuf, PathBuf)>,
    height: usize,
    width: usize,
    num_classes: usize,
}

impl FloodNetDataset {
    /// Index one split of a FloodNet checkout
    pub fn from_split<P: AsRef<Path>>(
        root: P,
        split: Split,
        height: usize,
        width: usize,
        num_classes: usize,
    ) -> crate::Result<Self> {
        let root = root.as_ref();
        let image_dir = split.image_dir(root);
        let label_dir = split.label_dir(root);

        log::info!("Indexing FloodNet {} split under {:?}", split.name(), root);

        let mut images: Vec<PathBuf> = fs::read_dir(&image_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image_file(path))
            .collect();
        images.sort();

        let mut pairs = Vec::with_capacity(images.len());
        for image in images {
            let Some(stem) = image.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let label = label_dir.join(format!("{}_lab.png", stem));
            if label.exists() {
                pairs.push((image, label));
            } else {
                log::warn!("No label for {:?}, skipping", image);
            }
        }

        if pairs.is_empty() {
            return Err(crate::FloodNetError::Data(format!(
                "no image/label pairs found in {:?}",
                image_dir
            )));
        }

        log::info!("Found {} {} pairs", pairs.len(), split.name());

        Ok(Self {
            pairs,
            height,
            width,
            num_classes,
        })
    }

    /// Paths of the image/label pair at index
    pub fn pair(&self, idx: usize) -> Option<&(PathBuf, PathBuf)> {
        self.pairs.get(idx)
    }

    fn load_image(&self, path: &Path) -> crate::Result<Vec<f32>> {
        let rgb = image::open(path)?.to_rgb8();
        let rgb = imageops::resize(&rgb, self.width as u32, self.height as u32, FilterType::Triangle);

        let plane = self.height * self.width;
        let mut chw = vec![0f32; 3 * plane];
        for (i, pixel) in rgb.pixels().enumerate() {
            for c in 0..3 {
                chw[c * plane + i] = pixel[c] as f32 / 255.0;
            }
        }
        Ok(chw)
    }

    fn load_mask(&self, path: &Path) -> crate::Result<Vec<u32>> {
        let luma = image::open(path)?.to_luma8();
        let luma = imageops::resize(&luma, self.width as u32, self.height as u32, FilterType::Nearest);
        Ok(luma.pixels().map(|p| p[0] as u32).collect())
    }
}

impl SegmentationDataset for FloodNetDataset {
    fn len(&self) -> usize {
        self.pairs.len()
    }

    fn image_size(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    fn get(&self, idx: usize) -> crate::Result<Sample> {
        let (image_path, label_path) = self.pairs.get(idx).ok_or_else(|| {
            crate::FloodNetError::Data(format!(
                "index {} out of range for {} pairs",
                idx,
                self.pairs.len()
            ))
        })?;

        let sample = Sample::new(self.load_image(image_path)?, self.load_mask(label_path)?);
        sample
            .validate(3, self.height, self.width, self.num_classes)
            .map_err(|e| crate::FloodNetError::Data(format!("{:?}: {}", label_path, e)))?;

        Ok(sample)
    }
}

fn is_image_file(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("jpg") | Some("jpeg") | Some("png")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn write_pair(root: &Path, split: Split, stem: &str, class: u8) -> crate::Result<()> {
        let image_dir = split.image_dir(root);
        let label_dir = split.label_dir(root);
        fs::create_dir_all(&image_dir)?;
        fs::create_dir_all(&label_dir)?;

        RgbImage::from_pixel(8, 8, Rgb([255, 0, 128])).save(image_dir.join(format!("{}.png", stem)))?;
        GrayImage::from_pixel(8, 8, Luma([class])).save(label_dir.join(format!("{}_lab.png", stem)))?;
        Ok(())
    }

    #[test]
    fn test_pairs_and_resizing() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        write_pair(dir.path(), Split::Train, "6336", 5)?;
        write_pair(dir.path(), Split::Train, "6337", 9)?;

        // Image without a label is skipped
        RgbImage::new(8, 8).save(Split::Train.image_dir(dir.path()).join("orphan.png"))?;

        let dataset = FloodNetDataset::from_split(dir.path(), Split::Train, 4, 4, 10)?;
        assert_eq!(dataset.len(), 2);

        let sample = dataset.get(1)?;
        assert_eq!(sample.mask, vec![9; 16]);
        assert_eq!(sample.image.len(), 3 * 16);
        assert!((sample.image[0] - 1.0).abs() < 1e-6);
        assert!(sample.image[16].abs() < 1e-6);

        Ok(())
    }

    #[test]
    fn test_label_out_of_range() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        write_pair(dir.path(), Split::Val, "1", 12)?;

        let dataset = FloodNetDataset::from_split(dir.path(), Split::Val, 4, 4, 10)?;
        assert!(dataset.get(0).is_err());

        Ok(())
    }

    #[test]
    fn test_missing_split_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FloodNetDataset::from_split(dir.path(), Split::Test, 4, 4, 10).is_err());
    }
}
