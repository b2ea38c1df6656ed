/// Balanced per-class loss weights
///
/// `weight_c = total / (observed_classes * count_c)`, the same rule as
/// scikit-learn's `class_weight="balanced"`. Classes that never occur in the
/// training labels get a neutral weight of 1.0 so the vector always has one
/// entry per class.
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::data::BatchDataLoader;

/// Weight given to classes absent from the training labels
pub const UNSEEN_CLASS_WEIGHT: f32 = 1.0;

/// Label frequency counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassHistogram {
    counts: Vec<u64>,
}

impl ClassHistogram {
    pub fn new(num_classes: usize) -> Self {
        Self {
            counts: vec![0; num_classes],
        }
    }

    /// Count a slice of labels
    pub fn add_labels(&mut self, labels: &[u32]) -> crate::Result<()> {
        let num_classes = self.counts.len();
        for &label in labels {
            let slot = self.counts.get_mut(label as usize).ok_or_else(|| {
                crate::FloodNetError::Data(format!(
                    "label {} out of range for {} classes",
                    label, num_classes
                ))
            })?;
            *slot += 1;
        }
        Ok(())
    }

    /// Count every element of an integer mask tensor
    pub fn add_tensor(&mut self, masks: &Tensor) -> crate::Result<()> {
        let labels = masks
            .flatten_all()?
            .to_dtype(candle_core::DType::U32)?
            .to_vec1::<u32>()?;
        self.add_labels(&labels)
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// One loss weight per class, index-aligned with class IDs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    weights: Vec<f32>,
}

impl ClassWeights {
    /// Every class weighted 1.0
    pub fn uniform(num_classes: usize) -> Self {
        Self {
            weights: vec![1.0; num_classes],
        }
    }

    /// Use explicit weights
    pub fn from_vec(weights: Vec<f32>) -> Self {
        Self { weights }
    }

    /// Balanced weights from a label histogram
    pub fn balanced(histogram: &ClassHistogram) -> crate::Result<Self> {
        let total = histogram.total();
        if total == 0 {
            return Err(crate::FloodNetError::Data(
                "cannot compute class weights from an empty label set".to_string(),
            ));
        }

        let observed = histogram.counts().iter().filter(|&&c| c > 0).count() as f64;

        let weights = histogram
            .counts()
            .iter()
            .enumerate()
            .map(|(class, &count)| {
                if count == 0 {
                    log::warn!(
                        "Class {} never occurs in the training labels, using weight {}",
                        class,
                        UNSEEN_CLASS_WEIGHT
                    );
                    UNSEEN_CLASS_WEIGHT
                } else {
                    (total as f64 / (observed * count as f64)) as f32
                }
            })
            .collect();

        Ok(Self { weights })
    }

    /// Balanced weights from a flat label list
    pub fn from_labels(labels: &[u32], num_classes: usize) -> crate::Result<Self> {
        let mut histogram = ClassHistogram::new(num_classes);
        histogram.add_labels(labels)?;
        Self::balanced(&histogram)
    }

    /// Scan every mask a loader yields once, then rewind it
    pub fn from_loader(loader: &mut dyn BatchDataLoader, num_classes: usize) -> crate::Result<Self> {
        let mut histogram = ClassHistogram::new(num_classes);

        loader.reset();
        while let Some((_, masks)) = loader.next_batch(&Device::Cpu)? {
            histogram.add_tensor(&masks)?;
        }
        loader.reset();

        log::debug!("Label counts: {:?}", histogram.counts());

        Self::balanced(&histogram)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Weights as a [num_classes] f32 tensor
    pub fn to_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::from_slice(&self.weights, self.weights.len(), device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(counts: &[usize]) -> Vec<u32> {
        counts
            .iter()
            .enumerate()
            .flat_map(|(class, &n)| std::iter::repeat(class as u32).take(n))
            .collect()
    }

    #[test]
    fn test_equal_counts_give_equal_weights() {
        let weights = ClassWeights::from_labels(&labels(&[10, 10]), 2).unwrap();
        assert_eq!(weights.as_slice(), &[1.0, 1.0]);
    }

    #[test]
    fn test_minority_class_weighs_more() {
        let weights = ClassWeights::from_labels(&labels(&[90, 10]), 2).unwrap();
        let w = weights.as_slice();
        assert!(w[1] > w[0]);
        assert!((w[0] - 100.0 / 180.0).abs() < 1e-6);
        assert!((w[1] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_unseen_class_gets_default_weight() {
        let weights = ClassWeights::from_labels(&labels(&[30, 0, 10]), 3).unwrap();
        let w = weights.as_slice();
        assert_eq!(weights.len(), 3);
        assert_eq!(w[1], UNSEEN_CLASS_WEIGHT);
        // Two observed classes: 40 / (2 * 30) and 40 / (2 * 10)
        assert!((w[0] - 40.0 / 60.0).abs() < 1e-6);
        assert!((w[2] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_labels_is_error() {
        assert!(ClassWeights::from_labels(&[], 2).is_err());
    }

    #[test]
    fn test_out_of_range_label_is_error() {
        assert!(ClassWeights::from_labels(&[0, 1, 2], 2).is_err());
    }

    #[test]
    fn test_histogram_from_tensor() -> crate::Result<()> {
        let device = Device::Cpu;
        let masks = Tensor::new(&[[[0u32, 1], [1, 1]]], &device)?;

        let mut histogram = ClassHistogram::new(2);
        histogram.add_tensor(&masks)?;

        assert_eq!(histogram.counts(), &[1, 3]);
        assert_eq!(histogram.total(), 4);

        Ok(())
    }
}
