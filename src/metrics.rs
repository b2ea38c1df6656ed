/// Intersection-over-Union and per-epoch metric accumulation
///
/// IoU for class `c` is `|pred == c ∧ truth == c| / |pred == c ∨ truth == c|`.
/// A class that appears in neither map has no defined IoU; it is reported as
/// `None` and left out of means and accumulators.
use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::data::FloodNetClass;

/// Per-class IoU for two class-ID maps of equal length
///
/// Returns exactly `num_classes` entries. IDs outside `[0, num_classes)` are
/// not counted towards any class.
pub fn compute_iou_per_class(
    predictions: &[u32],
    targets: &[u32],
    num_classes: usize,
) -> crate::Result<Vec<Option<f32>>> {
    if predictions.len() != targets.len() {
        return Err(crate::FloodNetError::Data(format!(
            "prediction has {} pixels, target has {}",
            predictions.len(),
            targets.len()
        )));
    }

    let mut intersection = vec![0usize; num_classes];
    let mut pred_count = vec![0usize; num_classes];
    let mut target_count = vec![0usize; num_classes];

    for (&p, &t) in predictions.iter().zip(targets) {
        let (p, t) = (p as usize, t as usize);
        if p < num_classes {
            pred_count[p] += 1;
        }
        if t < num_classes {
            target_count[t] += 1;
        }
        if p == t && p < num_classes {
            intersection[p] += 1;
        }
    }

    Ok((0..num_classes)
        .map(|c| {
            let union = pred_count[c] + target_count[c] - intersection[c];
            if union == 0 {
                None
            } else {
                Some(intersection[c] as f32 / union as f32)
            }
        })
        .collect())
}

/// Per-class IoU for class-ID tensors of equal shape (any integer dtype)
pub fn compute_iou_per_class_tensor(
    predictions: &Tensor,
    targets: &Tensor,
    num_classes: usize,
) -> crate::Result<Vec<Option<f32>>> {
    if predictions.dims() != targets.dims() {
        return Err(crate::FloodNetError::Data(format!(
            "prediction shape {:?} does not match target shape {:?}",
            predictions.dims(),
            targets.dims()
        )));
    }

    let predictions = predictions
        .flatten_all()?
        .to_dtype(candle_core::DType::U32)?
        .to_vec1::<u32>()?;
    let targets = targets
        .flatten_all()?
        .to_dtype(candle_core::DType::U32)?
        .to_vec1::<u32>()?;

    compute_iou_per_class(&predictions, &targets, num_classes)
}

/// Mean over the classes that have an IoU; `None` when none do
pub fn mean_iou(per_class: &[Option<f32>]) -> Option<f32> {
    let present: Vec<f32> = per_class.iter().flatten().copied().collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f32>() / present.len() as f32)
    }
}

/// Running per-class IoU sums with per-class batch counts
#[derive(Debug, Clone)]
pub struct IouAccumulator {
    sums: Vec<f64>,
    counts: Vec<usize>,
}

impl IouAccumulator {
    pub fn new(num_classes: usize) -> Self {
        Self {
            sums: vec![0.0; num_classes],
            counts: vec![0; num_classes],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.sums.len()
    }

    /// Add one batch worth of per-class IoU
    pub fn add(&mut self, per_class: &[Option<f32>]) {
        for (c, iou) in per_class.iter().enumerate().take(self.sums.len()) {
            if let Some(iou) = iou {
                self.sums[c] += *iou as f64;
                self.counts[c] += 1;
            }
        }
    }

    /// Average per class over the batches in which that class was present
    pub fn mean_per_class(&self) -> Vec<Option<f32>> {
        self.sums
            .iter()
            .zip(&self.counts)
            .map(|(&sum, &count)| {
                if count == 0 {
                    None
                } else {
                    Some((sum / count as f64) as f32)
                }
            })
            .collect()
    }
}

/// Training or validation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Train,
    Validate,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Validate => "validation",
        }
    }

    /// Whether batches of this phase update parameters
    pub fn is_training(self) -> bool {
        matches!(self, Phase::Train)
    }
}

/// Summary of one phase of one epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub phase: Phase,
    /// Mean loss over batches
    pub loss: f32,
    /// One entry per class; `None` if the class never appeared this epoch
    pub per_class_iou: Vec<Option<f32>>,
    pub mean_iou: Option<f32>,
    pub num_batches: usize,
}

impl EpochMetrics {
    /// Log loss, per-class IoU and mean IoU
    pub fn log_summary(&self, num_epochs: usize) {
        log::info!(
            "Epoch {}/{} {} loss: {:.4}",
            self.epoch + 1,
            num_epochs,
            self.phase.name(),
            self.loss
        );

        for (cls, iou) in self.per_class_iou.iter().enumerate() {
            let name = FloodNetClass::label(cls);
            match iou {
                Some(iou) => log::info!("  Class {} ({}) IoU: {:.4}", cls, name, iou),
                None => log::info!("  Class {} ({}) IoU: n/a", cls, name),
            }
        }

        match self.mean_iou {
            Some(mean) => log::info!("  Mean {} IoU: {:.4}", self.phase.name(), mean),
            None => log::info!("  Mean {} IoU: n/a", self.phase.name()),
        }
    }
}

/// Loss and IoU accumulator for one phase of one epoch
#[derive(Debug, Clone)]
pub struct EpochAccumulator {
    loss_sum: f64,
    batches: usize,
    iou: IouAccumulator,
}

impl EpochAccumulator {
    pub fn new(num_classes: usize) -> Self {
        Self {
            loss_sum: 0.0,
            batches: 0,
            iou: IouAccumulator::new(num_classes),
        }
    }

    pub fn add_batch(&mut self, loss: f32, per_class_iou: &[Option<f32>]) {
        self.loss_sum += loss as f64;
        self.batches += 1;
        self.iou.add(per_class_iou);
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Close the epoch; fails when no batch was seen
    pub fn finish(self, epoch: usize, phase: Phase) -> crate::Result<EpochMetrics> {
        if self.batches == 0 {
            return Err(crate::FloodNetError::Training(format!(
                "{} loader produced no batches",
                phase.name()
            )));
        }

        let per_class_iou = self.iou.mean_per_class();
        let mean_iou = mean_iou(&per_class_iou);

        Ok(EpochMetrics {
            epoch,
            phase,
            loss: (self.loss_sum / self.batches as f64) as f32,
            per_class_iou,
            mean_iou,
            num_batches: self.batches,
        })
    }
}
