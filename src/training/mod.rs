/// Training infrastructure for the U-Net
pub mod checkpoint;
pub mod class_weights;
pub mod loss;
pub mod trainer;

pub use checkpoint::{Checkpoint, CheckpointMetadata};
pub use class_weights::{ClassHistogram, ClassWeights};
pub use loss::weighted_cross_entropy;
pub use trainer::{BatchOutput, Trainer, TrainingConfig, TrainingHistory};
pub use crate::metrics::{EpochMetrics, Phase};
