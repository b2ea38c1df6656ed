/// Configuration for the U-Net model, data pipeline and experiment
use std::path::Path;

use candle_core::Device;
use serde::{Deserialize, Serialize};

use crate::training::TrainingConfig;

/// Configuration for the U-Net segmentation model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UNetConfig {
    /// Input image channels (RGB)
    pub in_channels: usize,

    /// Number of segmentation classes
    pub num_classes: usize,

    /// Feature channels at the first encoder level, doubled at every level
    pub base_channels: usize,

    /// Number of down-sampling levels between input and bottleneck
    pub depth: usize,

    /// Dropout probability in the bottleneck (training mode only)
    pub dropout: f32,

    /// Batch-norm epsilon
    pub batch_norm_eps: f64,
}

impl Default for UNetConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            num_classes: 10, // FloodNet classes
            base_channels: 64,
            depth: 4,
            dropout: 0.0,
            batch_norm_eps: 1e-5,
        }
    }
}

impl UNetConfig {
    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.in_channels == 0 {
            return Err(crate::FloodNetError::Config(
                "in_channels must be > 0".to_string(),
            ));
        }

        if self.num_classes < 2 {
            return Err(crate::FloodNetError::Config(
                "num_classes must be >= 2".to_string(),
            ));
        }

        if self.base_channels == 0 || self.depth == 0 {
            return Err(crate::FloodNetError::Config(
                "base_channels and depth must be > 0".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.dropout) {
            return Err(crate::FloodNetError::Config(format!(
                "Invalid dropout: {}. Must be in [0, 1)",
                self.dropout
            )));
        }

        Ok(())
    }

    /// Feature channels at encoder level `level` (0 = first level)
    pub fn channels_at(&self, level: usize) -> usize {
        self.base_channels << level
    }

    /// Feature channels in the bottleneck
    pub fn bottleneck_channels(&self) -> usize {
        self.channels_at(self.depth)
    }

    /// Input height and width must be divisible by this
    pub fn spatial_divisor(&self) -> usize {
        1 << self.depth
    }
}

/// Where the dataset lives and how samples are shaped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Dataset root holding `train/`, `val/` (and optionally `test/`)
    pub root: String,

    /// Resized image height
    pub height: usize,

    /// Resized image width
    pub width: usize,

    /// Shuffle training batches every epoch
    pub shuffle: bool,

    /// Seed for shuffling; a fresh thread RNG is used when absent
    pub seed: Option<u64>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            root: "data/FloodNet".to_string(),
            height: 256,
            width: 256,
            shuffle: true,
            seed: None,
        }
    }
}

impl DataConfig {
    /// Validate against the model that will consume the data
    pub fn validate(&self, model: &UNetConfig) -> crate::Result<()> {
        let divisor = model.spatial_divisor();
        if self.height == 0 || self.width == 0 {
            return Err(crate::FloodNetError::Config(
                "height and width must be > 0".to_string(),
            ));
        }
        if self.height % divisor != 0 || self.width % divisor != 0 {
            return Err(crate::FloodNetError::Config(format!(
                "image size {}x{} must be divisible by {} for depth {}",
                self.height, self.width, divisor, model.depth
            )));
        }
        Ok(())
    }
}

/// Compute device selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// CUDA when available, CPU otherwise
    Auto,
    Cpu,
    Cuda,
}

impl DeviceKind {
    /// Resolve into a concrete candle device
    pub fn resolve(self, cuda_ordinal: usize) -> crate::Result<Device> {
        let device = match self {
            DeviceKind::Cpu => Device::Cpu,
            DeviceKind::Cuda => Device::new_cuda(cuda_ordinal)?,
            DeviceKind::Auto => {
                if candle_core::utils::cuda_is_available() {
                    Device::new_cuda(cuda_ordinal)?
                } else {
                    Device::Cpu
                }
            }
        };
        Ok(device)
    }
}

/// Everything needed for one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub model: UNetConfig,
    pub training: TrainingConfig,
    pub data: DataConfig,
    pub device: DeviceKind,
    pub cuda_ordinal: usize,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            model: UNetConfig::default(),
            training: TrainingConfig::default(),
            data: DataConfig::default(),
            device: DeviceKind::Auto,
            cuda_ordinal: 0,
        }
    }
}

impl ExperimentConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all sections
    pub fn validate(&self) -> crate::Result<()> {
        self.model.validate()?;
        self.training.validate()?;
        self.data.validate(&self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ExperimentConfig::default().validate().is_ok());
    }

    #[test]
    fn test_channels_double_per_level() {
        let config = UNetConfig {
            base_channels: 8,
            depth: 3,
            ..Default::default()
        };
        assert_eq!(config.channels_at(0), 8);
        assert_eq!(config.channels_at(2), 32);
        assert_eq!(config.bottleneck_channels(), 64);
        assert_eq!(config.spatial_divisor(), 8);
    }

    #[test]
    fn test_invalid_model_config() {
        let config = UNetConfig {
            num_classes: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = UNetConfig {
            dropout: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_image_size_must_match_depth() {
        let model = UNetConfig::default();
        let data = DataConfig {
            height: 100,
            ..Default::default()
        };
        assert!(data.validate(&model).is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "training": { "num_epochs": 3 },
            "data": { "height": 64, "width": 64 },
            "device": "cpu"
        }"#;

        let config: ExperimentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.training.num_epochs, 3);
        assert_eq!(config.training.learning_rate, 1e-5);
        assert_eq!(config.data.height, 64);
        assert_eq!(config.model.num_classes, 10);
        assert_eq!(config.device, DeviceKind::Cpu);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cpu_device_resolves() {
        let device = DeviceKind::Cpu.resolve(0).unwrap();
        assert!(device.is_cpu());
    }
}
