/// Model checkpointing with safetensors
use std::collections::HashMap;
use std::path::Path;

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use safetensors::SafeTensors;

/// Checkpoint metadata, stored in the safetensors header
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CheckpointMetadata {
    /// Epochs trained
    pub epochs: usize,
    /// Optimizer steps taken
    pub steps: usize,
    /// Final training loss
    pub train_loss: Option<f32>,
    /// Final validation loss
    pub val_loss: Option<f32>,
    /// Model configuration (as JSON string)
    pub model_config: Option<String>,
}

impl CheckpointMetadata {
    fn to_header(&self) -> HashMap<String, String> {
        let mut header = HashMap::new();
        header.insert("epochs".to_string(), self.epochs.to_string());
        header.insert("steps".to_string(), self.steps.to_string());
        if let Some(loss) = self.train_loss {
            header.insert("train_loss".to_string(), loss.to_string());
        }
        if let Some(loss) = self.val_loss {
            header.insert("val_loss".to_string(), loss.to_string());
        }
        if let Some(config) = &self.model_config {
            header.insert("model_config".to_string(), config.clone());
        }
        header
    }

    fn from_header(header: &HashMap<String, String>) -> Self {
        let parse_usize = |key: &str| header.get(key).and_then(|v| v.parse().ok()).unwrap_or(0);
        let parse_f32 = |key: &str| header.get(key).and_then(|v| v.parse().ok());

        Self {
            epochs: parse_usize("epochs"),
            steps: parse_usize("steps"),
            train_loss: parse_f32("train_loss"),
            val_loss: parse_f32("val_loss"),
            model_config: header.get("model_config").cloned(),
        }
    }
}

/// Model checkpoint
pub struct Checkpoint {
    /// Model parameters (including batch-norm running statistics)
    pub tensors: HashMap<String, Tensor>,
    /// Metadata
    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    /// Create new checkpoint
    pub fn new(tensors: HashMap<String, Tensor>, metadata: CheckpointMetadata) -> Self {
        Self { tensors, metadata }
    }

    /// Snapshot every variable of a VarMap
    pub fn from_varmap(varmap: &VarMap, metadata: CheckpointMetadata) -> crate::Result<Self> {
        let data = varmap
            .data()
            .lock()
            .map_err(|_| crate::FloodNetError::Training("VarMap lock poisoned".to_string()))?;

        let tensors = data
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect();

        Ok(Self::new(tensors, metadata))
    }

    /// Save checkpoint to file, replacing any existing file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut entries: Vec<(&String, &Tensor)> = self.tensors.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        safetensors::serialize_to_file(
            entries.into_iter().map(|(name, tensor)| (name.as_str(), tensor)),
            &Some(self.metadata.to_header()),
            path,
        )?;

        log::debug!("Wrote {} tensors to {}", self.tensors.len(), path.display());

        Ok(())
    }

    /// Load checkpoint from file
    ///
    /// # Arguments
    /// * `path` - Path to checkpoint file
    /// * `device` - Device to load tensors on
    pub fn load<P: AsRef<Path>>(path: P, device: &Device) -> crate::Result<Self> {
        let path = path.as_ref();

        let tensors = candle_core::safetensors::load(path, device)?;

        let bytes = std::fs::read(path)?;
        let (_, header) = SafeTensors::read_metadata(&bytes)?;
        let metadata = header
            .metadata()
            .as_ref()
            .map(CheckpointMetadata::from_header)
            .unwrap_or_default();

        Ok(Self { tensors, metadata })
    }

    /// Copy the stored values into the matching variables of a VarMap
    ///
    /// Every variable must have a tensor of the same shape in the checkpoint.
    pub fn restore(&self, varmap: &VarMap) -> crate::Result<()> {
        let data = varmap
            .data()
            .lock()
            .map_err(|_| crate::FloodNetError::Training("VarMap lock poisoned".to_string()))?;

        for (name, var) in data.iter() {
            let tensor = self.tensors.get(name).ok_or_else(|| {
                crate::FloodNetError::Data(format!("checkpoint has no tensor named {}", name))
            })?;
            let tensor = tensor.to_dtype(var.dtype())?.to_device(var.device())?;
            var.set(&tensor)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    #[test]
    fn test_metadata_header_round_trip() {
        let metadata = CheckpointMetadata {
            epochs: 20,
            steps: 7220,
            train_loss: Some(0.25),
            val_loss: None,
            model_config: Some("{}".to_string()),
        };

        let restored = CheckpointMetadata::from_header(&metadata.to_header());
        assert_eq!(restored, metadata);
    }

    #[test]
    fn test_save_load_checkpoint() -> crate::Result<()> {
        let device = Device::Cpu;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("model.safetensors");

        let mut tensors = HashMap::new();
        tensors.insert(
            "weight".to_string(),
            Tensor::arange(0f32, 6.0, &device)?.reshape((2, 3))?,
        );

        let metadata = CheckpointMetadata {
            epochs: 1,
            steps: 4,
            train_loss: Some(0.5),
            val_loss: Some(0.75),
            model_config: None,
        };

        Checkpoint::new(tensors, metadata.clone()).save(&path)?;
        let loaded = Checkpoint::load(&path, &device)?;

        assert_eq!(loaded.metadata, metadata);
        let weight = loaded.tensors["weight"].to_vec2::<f32>()?;
        assert_eq!(weight, vec![vec![0.0, 1.0, 2.0], vec![3.0, 4.0, 5.0]]);

        Ok(())
    }

    #[test]
    fn test_save_overwrites_existing_file() -> crate::Result<()> {
        let device = Device::Cpu;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("model.safetensors");

        for value in [1f32, 2.0] {
            let mut tensors = HashMap::new();
            tensors.insert("w".to_string(), Tensor::full(value, 3, &device)?);
            Checkpoint::new(tensors, CheckpointMetadata::default()).save(&path)?;
        }

        let loaded = Checkpoint::load(&path, &device)?;
        assert_eq!(loaded.tensors["w"].to_vec1::<f32>()?, vec![2.0; 3]);

        Ok(())
    }

    #[test]
    fn test_restore_into_varmap() -> crate::Result<()> {
        let device = Device::Cpu;

        let source = VarMap::new();
        source.get((2, 2), "layer.weight", candle_nn::Init::Const(3.0), DType::F32, &device)?;
        let checkpoint = Checkpoint::from_varmap(&source, CheckpointMetadata::default())?;

        let target = VarMap::new();
        let var = target.get((2, 2), "layer.weight", candle_nn::Init::Const(0.0), DType::F32, &device)?;
        checkpoint.restore(&target)?;

        assert_eq!(var.to_vec2::<f32>()?, vec![vec![3.0, 3.0], vec![3.0, 3.0]]);

        Ok(())
    }
}
