/// Weight loading from safetensors checkpoints
use std::path::Path;
use candle_core::{Device, DType};
use candle_nn::VarBuilder;
use crate::UNetConfig;
use super::UNet;

/// Load model from safetensors file
///
/// The returned model is read-only; use it with `forward` / `predict`.
///
/// # Arguments
/// * `config` - Model configuration (must match the checkpoint)
/// * `weights_path` - Path to safetensors file
/// * `device` - Device to load model on
pub fn load_model<P: AsRef<Path>>(
    config: UNetConfig,
    weights_path: P,
    device: &Device,
) -> crate::Result<UNet> {
    let path = weights_path.as_ref();
    if !path.exists() {
        return Err(crate::FloodNetError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("checkpoint not found: {}", path.display()),
        )));
    }

    log::info!("Loading U-Net weights from {}", path.display());

    // SAFETY: the file is not modified while the mapping is alive.
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)? };

    UNet::new(config, vb)
}
