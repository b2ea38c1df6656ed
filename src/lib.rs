//! FloodNet U-Net - semantic segmentation training in Rust
//!
//! Trains a U-Net on the FloodNet aerial imagery dataset with a
//! class-weighted cross-entropy loss, tracks per-class Intersection-over-Union
//! and renders example predictions and loss curves.
//!
//! # Architecture
//!
//! - **data**: datasets (FloodNet directory, NumPy arrays, in-memory) and a
//!   batching loader
//! - **models**: the U-Net encoder-decoder and checkpoint loading
//! - **training**: class weights, weighted loss, the epoch driver and
//!   checkpoint persistence
//! - **metrics**: per-class IoU and epoch accumulators
//! - **visualization**: prediction triplets and loss charts as PNG files
//!
//! # Example
//!
//! ```ignore
//! use floodnet_unet::{UNetConfig, training::{Trainer, TrainingConfig, ClassWeights}};
//!
//! let weights = ClassWeights::from_loader(&mut train_loader, 10)?;
//! let mut trainer = Trainer::new(UNetConfig::default(), TrainingConfig::default(), weights, device)?;
//! let history = trainer.train(&mut train_loader, &mut val_loader, &mut visualizer)?;
//! ```

pub mod config;
pub mod data;
pub mod layers;
pub mod metrics;
pub mod models;
pub mod training;
pub mod visualization;

// Re-export commonly used items
pub use config::{DataConfig, DeviceKind, ExperimentConfig, UNetConfig};
pub use models::UNet;

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum FloodNetError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Plot error: {0}")]
    Plot(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] safetensors::SafeTensorError),
}

pub type Result<T> = std::result::Result<T, FloodNetError>;
