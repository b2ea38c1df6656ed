/// Training loop for the U-Net
use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::data::BatchDataLoader;
use crate::metrics::{compute_iou_per_class_tensor, EpochAccumulator, EpochMetrics, Phase};
use crate::visualization::{PredictionSample, Visualizer};
use crate::{UNet, UNetConfig};
use super::checkpoint::{Checkpoint, CheckpointMetadata};
use super::class_weights::ClassWeights;
use super::loss::weighted_cross_entropy;

/// Training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of training epochs
    pub num_epochs: usize,
    /// Batch size
    pub batch_size: usize,
    /// Adam learning rate (constant)
    pub learning_rate: f64,
    /// Where the final weights are written
    pub checkpoint_path: String,
    /// Hand example predictions and loss curves to the visualizer
    pub visualize: bool,
    /// Directory for rendered images and history.json (used by the binary)
    pub visualization_dir: String,
    /// Show a progress bar per phase
    pub show_progress: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            num_epochs: 20,
            batch_size: 4,
            learning_rate: 1e-5,
            checkpoint_path: "u_net_flood_net.safetensors".to_string(),
            visualize: true,
            visualization_dir: "visualizations".to_string(),
            show_progress: true,
        }
    }
}

impl TrainingConfig {
    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.num_epochs == 0 || self.batch_size == 0 {
            return Err(crate::FloodNetError::Config(
                "num_epochs and batch_size must be > 0".to_string(),
            ));
        }

        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(crate::FloodNetError::Config(format!(
                "Invalid learning_rate: {}",
                self.learning_rate
            )));
        }

        if self.checkpoint_path.is_empty() {
            return Err(crate::FloodNetError::Config(
                "checkpoint_path must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Per-epoch metrics of a finished run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub train: Vec<EpochMetrics>,
    pub validation: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn train_losses(&self) -> Vec<f32> {
        self.train.iter().map(|m| m.loss).collect()
    }

    pub fn val_losses(&self) -> Vec<f32> {
        self.validation.iter().map(|m| m.loss).collect()
    }

    /// Write as pretty JSON
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Result of one batch
pub struct BatchOutput {
    /// Scalar loss
    pub loss: f32,
    /// Arg-max class map [batch, H, W]
    pub predictions: Tensor,
    /// Ground truth [batch, H, W]
    pub targets: Tensor,
}

/// Trainer for the U-Net
pub struct Trainer {
    model: UNet,
    model_config: UNetConfig,
    varmap: VarMap,
    optimizer: AdamW,
    class_weights: Tensor,
    config: TrainingConfig,
    device: Device,
    step: usize,
}

impl Trainer {
    /// Create new trainer
    ///
    /// # Arguments
    /// * `model_config` - U-Net configuration
    /// * `training_config` - Loop hyperparameters
    /// * `class_weights` - One loss weight per class
    /// * `device` - Where parameters and batches live
    pub fn new(
        model_config: UNetConfig,
        training_config: TrainingConfig,
        class_weights: ClassWeights,
        device: Device,
    ) -> crate::Result<Self> {
        training_config.validate()?;

        if class_weights.len() != model_config.num_classes {
            return Err(crate::FloodNetError::Config(format!(
                "{} class weights for {} classes",
                class_weights.len(),
                model_config.num_classes
            )));
        }

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = UNet::new(model_config.clone(), vb)?;

        // Plain Adam: AdamW without decay
        let optimizer_params = ParamsAdamW {
            lr: training_config.learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        };
        let optimizer = AdamW::new(varmap.all_vars(), optimizer_params)?;

        let class_weights = class_weights.to_tensor(&device)?;

        log::info!("Class weights: {:?}", class_weights.to_vec1::<f32>()?);

        Ok(Self {
            model,
            model_config,
            varmap,
            optimizer,
            class_weights,
            config: training_config,
            device,
            step: 0,
        })
    }

    /// Trained model
    pub fn model(&self) -> &UNet {
        &self.model
    }

    /// All model variables, batch-norm statistics included
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Optimizer steps taken so far
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Forward + loss; `train` selects batch-norm/dropout mode
    fn forward_loss(&self, images: &Tensor, masks: &Tensor, train: bool) -> crate::Result<(Tensor, Tensor, Tensor)> {
        let images = images.to_device(&self.device)?;
        let targets = masks.to_device(&self.device)?.squeeze(1)?.to_dtype(DType::U32)?;

        let logits = self.model.forward_t(&images, train)?;
        log::debug!("Logits shape: {:?}", logits.dims());

        let loss = weighted_cross_entropy(&logits, &targets, &self.class_weights)?;
        Ok((loss, logits, targets))
    }

    fn scalar_loss(loss: &Tensor) -> crate::Result<f32> {
        let value = loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;
        if !value.is_finite() {
            return Err(crate::FloodNetError::Training(format!(
                "loss became non-finite ({})",
                value
            )));
        }
        Ok(value)
    }

    /// Training step: forward, weighted loss, backward, Adam update
    pub fn train_step(&mut self, images: &Tensor, masks: &Tensor) -> crate::Result<BatchOutput> {
        let (loss, logits, targets) = self.forward_loss(images, masks, true)?;
        let loss_val = Self::scalar_loss(&loss)?;

        // backward_step computes fresh gradients and applies them in place
        self.optimizer.backward_step(&loss)?;
        self.step += 1;

        Ok(BatchOutput {
            loss: loss_val,
            predictions: logits.detach().argmax(1)?,
            targets,
        })
    }

    /// Validation step: inference-mode forward and loss, no update
    pub fn eval_step(&self, images: &Tensor, masks: &Tensor) -> crate::Result<BatchOutput> {
        let (loss, logits, targets) = self.forward_loss(images, masks, false)?;
        let loss_val = Self::scalar_loss(&loss.detach())?;

        Ok(BatchOutput {
            loss: loss_val,
            predictions: logits.detach().argmax(1)?,
            targets,
        })
    }

    fn progress_bar(&self, len: usize, message: String) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        let style = ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} {elapsed_precise}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style.progress_chars("=> "));
        bar.set_message(message);
        bar
    }

    /// Run one phase of one epoch over a loader
    pub fn run_epoch(
        &mut self,
        epoch: usize,
        phase: Phase,
        loader: &mut dyn BatchDataLoader,
        visualizer: &mut dyn Visualizer,
    ) -> crate::Result<EpochMetrics> {
        let num_classes = self.model_config.num_classes;
        let mut accumulator = EpochAccumulator::new(num_classes);
        let mut last_batch: Option<(Tensor, BatchOutput)> = None;

        loader.reset();

        let bar = self.progress_bar(
            loader.num_batches(),
            format!("{} epoch {}", phase.name(), epoch + 1),
        );

        while let Some((images, masks)) = loader.next_batch(&self.device)? {
            let output = if phase.is_training() {
                self.train_step(&images, &masks)?
            } else {
                self.eval_step(&images, &masks)?
            };

            let ious = compute_iou_per_class_tensor(&output.predictions, &output.targets, num_classes)?;
            accumulator.add_batch(output.loss, &ious);

            log::debug!(
                "{} batch {}: loss={:.4}",
                phase.name(),
                accumulator.batches(),
                output.loss
            );

            bar.inc(1);
            last_batch = Some((images, output));
        }

        bar.finish_and_clear();

        match &last_batch {
            Some((images, output)) if self.config.visualize => {
                let sample = PredictionSample::from_batch(images, &output.predictions, &output.targets)?;
                let tag = format!("epoch_{:03}_{}", epoch + 1, phase.name());
                visualizer.show_prediction(&tag, &sample)?;
            }
            _ => {}
        }

        accumulator.finish(epoch, phase)
    }

    /// Full training loop
    ///
    /// Alternates a training and a validation pass per epoch, then writes the
    /// checkpoint and renders the loss curves.
    pub fn train(
        &mut self,
        train_loader: &mut dyn BatchDataLoader,
        val_loader: &mut dyn BatchDataLoader,
        visualizer: &mut dyn Visualizer,
    ) -> crate::Result<TrainingHistory> {
        let num_epochs = self.config.num_epochs;

        log::info!("Starting training for {} epochs", num_epochs);
        log::info!(
            "Batches per epoch: {} train, {} validation",
            train_loader.num_batches(),
            val_loader.num_batches()
        );

        let mut history = TrainingHistory::default();

        for epoch in 0..num_epochs {
            log::info!("=== Epoch {}/{} ===", epoch + 1, num_epochs);

            let train_metrics = self.run_epoch(epoch, Phase::Train, train_loader, visualizer)?;
            train_metrics.log_summary(num_epochs);

            let val_metrics = self.run_epoch(epoch, Phase::Validate, val_loader, visualizer)?;
            val_metrics.log_summary(num_epochs);

            history.train.push(train_metrics);
            history.validation.push(val_metrics);
        }

        log::info!("Training complete after {} steps", self.step);

        let checkpoint_path = self.config.checkpoint_path.clone();
        log::info!("Saving final model to {}", checkpoint_path);
        self.save_checkpoint(&checkpoint_path, &history)?;

        if self.config.visualize {
            visualizer.show_losses(&history.train_losses(), &history.val_losses())?;
        }

        Ok(history)
    }

    /// Write model parameters and run summary to a safetensors file
    pub fn save_checkpoint<P: AsRef<Path>>(&self, path: P, history: &TrainingHistory) -> crate::Result<()> {
        let metadata = CheckpointMetadata {
            epochs: history.train.len(),
            steps: self.step,
            train_loss: history.train.last().map(|m| m.loss),
            val_loss: history.validation.last().map(|m| m.loss),
            model_config: Some(serde_json::to_string(&self.model_config)?),
        };

        Checkpoint::from_varmap(&self.varmap, metadata)?.save(path)
    }

    /// Load parameters from a checkpoint written by [`Trainer::save_checkpoint`]
    pub fn load_checkpoint<P: AsRef<Path>>(&mut self, path: P) -> crate::Result<CheckpointMetadata> {
        let checkpoint = Checkpoint::load(path, &self.device)?;
        checkpoint.restore(&self.varmap)?;
        Ok(checkpoint.metadata)
    }
}
