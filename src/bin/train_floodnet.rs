/// FloodNet U-Net training run
use std::path::Path;

use clap::{Parser, ValueEnum};
use floodnet_unet::data::{
    BatchDataLoader, FloodNetDataset, NumpyDataset, SegmentationDataset, SegmentationLoader, Split,
};
use floodnet_unet::training::{ClassWeights, Trainer};
use floodnet_unet::visualization::{NullVisualizer, PngVisualizer, Visualizer};
use floodnet_unet::{DeviceKind, ExperimentConfig};

#[derive(ValueEnum, Debug, Clone, Copy)]
enum DataFormat {
    /// `<split>/<split>-org-img` + `<split>/<split>-label-img` image folders
    Images,
    /// `<split>/images.npy` + `<split>/masks.npy` arrays
    Numpy,
}

#[derive(Parser, Debug)]
#[command(name = "train_floodnet", about = "Train a U-Net on FloodNet")]
struct Args {
    /// JSON experiment config; defaults are used for anything it omits
    #[arg(long)]
    config: Option<String>,
    /// Dataset root (overrides the config)
    #[arg(long)]
    data_root: Option<String>,
    /// Dataset layout
    #[arg(long, value_enum, default_value_t = DataFormat::Images)]
    format: DataFormat,
    /// Number of epochs (overrides the config)
    #[arg(long)]
    epochs: Option<usize>,
    /// Force CPU execution
    #[arg(long)]
    cpu: bool,
}

fn loader_for<D: SegmentationDataset + 'static>(
    dataset: D,
    batch_size: usize,
    shuffle: bool,
    seed: Option<u64>,
) -> Box<dyn BatchDataLoader> {
    Box::new(SegmentationLoader::new(dataset, batch_size, shuffle, seed))
}

fn build_loader(
    config: &ExperimentConfig,
    format: DataFormat,
    split: Split,
) -> anyhow::Result<Box<dyn BatchDataLoader>> {
    let root = Path::new(&config.data.root);
    let num_classes = config.model.num_classes;
    let batch_size = config.training.batch_size;
    // Validation order is fixed
    let shuffle = config.data.shuffle && split == Split::Train;

    let loader = match format {
        DataFormat::Images => {
            let dataset = FloodNetDataset::from_split(
                root,
                split,
                config.data.height,
                config.data.width,
                num_classes,
            )?;
            log::info!("{} split: {} samples", split.name(), dataset.len());
            loader_for(dataset, batch_size, shuffle, config.data.seed)
        }
        DataFormat::Numpy => {
            let dataset = NumpyDataset::from_directory(root.join(split.name()), num_classes)?;
            let (height, width) = dataset.image_size();
            if (height, width) != (config.data.height, config.data.width) {
                log::warn!(
                    "{} arrays are {}x{}, config says {}x{}; using the arrays",
                    split.name(),
                    height,
                    width,
                    config.data.height,
                    config.data.width
                );
            }
            loader_for(dataset, batch_size, shuffle, config.data.seed)
        }
    };

    Ok(loader)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ExperimentConfig::from_json_file(path)?,
        None => ExperimentConfig::default(),
    };
    if let Some(root) = args.data_root {
        config.data.root = root;
    }
    if let Some(epochs) = args.epochs {
        config.training.num_epochs = epochs;
    }
    if args.cpu {
        config.device = DeviceKind::Cpu;
    }
    config.validate()?;

    log::info!("=== FloodNet U-Net training ===");
    log::info!("Configuration: {:#?}", config);

    let device = config.device.resolve(config.cuda_ordinal)?;
    log::info!("Using device: {:?}", device);

    let mut train_loader = build_loader(&config, args.format, Split::Train)?;
    let mut val_loader = build_loader(&config, args.format, Split::Val)?;

    log::info!(
        "Batches per epoch: {} train, {} validation",
        train_loader.num_batches(),
        val_loader.num_batches()
    );

    log::info!("Computing class weights from training labels...");
    let class_weights = ClassWeights::from_loader(train_loader.as_mut(), config.model.num_classes)?;

    let mut visualizer: Box<dyn Visualizer> = if config.training.visualize {
        Box::new(PngVisualizer::new(&config.training.visualization_dir)?)
    } else {
        Box::new(NullVisualizer)
    };

    let mut trainer = Trainer::new(
        config.model.clone(),
        config.training.clone(),
        class_weights,
        device,
    )?;

    let history = trainer.train(train_loader.as_mut(), val_loader.as_mut(), visualizer.as_mut())?;

    let history_path = Path::new(&config.training.visualization_dir).join("history.json");
    history.save_json(&history_path)?;
    log::info!("Wrote {}", history_path.display());

    if let (Some(train), Some(val)) = (history.train.last(), history.validation.last()) {
        log::info!(
            "Final loss: train {:.4}, validation {:.4}; mean IoU: train {:?}, validation {:?}",
            train.loss,
            val.loss,
            train.mean_iou,
            val.mean_iou
        );
    }

    log::info!("Training Completed.");

    Ok(())
}
