use candle_core::{Device, Tensor};
use floodnet_unet::data::{InMemoryDataset, Sample, SegmentationLoader};
use floodnet_unet::models::loader::load_model;
use floodnet_unet::training::{Checkpoint, ClassWeights, Trainer, TrainingConfig};
use floodnet_unet::visualization::{NullVisualizer, PngVisualizer};
use floodnet_unet::UNetConfig;

fn tiny_model() -> UNetConfig {
    UNetConfig {
        num_classes: 2,
        base_channels: 4,
        depth: 1,
        ..Default::default()
    }
}

fn quiet_config(dir: &std::path::Path, num_epochs: usize) -> TrainingConfig {
    TrainingConfig {
        num_epochs,
        batch_size: 1,
        learning_rate: 1e-3,
        checkpoint_path: dir.join("u_net.safetensors").to_string_lossy().into_owned(),
        visualize: false,
        visualization_dir: dir.join("viz").to_string_lossy().into_owned(),
        show_progress: false,
    }
}

/// Four identical 2x2 samples, one per batch
fn identical_loader() -> SegmentationLoader<InMemoryDataset> {
    let image = vec![0.1, 0.9, 0.9, 0.1, 0.5, 0.5, 0.5, 0.5, 0.9, 0.1, 0.1, 0.9];
    let mask = vec![0, 1, 1, 0];
    let samples = (0..4).map(|_| Sample::new(image.clone(), mask.clone())).collect();
    let dataset = InMemoryDataset::new(samples, 3, 2, 2, 2).unwrap();
    SegmentationLoader::new(dataset, 1, false, None)
}

#[test]
fn one_epoch_on_identical_batches() {
    let dir = tempfile::tempdir().unwrap();
    let mut train_loader = identical_loader();
    let mut val_loader = identical_loader();

    let weights = ClassWeights::from_loader(&mut train_loader, 2).unwrap();
    assert_eq!(weights.as_slice(), &[1.0, 1.0]);

    let mut trainer =
        Trainer::new(tiny_model(), quiet_config(dir.path(), 1), weights, Device::Cpu).unwrap();
    let history = trainer
        .train(&mut train_loader, &mut val_loader, &mut NullVisualizer)
        .unwrap();

    assert_eq!(history.train.len(), 1);
    assert_eq!(history.validation.len(), 1);
    assert_eq!(trainer.step(), 4);

    for metrics in history.train.iter().chain(history.validation.iter()) {
        assert!(metrics.loss.is_finite());
        assert_eq!(metrics.num_batches, 4);
        assert_eq!(metrics.per_class_iou.len(), 2);
        for iou in metrics.per_class_iou.iter().flatten() {
            assert!((0.0..=1.0).contains(iou));
        }
    }

    assert!(dir.path().join("u_net.safetensors").exists());
}

#[test]
fn checkpoint_reloads_to_identical_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let config = quiet_config(dir.path(), 1);
    let checkpoint_path = config.checkpoint_path.clone();

    let mut trainer =
        Trainer::new(tiny_model(), config.clone(), ClassWeights::uniform(2), Device::Cpu).unwrap();
    trainer
        .train(&mut identical_loader(), &mut identical_loader(), &mut NullVisualizer)
        .unwrap();

    let input = Tensor::new(
        &[[[[0.2f32, 0.4], [0.6, 0.8]], [[0.1, 0.3], [0.5, 0.7]], [[0.9, 0.8], [0.7, 0.6]]]],
        &Device::Cpu,
    )
    .unwrap();
    let expected = trainer.model().forward(&input).unwrap();

    // Standalone model from the safetensors file
    let reloaded = load_model(tiny_model(), &checkpoint_path, &Device::Cpu).unwrap();
    let actual = reloaded.forward(&input).unwrap();
    let diff = (expected.clone() - actual)
        .unwrap()
        .abs()
        .unwrap()
        .max_all()
        .unwrap()
        .to_scalar::<f32>()
        .unwrap();
    assert!(diff < 1e-6);

    // Fresh trainer restored in place
    let mut fresh =
        Trainer::new(tiny_model(), config, ClassWeights::uniform(2), Device::Cpu).unwrap();
    let metadata = fresh.load_checkpoint(&checkpoint_path).unwrap();
    assert_eq!(metadata.epochs, 1);
    assert_eq!(metadata.steps, 4);

    let restored = fresh.model().forward(&input).unwrap();
    let diff = (expected - restored)
        .unwrap()
        .abs()
        .unwrap()
        .max_all()
        .unwrap()
        .to_scalar::<f32>()
        .unwrap();
    assert!(diff < 1e-6);

    let checkpoint = Checkpoint::load(&checkpoint_path, &Device::Cpu).unwrap();
    assert!(checkpoint.tensors.contains_key("head.weight"));
}

#[test]
fn png_visualizer_writes_epoch_images() {
    let dir = tempfile::tempdir().unwrap();
    let viz_dir = dir.path().join("viz");

    let config = TrainingConfig {
        visualize: true,
        ..quiet_config(dir.path(), 1)
    };

    let mut trainer = Trainer::new(tiny_model(), config, ClassWeights::uniform(2), Device::Cpu).unwrap();
    let mut visualizer = PngVisualizer::new(&viz_dir).unwrap();
    trainer
        .train(&mut identical_loader(), &mut identical_loader(), &mut visualizer)
        .unwrap();

    assert!(viz_dir.join("epoch_001_train.png").exists());
    assert!(viz_dir.join("epoch_001_validation.png").exists());
    assert!(viz_dir.join("loss.png").exists());
    assert_eq!(visualizer.written().len(), 3);
}
