/// U-Net segmentation model
use candle_core::{Result, Tensor, Device};
use candle_nn::{conv2d, Conv2d, Dropout, Module, ModuleT, VarBuilder};
use crate::config::UNetConfig;
use crate::layers::{DoubleConv, DownBlock, UpBlock};

pub mod loader;

/// Encoder-decoder network with skip connections
///
/// Maps an image batch `[batch, in_channels, H, W]` to per-pixel class scores
/// `[batch, num_classes, H, W]`. H and W must be divisible by `2^depth`.
pub struct UNet {
    config: UNetConfig,

    // Encoder
    input_conv: DoubleConv,
    down: Vec<DownBlock>,

    // Bottleneck regularisation
    dropout: Dropout,

    // Decoder, deepest level first
    up: Vec<UpBlock>,

    // Per-pixel classifier
    head: Conv2d,

    device: Device,
}

impl UNet {
    /// Create new UNet
    pub fn new(config: UNetConfig, vb: VarBuilder) -> crate::Result<Self> {
        config.validate()?;

        let device = vb.device().clone();
        let eps = config.batch_norm_eps;

        let input_conv = DoubleConv::new(
            config.in_channels,
            config.channels_at(0),
            eps,
            vb.pp("input_conv"),
        )?;

        // Level i takes channels_at(i) down to channels_at(i + 1)
        let mut down = Vec::with_capacity(config.depth);
        for i in 0..config.depth {
            down.push(DownBlock::new(
                config.channels_at(i),
                config.channels_at(i + 1),
                eps,
                vb.pp(&format!("down_{}", i)),
            )?);
        }

        let mut up = Vec::with_capacity(config.depth);
        for i in (0..config.depth).rev() {
            up.push(UpBlock::new(
                config.channels_at(i + 1),
                config.channels_at(i),
                config.channels_at(i),
                eps,
                vb.pp(&format!("up_{}", i)),
            )?);
        }

        let head = conv2d(
            config.channels_at(0),
            config.num_classes,
            1,
            Default::default(),
            vb.pp("head"),
        )?;

        Ok(Self {
            dropout: Dropout::new(config.dropout),
            config,
            input_conv,
            down,
            up,
            head,
            device,
        })
    }

    /// Model configuration
    pub fn config(&self) -> &UNetConfig {
        &self.config
    }

    /// Device the parameters live on
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `images` - Input tensor [batch, in_channels, H, W]
    /// * `train` - Training mode: batch-norm statistics update and dropout
    ///
    /// # Returns
    /// Class scores [batch, num_classes, H, W]
    pub fn forward_t(&self, images: &Tensor, train: bool) -> Result<Tensor> {
        let (_, channels, height, width) = images.dims4()?;
        if channels != self.config.in_channels {
            return Err(candle_core::Error::Msg(format!(
                "Expected {} input channels, got {}",
                self.config.in_channels, channels
            )));
        }

        let divisor = self.config.spatial_divisor();
        if height % divisor != 0 || width % divisor != 0 {
            return Err(candle_core::Error::Msg(format!(
                "Input size {}x{} is not divisible by {} (depth {})",
                height, width, divisor, self.config.depth
            )));
        }

        let mut skips = Vec::with_capacity(self.config.depth);
        let mut xs = self.input_conv.forward_t(images, train)?;
        for block in &self.down {
            skips.push(xs.clone());
            xs = block.forward_t(&xs, train)?;
        }

        xs = self.dropout.forward_t(&xs, train)?;

        for (block, skip) in self.up.iter().zip(skips.iter().rev()) {
            xs = block.forward_t(&xs, skip, train)?;
        }

        self.head.forward(&xs)
    }

    /// Inference-mode forward pass
    pub fn forward(&self, images: &Tensor) -> Result<Tensor> {
        self.forward_t(images, false)
    }

    /// Discrete class map [batch, H, W] (u32) from an image batch
    pub fn predict(&self, images: &Tensor) -> Result<Tensor> {
        self.forward(images)?.argmax(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;

    fn tiny_config(num_classes: usize, depth: usize) -> UNetConfig {
        UNetConfig {
            num_classes,
            base_channels: 4,
            depth,
            ..Default::default()
        }
    }

    #[test]
    fn test_unet_output_shape() -> crate::Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let model = UNet::new(tiny_config(5, 2), vb)?;

        let x = Tensor::randn(0f32, 1.0, (2, 3, 16, 16), &device)?;
        let out = model.forward_t(&x, true)?;

        assert_eq!(out.dims(), &[2, 5, 16, 16]);

        Ok(())
    }

    #[test]
    fn test_unet_rejects_indivisible_input() -> crate::Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let model = UNet::new(tiny_config(2, 3), vb)?;

        let x = Tensor::randn(0f32, 1.0, (1, 3, 12, 12), &device)?;
        assert!(model.forward(&x).is_err());

        Ok(())
    }

    #[test]
    fn test_unet_rejects_wrong_channel_count() -> crate::Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let model = UNet::new(tiny_config(2, 1), vb)?;

        let x = Tensor::randn(0f32, 1.0, (1, 1, 4, 4), &device)?;
        assert!(model.forward(&x).is_err());

        Ok(())
    }

    #[test]
    fn test_predict_yields_class_map() -> crate::Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let model = UNet::new(tiny_config(3, 1), vb)?;

        let x = Tensor::randn(0f32, 1.0, (2, 3, 4, 4), &device)?;
        let classes = model.predict(&x)?;

        assert_eq!(classes.dims(), &[2, 4, 4]);
        assert_eq!(classes.dtype(), DType::U32);
        let max = classes.flatten_all()?.max(0)?.to_scalar::<u32>()?;
        assert!(max < 3);

        Ok(())
    }

    #[test]
    fn test_parameters_are_registered() -> crate::Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let _model = UNet::new(tiny_config(2, 1), vb)?;

        let data = varmap.data().lock().unwrap();
        assert!(data.contains_key("head.weight"));
        assert!(data.contains_key("input_conv.bn1.running_mean"));
        assert!(data.contains_key("down_0.conv.conv2.weight"));
        assert!(data.contains_key("up_0.conv.conv1.weight"));

        Ok(())
    }
}
