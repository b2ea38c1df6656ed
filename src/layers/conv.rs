/// Convolutional building blocks for the U-Net
use candle_core::{Result, Tensor};
use candle_nn::{
    batch_norm, conv2d, BatchNorm, Conv2d, Conv2dConfig, Module, ModuleT, VarBuilder,
};

/// Two 3x3 convolutions, each followed by batch norm and ReLU
///
/// Spatial size is preserved (padding 1).
pub struct DoubleConv {
    conv1: Conv2d,
    bn1: BatchNorm,
    conv2: Conv2d,
    bn2: BatchNorm,
}

impl DoubleConv {
    /// Create new DoubleConv block
    ///
    /// # Arguments
    /// * `in_channels` - Input feature channels
    /// * `out_channels` - Output feature channels
    /// * `eps` - Batch-norm epsilon
    /// * `vb` - VarBuilder for parameter initialization
    pub fn new(in_channels: usize, out_channels: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };

        let conv1 = conv2d(in_channels, out_channels, 3, cfg, vb.pp("conv1"))?;
        let bn1 = batch_norm(out_channels, eps, vb.pp("bn1"))?;
        let conv2 = conv2d(out_channels, out_channels, 3, cfg, vb.pp("conv2"))?;
        let bn2 = batch_norm(out_channels, eps, vb.pp("bn2"))?;

        Ok(Self {
            conv1,
            bn1,
            conv2,
            bn2,
        })
    }
}

impl ModuleT for DoubleConv {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = self.conv1.forward(xs)?;
        let xs = self.bn1.forward_t(&xs, train)?.relu()?;
        let xs = self.conv2.forward(&xs)?;
        self.bn2.forward_t(&xs, train)?.relu()
    }
}

/// Encoder level: 2x2 max pooling then a DoubleConv
pub struct DownBlock {
    conv: DoubleConv,
}

impl DownBlock {
    pub fn new(in_channels: usize, out_channels: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            conv: DoubleConv::new(in_channels, out_channels, eps, vb.pp("conv"))?,
        })
    }
}

impl ModuleT for DownBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let pooled = xs.max_pool2d(2)?;
        self.conv.forward_t(&pooled, train)
    }
}

/// Decoder level: nearest x2 upsampling, skip concatenation, DoubleConv
pub struct UpBlock {
    conv: DoubleConv,
}

impl UpBlock {
    /// # Arguments
    /// * `in_channels` - Channels coming up from the deeper level
    /// * `skip_channels` - Channels of the matching encoder output
    /// * `out_channels` - Output feature channels
    pub fn new(
        in_channels: usize,
        skip_channels: usize,
        out_channels: usize,
        eps: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            conv: DoubleConv::new(in_channels + skip_channels, out_channels, eps, vb.pp("conv"))?,
        })
    }

    pub fn forward_t(&self, xs: &Tensor, skip: &Tensor, train: bool) -> Result<Tensor> {
        let (_, _, h, w) = xs.dims4()?;
        let up = xs.upsample_nearest2d(h * 2, w * 2)?;

        let (_, _, skip_h, skip_w) = skip.dims4()?;
        if (skip_h, skip_w) != (h * 2, w * 2) {
            return Err(candle_core::Error::Msg(format!(
                "Skip connection is {}x{} but upsampled features are {}x{}",
                skip_h,
                skip_w,
                h * 2,
                w * 2
            )));
        }

        let merged = Tensor::cat(&[skip, &up], 1)?;
        self.conv.forward_t(&merged, train)
    }
}
