/// Neural network layer primitives
///
/// Building blocks for the U-Net:
/// - DoubleConv: (3x3 conv, batch norm, ReLU) twice
/// - DownBlock: max pooling followed by DoubleConv
/// - UpBlock: upsampling, skip concatenation, DoubleConv

pub mod conv;

pub use conv::{DoubleConv, DownBlock, UpBlock};
