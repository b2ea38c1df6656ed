/// Class-weighted pixel-wise cross-entropy
use candle_core::{DType, Result, Tensor};
use candle_nn::ops;

/// Weighted cross-entropy with mean reduction
///
/// `loss = sum_i w[y_i] * -log softmax(x_i)[y_i] / sum_i w[y_i]`
///
/// # Arguments
/// * `logits` - Class scores [batch, num_classes, H, W]
/// * `targets` - Class IDs [batch, H, W]
/// * `weights` - Per-class weights [num_classes]
///
/// # Returns
/// Scalar loss tensor
pub fn weighted_cross_entropy(logits: &Tensor, targets: &Tensor, weights: &Tensor) -> Result<Tensor> {
    let (batch, num_classes, height, width) = logits.dims4()?;

    if targets.dims() != &[batch, height, width] {
        return Err(candle_core::Error::Msg(format!(
            "targets shape {:?} does not match logits {:?}",
            targets.dims(),
            logits.dims()
        )));
    }
    if weights.dims() != &[num_classes] {
        return Err(candle_core::Error::Msg(format!(
            "expected {} class weights, got {:?}",
            num_classes,
            weights.dims()
        )));
    }

    // Log-probabilities per pixel: [pixels, classes]
    let log_probs = ops::log_softmax(logits, 1)?
        .permute((0, 2, 3, 1))?
        .reshape((batch * height * width, num_classes))?;

    let targets = targets.flatten_all()?.to_dtype(DType::U32)?;

    let picked = log_probs
        .gather(&targets.unsqueeze(1)?, 1)?
        .squeeze(1)?;

    let pixel_weights = weights.to_dtype(picked.dtype())?.index_select(&targets, 0)?;

    let weighted_nll = (picked * &pixel_weights)?.sum_all()?.neg()?;
    weighted_nll / pixel_weights.sum_all()?
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_uniform_logits_give_log_num_classes() -> Result<()> {
        let device = Device::Cpu;
        let logits = Tensor::zeros((2, 4, 3, 3), DType::F32, &device)?;
        let targets = Tensor::zeros((2, 3, 3), DType::U32, &device)?;
        let weights = Tensor::new(&[1f32, 2.0, 3.0, 4.0], &device)?;

        let loss = weighted_cross_entropy(&logits, &targets, &weights)?.to_scalar::<f32>()?;
        assert!((loss - (4f32).ln()).abs() < 1e-5);

        Ok(())
    }

    #[test]
    fn test_matches_hand_computed_weighted_mean() -> Result<()> {
        let device = Device::Cpu;
        // One image, two classes, two pixels: logits per pixel [2, 0] and [0, 0]
        let logits = Tensor::new(&[[[[2f32, 0.0]], [[0.0, 0.0]]]], &device)?;
        let targets = Tensor::new(&[[[0u32, 1]]], &device)?;
        let weights = Tensor::new(&[1f32, 3.0], &device)?;

        let loss = weighted_cross_entropy(&logits, &targets, &weights)?.to_scalar::<f32>()?;

        let nll0 = -(2f32.exp() / (2f32.exp() + 1.0)).ln();
        let nll1 = -(0.5f32).ln();
        let expected = (1.0 * nll0 + 3.0 * nll1) / 4.0;
        assert!((loss - expected).abs() < 1e-5);

        Ok(())
    }

    #[test]
    fn test_gradient_flows_to_logits() -> Result<()> {
        let device = Device::Cpu;
        let logits = candle_core::Var::randn(0f32, 1.0, (1, 3, 2, 2), &device)?;
        let targets = Tensor::new(&[[[0u32, 1], [2, 1]]], &device)?;
        let weights = Tensor::new(&[1f32, 1.0, 1.0], &device)?;

        let loss = weighted_cross_entropy(logits.as_tensor(), &targets, &weights)?;
        let grads = loss.backward()?;

        let grad = grads.get(logits.as_tensor()).expect("gradient for logits");
        assert_eq!(grad.dims(), &[1, 3, 2, 2]);

        Ok(())
    }

    #[test]
    fn test_shape_mismatch_is_error() -> Result<()> {
        let device = Device::Cpu;
        let logits = Tensor::zeros((1, 2, 2, 2), DType::F32, &device)?;
        let targets = Tensor::zeros((1, 3, 2), DType::U32, &device)?;
        let weights = Tensor::new(&[1f32, 1.0], &device)?;

        assert!(weighted_cross_entropy(&logits, &targets, &weights).is_err());

        Ok(())
    }
}
