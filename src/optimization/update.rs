use ndarray::{ArrayD, ArrayViewD, Zip};

use crate::{
    MuonConfig, Result,
    orthogonalization::{aspect_ratio_scale, matrix_dims, orthogonalize},
};

/// Applies the Muon update to a single parameter.
///
/// The buffer always accumulates `buf = momentum * buf + (1 - momentum) * grad`. The value
/// that gets orthogonalized is the buffer itself, or with `nesterov` the fresh gradient
/// blended with the updated buffer. The parameter then moves by `-lr * scale * ortho`.
///
/// # Arguments
/// * `config` - The hyperparameters of the parameter's group.
/// * `buf` - The momentum buffer of the parameter.
/// * `grad` - The gradient, averaged across ranks in the distributed variant.
/// * `value` - The parameter to update.
pub(crate) fn apply_update(
    config: &MuonConfig,
    buf: &mut ArrayD<f32>,
    grad: ArrayViewD<f32>,
    value: &mut ArrayD<f32>,
) -> Result<()> {
    let mu = config.momentum;

    Zip::from(&mut *buf)
        .and(&grad)
        .for_each(|b, &g| *b = *b * mu + g * (1. - mu));

    let update = if config.nesterov {
        Zip::from(&grad)
            .and(&*buf)
            .map_collect(|&g, &b| g * (1. - mu) + b * mu)
    } else {
        buf.clone()
    };

    let ortho = orthogonalize(update.view(), config.ns_steps.get())?;
    let (rows, cols) = matrix_dims(value.shape());
    let alpha = -config.lr * aspect_ratio_scale(rows, cols);
    value.scaled_add(alpha, &ortho);

    Ok(())
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, array};

    use super::*;

    fn config(momentum: f32, nesterov: bool) -> MuonConfig {
        MuonConfig::default()
            .with_lr(0.1)
            .with_momentum(momentum)
            .with_nesterov(nesterov)
    }

    #[test]
    fn first_step_fills_the_buffer_with_the_damped_gradient() {
        let grad = array![[0.5_f32, -1.0], [2.0, 0.25]].into_dyn();
        let mut buf = ArrayD::zeros(grad.raw_dim());
        let mut value = ArrayD::zeros(grad.raw_dim());

        apply_update(&config(0.9, true), &mut buf, grad.view(), &mut value).unwrap();

        let expected = grad.mapv(|g| g * (1. - 0.9_f32));
        assert_eq!(buf, expected);
    }

    #[test]
    fn plain_momentum_orthogonalizes_the_buffer() {
        let grad = array![[1.0_f32, 2.0], [3.0, -1.0]].into_dyn();
        let mut buf = array![[0.5_f32, 0.0], [0.0, 0.5]].into_dyn();
        let mut value = ArrayD::zeros(grad.raw_dim());
        let cfg = config(0.5, false);

        apply_update(&cfg, &mut buf, grad.view(), &mut value).unwrap();

        let ortho = orthogonalize(buf.view(), cfg.ns_steps.get()).unwrap();
        let alpha = -cfg.lr * aspect_ratio_scale(2, 2);
        assert_eq!(value, ortho.mapv(|o| 0. + alpha * o));
    }

    #[test]
    fn nesterov_blends_gradient_and_buffer() {
        let grad = array![[1.0_f32, 2.0], [3.0, -1.0]].into_dyn();
        let mut buf = array![[0.5_f32, 0.0], [0.0, 0.5]].into_dyn();
        let mut value = ArrayD::zeros(grad.raw_dim());
        let cfg = config(0.5, true);

        apply_update(&cfg, &mut buf, grad.view(), &mut value).unwrap();

        let blended = Zip::from(&grad)
            .and(&buf)
            .map_collect(|&g, &b| g * 0.5 + b * 0.5);
        let ortho = orthogonalize(blended.view(), cfg.ns_steps.get()).unwrap();
        let alpha = -cfg.lr * aspect_ratio_scale(2, 2);
        assert_eq!(value, ortho.mapv(|o| 0. + alpha * o));
    }

    #[test]
    fn tall_matrices_take_bigger_steps() {
        let grad = Array2::<f32>::from_shape_fn((8, 2), |(i, j)| (i * 2 + j) as f32 - 7.5).into_dyn();
        let mut buf = ArrayD::zeros(grad.raw_dim());
        let mut value = ArrayD::zeros(grad.raw_dim());
        let cfg = config(0.0, false);

        apply_update(&cfg, &mut buf, grad.view(), &mut value).unwrap();

        let ortho = orthogonalize(grad.view(), cfg.ns_steps.get()).unwrap();
        let scale = aspect_ratio_scale(8, 2);
        assert!(scale > 5.6 && scale < 5.7);
        let alpha = -cfg.lr * scale;
        assert_eq!(value, ortho.mapv(|o| 0. + alpha * o));
    }

    #[test]
    fn vectors_are_updated_as_row_matrices() {
        let grad = array![3.0_f32, 4.0].into_dyn();
        let mut buf = ArrayD::zeros(grad.raw_dim());
        let mut value = array![1.0_f32, 1.0].into_dyn();

        apply_update(&config(0.0, false), &mut buf, grad.view(), &mut value).unwrap();

        assert_eq!(value.shape(), &[2]);
        assert!(value[0] < 1.0 && value[1] < 1.0);
        assert!(value[1] < value[0]);
    }
}
