//! Newton-Schulz orthogonalization of gradient-shaped tensors.

mod newton_schulz;
mod precision;

use ndarray::{Array3, ArrayD, ArrayViewD, Axis, ErrorKind, Ix2, ShapeError};
use rayon::prelude::*;

use crate::Result;

pub use newton_schulz::{NS_COEFFS, NS_EPS, newton_schulz5};

/// Orthogonalizes the trailing two dimensions of `g`.
///
/// A vector is treated as a single row. Higher ranks are handled as a batch
/// of matrices over the leading dimensions, processed in parallel.
///
/// # Arguments
/// * `g` - A tensor with at least one dimension.
/// * `steps` - The amount of Newton-Schulz iterations.
///
/// # Returns
/// A tensor with the shape of `g`, or a `ShapeError` for scalars.
pub fn orthogonalize(g: ArrayViewD<f32>, steps: usize) -> Result<ArrayD<f32>> {
    let shape = g.shape().to_vec();

    match *shape.as_slice() {
        [] => Err(ShapeError::from_kind(ErrorKind::IncompatibleShape).into()),
        [n] => {
            let row = g.to_shape((1, n))?;
            let x = newton_schulz5(row.view(), steps);
            Ok(x.into_shape_with_order(shape)?)
        }
        [_, _] => {
            let m = g.into_dimensionality::<Ix2>()?;
            Ok(newton_schulz5(m, steps).into_dyn())
        }
        [ref leading @ .., rows, cols] => {
            let batch: usize = leading.iter().product();
            let stacked = g.to_shape((batch, rows, cols))?;
            let mut out = Array3::<f32>::zeros((batch, rows, cols));

            out.axis_iter_mut(Axis(0))
                .into_par_iter()
                .zip(stacked.axis_iter(Axis(0)).into_par_iter())
                .for_each(|(mut dst, src)| dst.assign(&newton_schulz5(src, steps)));

            Ok(out.into_shape_with_order(shape)?)
        }
    }
}

/// The learning rate multiplier for a `rows × cols` update.
///
/// Orthogonalized updates have singular values near 1 whatever their shape,
/// this rescales them by `max(1, rows / √cols)`. Only matrices with fewer rows
/// than `√cols` keep the plain learning rate, so wide matrices such as
/// `128 × 512` are scaled up as well.
pub fn aspect_ratio_scale(rows: usize, cols: usize) -> f32 {
    (rows as f32 / (cols as f32).sqrt()).max(1.)
}

/// Splits a shape into the `(rows, cols)` pair its updates are scaled by.
///
/// A vector counts as a single row.
pub(crate) fn matrix_dims(shape: &[usize]) -> (usize, usize) {
    match *shape {
        [] => (1, 1),
        [n] => (1, n),
        [.., rows, cols] => (rows, cols),
    }
}
