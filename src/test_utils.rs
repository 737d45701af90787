#![cfg(test)]

use ndarray::{Array2, ArrayView2};
use rand::Rng;
use rand_distr::StandardNormal;

/// Samples a `rows × cols` matrix with standard normal entries.
pub(crate) fn random_matrix<R: Rng>(rng: &mut R, rows: usize, cols: usize) -> Array2<f32> {
    Array2::from_shape_simple_fn((rows, cols), || rng.sample(StandardNormal))
}

/// Returns the singular values of `m` in ascending order.
///
/// Diagonalizes the smaller gram matrix with cyclic Jacobi rotations in `f64`,
/// plenty for the small matrices the tests use.
pub(crate) fn singular_values(m: ArrayView2<f32>) -> Vec<f32> {
    let m = m.mapv(f64::from);
    let m = if m.nrows() > m.ncols() { m.reversed_axes() } else { m };
    let mut s = m.dot(&m.t());
    let n = s.nrows();

    for _ in 0..100 {
        let mut off = 0.;
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    off += s[[i, j]] * s[[i, j]];
                }
            }
        }

        if off < 1e-24 {
            break;
        }

        for p in 0..n {
            for q in p + 1..n {
                let apq = s[[p, q]];
                if apq.abs() < 1e-300 {
                    continue;
                }

                let theta = (s[[q, q]] - s[[p, p]]) / (2. * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.).sqrt());
                let c = 1. / (t * t + 1.).sqrt();
                let sn = t * c;

                for k in 0..n {
                    let (skp, skq) = (s[[k, p]], s[[k, q]]);
                    s[[k, p]] = c * skp - sn * skq;
                    s[[k, q]] = sn * skp + c * skq;
                }

                for k in 0..n {
                    let (spk, sqk) = (s[[p, k]], s[[q, k]]);
                    s[[p, k]] = c * spk - sn * sqk;
                    s[[q, k]] = sn * spk + c * sqk;
                }
            }
        }
    }

    let mut sv: Vec<f32> = (0..n).map(|i| s[[i, i]].max(0.).sqrt() as f32).collect();
    sv.sort_by(f32::total_cmp);
    sv
}

#[test]
fn singular_values_of_a_known_matrix() {
    let m = ndarray::array![[2.0_f32, 1.0], [1.0, 2.0]];
    let sv = singular_values(m.view());
    assert!((sv[0] - 1.).abs() < 1e-5);
    assert!((sv[1] - 3.).abs() < 1e-5);
}
