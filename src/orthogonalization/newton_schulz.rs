use ndarray::{Array2, ArrayView2, Zip};

use super::precision::{quantize, round_bf16};

/// Coefficients `(a, b, c)` of the quintic `a·x + b·x³ + c·x⁵` applied to the singular values.
pub const NS_COEFFS: (f32, f32, f32) = (3.4445, -4.7750, 2.0315);

/// Added to the norm so a zero matrix normalizes to zero instead of NaN.
pub const NS_EPS: f32 = 1e-7;

/// Approximates the nearest orthogonal matrix to `g` (its zeroth power).
///
/// Runs exactly `steps` quintic Newton-Schulz iterations at `bf16` precision,
/// there is no convergence check. The singular values of the result don't
/// land exactly on 1, they oscillate in a band around it, which is enough
/// for an optimizer update.
///
/// # Arguments
/// * `g` - The matrix to orthogonalize.
/// * `steps` - The amount of iterations.
///
/// # Returns
/// A matrix with the shape of `g`.
pub fn newton_schulz5(g: ArrayView2<f32>, steps: usize) -> Array2<f32> {
    let (a, b, c) = NS_COEFFS;

    // Iterate on the wide orientation, the gram matrix is the smaller one.
    let transposed = g.nrows() > g.ncols();
    let mut x = if transposed {
        g.t().as_standard_layout().into_owned()
    } else {
        g.as_standard_layout().into_owned()
    };
    quantize(&mut x);

    // The Frobenius norm bounds the spectral norm, so every singular value starts at most 1.
    let norm = round_bf16(x.iter().map(|v| v * v).sum::<f32>().sqrt());
    let denom = round_bf16(norm + NS_EPS);
    x.mapv_inplace(|v| round_bf16(v / denom));

    for _ in 0..steps {
        let mut gram = x.dot(&x.t());
        quantize(&mut gram);

        let mut gram_sq = gram.dot(&gram);
        quantize(&mut gram_sq);

        Zip::from(&mut gram)
            .and(&gram_sq)
            .for_each(|p, &q| *p = round_bf16(round_bf16(b * *p) + round_bf16(c * q)));

        let mut next = gram.dot(&x);
        Zip::from(&mut next)
            .and(&x)
            .for_each(|n, &v| *n = round_bf16(round_bf16(a * v) + round_bf16(*n)));

        x = next;
    }

    if transposed { x.reversed_axes() } else { x }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, array};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::test_utils::{random_matrix, singular_values};

    fn hadamard(order: u32) -> Array2<f32> {
        let n = 1usize << order;
        let scale = 1. / (n as f32).sqrt();
        Array2::from_shape_fn((n, n), |(i, j)| {
            if (i & j).count_ones() % 2 == 0 { scale } else { -scale }
        })
    }

    fn relative_err(got: &Array2<f32>, expected: &Array2<f32>) -> f32 {
        let diff: f32 = (got - expected).iter().map(|v| v * v).sum::<f32>().sqrt();
        let norm: f32 = expected.iter().map(|v| v * v).sum::<f32>().sqrt();
        diff / norm
    }

    #[test]
    fn random_square_matrices_come_out_near_orthogonal() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut checked = 0;

        while checked < 12 {
            let n = [4, 8, 16][checked % 3];
            let g = random_matrix(&mut rng, n, n);

            // Skip the rare nearly-singular draws, five iterations can't lift them into the band.
            let sv = singular_values(g.view());
            if sv[n - 1] / sv[0] > 50. {
                continue;
            }

            let x = newton_schulz5(g.view(), 5);
            for s in singular_values(x.view()) {
                assert!((0.6..1.3).contains(&s), "singular value {s} for a {n}x{n} input");
            }

            checked += 1;
        }
    }

    #[test]
    fn orthogonal_input_is_nearly_a_fixed_point() {
        // Normalizing an n×n orthogonal matrix leaves singular values of 1/√n,
        // for these orders five iterations bring them back close to 1.
        for order in [3, 5] {
            let h = hadamard(order);
            let x = newton_schulz5(h.view(), 5);
            let err = relative_err(&x, &h);
            assert!(err < 0.1, "relative error {err} for order {order}");
        }
    }

    #[test]
    fn shape_is_kept_for_tall_and_wide_inputs() {
        let mut rng = StdRng::seed_from_u64(7);
        for (rows, cols) in [(3, 9), (9, 3), (5, 5), (1, 6), (6, 1)] {
            let g = random_matrix(&mut rng, rows, cols);
            assert_eq!(newton_schulz5(g.view(), 5).dim(), (rows, cols));
        }
    }

    #[test]
    fn tall_path_matches_transposed_wide_path_exactly() {
        let mut rng = StdRng::seed_from_u64(3);
        let wide = random_matrix(&mut rng, 6, 20);
        let tall = wide.t().to_owned();

        let direct = newton_schulz5(wide.view(), 5);
        let via_tall = newton_schulz5(tall.view(), 5);

        assert_eq!(via_tall.dim(), (20, 6));
        assert_eq!(direct.t(), via_tall);
    }

    #[test]
    fn wide_outputs_have_near_orthonormal_rows() {
        let mut rng = StdRng::seed_from_u64(11);
        let g = random_matrix(&mut rng, 8, 32);

        let x = newton_schulz5(g.view(), 5);
        for s in singular_values(x.view()) {
            assert!((0.6..1.3).contains(&s), "singular value {s}");
        }
    }

    #[test]
    fn near_singular_matrix_is_lifted_toward_one() {
        let g = array![[3.0_f32, 0.0], [0.0, 0.001]];

        // After 5 iterations the small direction has grown by two orders of magnitude
        // but hasn't reached the band yet, a few more iterations put both inside it.
        let sv = singular_values(newton_schulz5(g.view(), 5).view());
        assert!(sv[0] > 0.1 && sv[0] < 0.3, "small singular value {}", sv[0]);
        assert!((0.6..1.3).contains(&sv[1]), "large singular value {}", sv[1]);

        let sv = singular_values(newton_schulz5(g.view(), 10).view());
        for s in sv {
            assert!((0.6..1.3).contains(&s), "singular value {s}");
        }
    }

    #[test]
    fn zero_matrix_stays_zero() {
        let g = Array2::<f32>::zeros((4, 3));
        let x = newton_schulz5(g.view(), 5);
        assert!(x.iter().all(|&v| v == 0.));
    }

    #[test]
    fn zero_steps_only_normalizes() {
        let g = array![[3.0_f32, 0.0], [0.0, 4.0]];
        let x = newton_schulz5(g.view(), 0);
        assert_eq!(x, array![[0.6015625, 0.0], [0.0, 0.80078125]]);
    }

    #[test]
    fn power_of_two_scaling_gives_identical_output() {
        let mut rng = StdRng::seed_from_u64(5);
        let g = random_matrix(&mut rng, 4, 8);
        let scaled = g.mapv(|v| v * 8.);

        assert_eq!(newton_schulz5(g.view(), 5), newton_schulz5(scaled.view(), 5));
    }
}
