use half::bf16;
use ndarray::{ArrayBase, DataMut, Dimension};

/// Rounds `x` to the nearest value representable as a `bf16`.
pub(crate) fn round_bf16(x: f32) -> f32 {
    bf16::from_f32(x).to_f32()
}

/// Rounds every element of `a` in place to `bf16` precision.
///
/// Storage stays `f32` so products can accumulate at full precision and only
/// their results are rounded, which is how bf16 matrix multiplies behave.
pub(crate) fn quantize<S, D>(a: &mut ArrayBase<S, D>)
where
    S: DataMut<Elem = f32>,
    D: Dimension,
{
    a.mapv_inplace(round_bf16);
}
