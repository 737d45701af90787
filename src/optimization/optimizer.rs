use crate::Result;

/// Applies one update to every parameter an optimizer was built with.
///
/// Both Muon variants implement it, so training loops can drive either one the same way.
#[allow(unused)]
#[trait_variant::make(Optimizer: Send)]
pub trait OptimizerTemplate {
    /// Should consume the gradients currently attached to the parameters and update them in place.
    ///
    /// # Returns
    /// An error if a precondition fails, in which case no parameter or buffer was modified,
    /// or if a collective fails midway.
    async fn step(&mut self) -> Result<()>;
}
