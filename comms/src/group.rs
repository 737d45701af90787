use crate::{Result, Work};

/// The reduction applied element-wise across ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Avg,
}

/// A fixed set of cooperating ranks able to run collectives.
///
/// Every call returns immediately with a `Work` handle, the data moves in the
/// background. All ranks must issue the same collectives in the same order,
/// implementations match calls by their per-rank issue order.
pub trait ProcessGroup: Send + Sync {
    /// Returns the index of this rank within the group.
    fn rank(&self) -> usize;

    /// Returns the amount of ranks in the group.
    fn world_size(&self) -> usize;

    /// Reduces `inputs[r]` across every rank and hands rank `r` the result.
    ///
    /// # Arguments
    /// * `inputs` - Exactly `world_size` flat buffers of equal length.
    /// * `op` - The reduction to apply.
    ///
    /// # Returns
    /// A handle resolving to this rank's reduced slice, or an error if the
    /// inputs are malformed.
    fn reduce_scatter(&self, inputs: Vec<Vec<f32>>, op: ReduceOp) -> Result<Work<Vec<f32>>>;

    /// Shares `input` with every rank.
    ///
    /// # Arguments
    /// * `input` - This rank's contribution.
    ///
    /// # Returns
    /// A handle resolving to every rank's contribution, indexed by rank.
    fn all_gather(&self, input: Vec<f32>) -> Result<Work<Vec<Vec<f32>>>>;

    /// Tears the group down after a local failure.
    ///
    /// Peers waiting on calls this rank will never join, and every later call on
    /// any rank, fail with `CommsErr::Aborted`. Calling it again does nothing.
    fn abort(&self);
}
