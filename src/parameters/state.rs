use ndarray::{ArrayD, IxDyn};

use super::ParamId;

/// The per-parameter momentum buffers of one optimizer instance.
///
/// Buffers are created lazily, zero filled, the first time their parameter is updated
/// by this instance. In the distributed variant that means each rank only ever holds
/// the buffers of the parameters it owns.
#[derive(Debug, Default)]
pub struct MomentumStore {
    buffers: Vec<Option<ArrayD<f32>>>,
}

impl MomentumStore {
    /// Creates an empty store with room for `params` buffers.
    pub fn new(params: usize) -> Self {
        Self {
            buffers: vec![None; params],
        }
    }

    /// Returns the buffer of `id` if it was already materialized.
    pub fn get(&self, id: ParamId) -> Option<&ArrayD<f32>> {
        self.buffers.get(id.index())?.as_ref()
    }

    /// Returns the buffer of `id`, creating a zero filled one of `shape` if absent.
    ///
    /// # Arguments
    /// * `id` - The parameter the buffer belongs to.
    /// * `shape` - The shape of the parameter.
    pub fn get_or_init(&mut self, id: ParamId, shape: &[usize]) -> &mut ArrayD<f32> {
        let index = id.index();
        if index >= self.buffers.len() {
            self.buffers.resize(index + 1, None);
        }

        self.buffers[index].get_or_insert_with(|| ArrayD::zeros(IxDyn(shape)))
    }

    /// The amount of materialized buffers.
    pub fn len(&self) -> usize {
        self.buffers.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The parameters holding a buffer, in index order.
    pub fn ids(&self) -> impl Iterator<Item = ParamId> + '_ {
        self.buffers
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_some())
            .map(|(i, _)| ParamId::new(i))
    }
}
