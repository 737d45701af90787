use std::{collections::BTreeMap, ops::Deref, ops::Range};

use super::{ParamId, ParamRef};
use crate::{MuonConfig, MuonErr, Result};

/// A bucket of parameters sharing a classification key, updated with the same hyperparameters.
#[derive(Debug, Clone)]
pub struct ParamGroup<K> {
    key: K,
    params: Vec<ParamId>,
    config: MuonConfig,
}

impl<K: Copy> ParamGroup<K> {
    pub fn key(&self) -> K {
        self.key
    }

    /// The members of the group, in the order they were given to the optimizer.
    pub fn params(&self) -> &[ParamId] {
        &self.params
    }

    pub fn config(&self) -> &MuonConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// A group of equally shaped matrices, with the zero buffer that fills chunk slots no rank owns.
#[derive(Debug, Clone)]
pub struct ShapeGroup {
    group: ParamGroup<(usize, usize)>,
    padding: Vec<f32>,
}

impl ShapeGroup {
    pub fn padding(&self) -> &[f32] {
        &self.padding
    }
}

impl Deref for ShapeGroup {
    type Target = ParamGroup<(usize, usize)>;

    fn deref(&self) -> &Self::Target {
        &self.group
    }
}

/// Buckets the parameters by element count, smallest first.
///
/// # Arguments
/// * `params` - The parameters of the optimizer.
/// * `config` - The hyperparameters every group starts with.
///
/// # Returns
/// One group per distinct element count.
pub fn group_by_numel(params: &[ParamRef], config: MuonConfig) -> Vec<ParamGroup<usize>> {
    let mut buckets: BTreeMap<usize, Vec<ParamId>> = BTreeMap::new();
    for (i, param) in params.iter().enumerate() {
        let numel = param.read().numel();
        buckets.entry(numel).or_default().push(ParamId::new(i));
    }

    buckets
        .into_iter()
        .map(|(key, params)| ParamGroup {
            key,
            params,
            config,
        })
        .collect()
}

/// Buckets the matrices by exact shape, ordered lexicographically by `(rows, cols)`.
///
/// # Arguments
/// * `params` - The parameters of the optimizer, all of them matrices.
/// * `config` - The hyperparameters every group starts with.
///
/// # Returns
/// One group per distinct shape, or `MuonErr::RankMismatch` for the first parameter
/// that isn't 2-dimensional.
pub fn group_by_shape(params: &[ParamRef], config: MuonConfig) -> Result<Vec<ShapeGroup>> {
    let mut buckets: BTreeMap<(usize, usize), Vec<ParamId>> = BTreeMap::new();
    for (i, param) in params.iter().enumerate() {
        let param = param.read();
        let &[rows, cols] = param.shape() else {
            return Err(MuonErr::RankMismatch {
                param: i,
                got: param.ndim(),
                expected: 2,
            });
        };

        buckets.entry((rows, cols)).or_default().push(ParamId::new(i));
    }

    let groups = buckets
        .into_iter()
        .map(|((rows, cols), params)| ShapeGroup {
            group: ParamGroup {
                key: (rows, cols),
                params,
                config,
            },
            padding: vec![0.; rows * cols],
        })
        .collect();

    Ok(groups)
}

/// A window of at most `world_size` consecutive group members, processed by one collective pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Index of the first member inside the group.
    pub base: usize,
    /// Amount of real members, the remaining slots up to `world_size` are padding.
    pub len: usize,
}

impl Chunk {
    /// The group indices of the real members.
    pub fn range(&self) -> Range<usize> {
        self.base..self.base + self.len
    }

    /// The amount of padding slots needed to give every rank one slot.
    pub fn padding(&self, world_size: usize) -> usize {
        world_size.saturating_sub(self.len)
    }

    /// The group index updated by `rank`, `None` if its slot is padding.
    pub fn owned_slot(&self, rank: usize) -> Option<usize> {
        (rank < self.len).then_some(self.base + rank)
    }
}

/// Splits a group of `len` members into consecutive chunks of `world_size` slots.
///
/// # Arguments
/// * `len` - The amount of members in the group.
/// * `world_size` - The amount of participating ranks, must be positive.
pub fn chunks(len: usize, world_size: usize) -> impl Iterator<Item = Chunk> {
    let step = world_size.max(1);
    (0..len).step_by(step).map(move |base| Chunk {
        base,
        len: step.min(len - base),
    })
}

/// The rank that updates the member at `index` inside its group.
pub fn owner_of(index: usize, world_size: usize) -> usize {
    index % world_size.max(1)
}
