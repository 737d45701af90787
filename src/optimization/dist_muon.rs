use std::iter;

use comms::{CommsErr, ProcessGroup, ReduceOp, wait_all};
use log::{debug, info, trace, warn};
use ndarray::ArrayD;

use super::{Optimizer, update::apply_update};
use crate::{
    MuonConfig, MuonErr, Result,
    parameters::{
        Chunk, MomentumStore, ParamId, ParamRef, ShapeGroup, check_grads, chunks,
        group_by_shape, validate_params,
    },
};

/// The distributed Muon optimizer.
///
/// Every rank holds a full replica of the parameters. Matrices are grouped by shape and
/// each group is walked in chunks of `world_size` members. Within a chunk the gradients
/// are averaged with a reduce-scatter, the member at slot `rank` is updated by this rank
/// alone and the result is all-gathered back into every replica.
pub struct DistMuon<G> {
    params: Vec<ParamRef>,
    groups: Vec<ShapeGroup>,
    momentum: MomentumStore,
    config: MuonConfig,
    pg: G,
}

impl<G: ProcessGroup> DistMuon<G> {
    /// Creates a new `DistMuon` optimizer.
    ///
    /// Every rank must build it with the same parameter list, in the same order.
    ///
    /// # Arguments
    /// * `params` - The replicated matrices to optimize.
    /// * `config` - The hyperparameters of every group.
    /// * `pg` - The process group this rank collaborates through.
    ///
    /// # Returns
    /// A new `DistMuon` instance, or an error if the config is invalid or some parameter
    /// isn't a matrix.
    pub fn new(params: Vec<ParamRef>, config: MuonConfig, pg: G) -> Result<Self> {
        config.validate()?;
        validate_params(&params)?;
        if pg.world_size() == 0 {
            return Err(CommsErr::InvalidWorldSize.into());
        }

        let groups = group_by_shape(&params, config)?;
        if pg.rank() == 0 {
            for group in &groups {
                let (rows, cols) = group.key();
                info!(rows, cols, params = group.len(); "muon: registered parameter group");
            }
        }

        Ok(Self {
            momentum: MomentumStore::new(params.len()),
            params,
            groups,
            config,
            pg,
        })
    }

    /// Averages the gradients across ranks and updates every replica.
    ///
    /// All ranks must call it the same number of times, with a gradient attached to every
    /// parameter. When it returns successfully the replicas are identical on every rank.
    ///
    /// Any failure aborts the process group, so peers blocked on this rank fail
    /// with `CommsErr::Aborted` instead of waiting forever.
    ///
    /// # Returns
    /// `MuonErr::MissingGrad` before any collective is issued if a gradient is absent,
    /// or `MuonErr::Comms` if a collective fails.
    pub async fn step(&mut self) -> Result<()> {
        let result = self.try_step().await;
        if let Err(e) = &result {
            warn!(rank = self.pg.rank(); "muon: step failed, aborting the process group: {e}");
            self.pg.abort();
        }

        result
    }

    async fn try_step(&mut self) -> Result<()> {
        check_grads(&self.params)?;

        let rank = self.pg.rank();
        let world_size = self.pg.world_size();
        let plan: Vec<(usize, Chunk)> = self
            .groups
            .iter()
            .enumerate()
            .flat_map(|(g, group)| chunks(group.len(), world_size).map(move |c| (g, c)))
            .collect();

        let mut reductions = Vec::with_capacity(plan.len());
        for &(g, chunk) in &plan {
            let inputs = self.chunk_grads(&self.groups[g], chunk, world_size)?;
            reductions.push(self.pg.reduce_scatter(inputs, ReduceOp::Avg)?);
        }
        trace!(rank, chunks = plan.len(); "muon: reduce-scatters issued");

        let mut gathers = Vec::with_capacity(plan.len());
        for (&(g, chunk), work) in plan.iter().zip(reductions) {
            let averaged = work.wait().await?;
            let group = &self.groups[g];

            let input = match chunk.owned_slot(rank) {
                Some(slot) => {
                    let id = group.params()[slot];
                    trace!(rank, param = id.index(); "muon: updating owned parameter");
                    update_owned(
                        &self.params[id.index()],
                        id,
                        &mut self.momentum,
                        group.config(),
                        averaged,
                    )?
                }
                None => group.padding().to_vec(),
            };

            gathers.push(self.pg.all_gather(input)?);
        }

        let gathered = wait_all(gathers).await?;
        for (&(g, chunk), slices) in plan.iter().zip(gathered) {
            let members = &self.groups[g].params()[chunk.range()];
            for (&id, data) in members.iter().zip(&slices) {
                self.params[id.index()].write().load_flat(data)?;
            }
        }

        debug!(rank, world_size, groups = self.groups.len(); "muon: distributed step applied");
        Ok(())
    }

    /// Collects the flattened gradients of a chunk, padded to one input per rank.
    fn chunk_grads(&self, group: &ShapeGroup, chunk: Chunk, world_size: usize) -> Result<Vec<Vec<f32>>> {
        let mut inputs = Vec::with_capacity(world_size);
        for &id in &group.params()[chunk.range()] {
            let grad = self.params[id.index()]
                .read()
                .grad_flat()
                .ok_or(MuonErr::MissingGrad { param: id.index() })?;
            inputs.push(grad);
        }

        inputs.extend(iter::repeat_n(group.padding(), chunk.padding(world_size)).map(<[f32]>::to_vec));
        Ok(inputs)
    }

    pub fn rank(&self) -> usize {
        self.pg.rank()
    }

    pub fn world_size(&self) -> usize {
        self.pg.world_size()
    }

    pub fn params(&self) -> &[ParamRef] {
        &self.params
    }

    pub fn param_groups(&self) -> &[ShapeGroup] {
        &self.groups
    }

    /// The momentum buffer of `id`, present only once this rank has updated it.
    pub fn momentum(&self, id: ParamId) -> Option<&ArrayD<f32>> {
        self.momentum.get(id)
    }

    pub fn momentum_store(&self) -> &MomentumStore {
        &self.momentum
    }

    pub fn config(&self) -> &MuonConfig {
        &self.config
    }
}

/// Writes the averaged gradient into an owned parameter and updates it.
///
/// # Returns
/// The updated value, flattened for the all-gather.
fn update_owned(
    param: &ParamRef,
    id: ParamId,
    momentum: &mut MomentumStore,
    config: &MuonConfig,
    averaged: Vec<f32>,
) -> Result<Vec<f32>> {
    let mut param = param.write();
    param.set_grad_flat(averaged)?;

    let (value, grad) = param.split_mut();
    let grad = grad.ok_or(MuonErr::MissingGrad { param: id.index() })?;
    let buf = momentum.get_or_init(id, value.shape());
    apply_update(config, buf, grad.view(), value)?;

    Ok(param.value_flat())
}

impl<G: ProcessGroup> Optimizer for DistMuon<G> {
    async fn step(&mut self) -> Result<()> {
        DistMuon::step(self).await
    }
}
