use log::{debug, info};
use ndarray::ArrayD;

use super::{Optimizer, update::apply_update};
use crate::{
    MuonConfig, MuonErr, Result,
    parameters::{
        MomentumStore, ParamGroup, ParamId, ParamRef, check_grads, group_by_numel,
        validate_params,
    },
};

/// The single worker Muon optimizer.
///
/// Parameters are grouped by element count and updated group by group, each one
/// with its own lazily created momentum buffer.
#[derive(Debug)]
pub struct Muon {
    params: Vec<ParamRef>,
    groups: Vec<ParamGroup<usize>>,
    momentum: MomentumStore,
    config: MuonConfig,
}

impl Muon {
    /// Creates a new `Muon` optimizer.
    ///
    /// # Arguments
    /// * `params` - The parameters to optimize, each of them at least 1-dimensional and passed once.
    /// * `config` - The hyperparameters of every group.
    ///
    /// # Returns
    /// A new `Muon` instance or an error if the config or the parameter list is invalid.
    pub fn new(params: Vec<ParamRef>, config: MuonConfig) -> Result<Self> {
        config.validate()?;
        validate_params(&params)?;

        let groups = group_by_numel(&params, config);
        for group in &groups {
            info!(numel = group.key(), params = group.len(); "muon: registered parameter group");
        }

        Ok(Self {
            momentum: MomentumStore::new(params.len()),
            params,
            groups,
            config,
        })
    }

    /// Updates every parameter using its attached gradient.
    ///
    /// # Returns
    /// `MuonErr::MissingGrad` if any parameter lacks a gradient, in which case nothing was modified.
    pub fn step(&mut self) -> Result<()> {
        check_grads(&self.params)?;

        for group in &self.groups {
            for &id in group.params() {
                let mut param = self.params[id.index()].write();
                let (value, grad) = param.split_mut();
                let grad = grad.ok_or(MuonErr::MissingGrad { param: id.index() })?;

                let buf = self.momentum.get_or_init(id, value.shape());
                apply_update(group.config(), buf, grad.view(), value)?;
            }
        }

        debug!(groups = self.groups.len(), params = self.params.len(); "muon: step applied");
        Ok(())
    }

    pub fn params(&self) -> &[ParamRef] {
        &self.params
    }

    pub fn param_groups(&self) -> &[ParamGroup<usize>] {
        &self.groups
    }

    /// The momentum buffer of `id`, `None` before its first update.
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

impl Optimizer for Muon {
    async fn step(&mut self) -> Result<()> {
        Muon::step(self)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, Array2, array};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{Param, test_utils::random_matrix};

    fn params_with_grads(rng: &mut StdRng, shapes: &[(usize, usize)]) -> Vec<ParamRef> {
        shapes
            .iter()
            .map(|&(rows, cols)| {
                let param = Param::shared(random_matrix(rng, rows, cols));
                param
                    .write()
                    .set_grad(random_matrix(rng, rows, cols))
                    .unwrap();
                param
            })
            .collect()
    }

    #[test]
    fn invalid_construction_is_rejected() {
        assert!(matches!(
            Muon::new(vec![], MuonConfig::default()),
            Err(MuonErr::NoParams)
        ));

        let p = Param::shared(Array2::<f32>::zeros((2, 2)));
        assert!(matches!(
            Muon::new(vec![p.clone(), p.clone()], MuonConfig::default()),
            Err(MuonErr::DuplicateParam { .. })
        ));
        assert!(matches!(
            Muon::new(vec![p], MuonConfig::default().with_momentum(1.0)),
            Err(MuonErr::InvalidConfig(_))
        ));
    }

    #[test]
    fn step_moves_every_parameter() {
        let mut rng = StdRng::seed_from_u64(3);
        let params = params_with_grads(&mut rng, &[(4, 4), (2, 8), (3, 5)]);
        let before: Vec<_> = params.iter().map(|p| p.read().value().clone()).collect();

        let mut muon = Muon::new(params.clone(), MuonConfig::default()).unwrap();
        muon.step().unwrap();

        for (param, before) in params.iter().zip(&before) {
            assert_ne!(param.read().value(), before);
        }
        assert_eq!(muon.momentum_store().len(), 3);
    }

    #[test]
    fn missing_gradient_leaves_everything_untouched() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut params = params_with_grads(&mut rng, &[(3, 3), (3, 3)]);
        params.push(Param::shared(Array1::<f32>::ones(3)));
        let before: Vec<_> = params.iter().map(|p| p.read().value().clone()).collect();

        let mut muon = Muon::new(params.clone(), MuonConfig::default()).unwrap();
        let err = muon.step().unwrap_err();

        assert!(matches!(err, MuonErr::MissingGrad { param: 2 }));
        for (param, before) in params.iter().zip(&before) {
            assert_eq!(param.read().value(), before);
        }
        assert!(muon.momentum_store().is_empty());
    }

    #[test]
    fn first_step_buffer_is_the_damped_gradient() {
        let param = Param::shared(array![[1.0_f32, 0.0], [0.0, 1.0]]);
        let grad = array![[0.5_f32, -2.0], [1.0, 4.0]];
        param.write().set_grad(grad.clone()).unwrap();

        let config = MuonConfig::default().with_momentum(0.9);
        let mut muon = Muon::new(vec![param], config).unwrap();
        muon.step().unwrap();

        let buf = muon.momentum(ParamId::new(0)).unwrap();
        assert_eq!(buf, &grad.mapv(|g| g * (1. - 0.9_f32)).into_dyn());
    }

    #[test]
    fn grouping_does_not_change_the_result() {
        let mut rng = StdRng::seed_from_u64(5);
        let shapes = [(4, 4), (2, 8), (4, 4)];
        let params = params_with_grads(&mut rng, &shapes);
        let copies: Vec<_> = params
            .iter()
            .map(|p| std::sync::Arc::new(parking_lot::RwLock::new(p.read().clone())))
            .collect();

        let mut together = Muon::new(params.clone(), MuonConfig::default()).unwrap();
        together.step().unwrap();
        assert_eq!(together.param_groups().len(), 1);

        for copy in &copies {
            let mut alone = Muon::new(vec![copy.clone()], MuonConfig::default()).unwrap();
            alone.step().unwrap();
        }

        for (param, copy) in params.iter().zip(&copies) {
            assert_eq!(param.read().value(), copy.read().value());
        }
    }

    #[test]
    fn momentum_accumulates_across_steps() {
        let param = Param::shared(Array2::<f32>::zeros((2, 2)));
        let grad = array![[1.0_f32, 0.0], [0.0, 1.0]];
        param.write().set_grad(grad.clone()).unwrap();

        let config = MuonConfig::default().with_momentum(0.5);
        let mut muon = Muon::new(vec![param], config).unwrap();
        muon.step().unwrap();
        muon.step().unwrap();

        let buf = muon.momentum(ParamId::new(0)).unwrap();
        assert_eq!(buf, &grad.mapv(|g| g * 0.75).into_dyn());
    }

    #[tokio::test]
    async fn trait_step_matches_the_inherent_one() {
        let mut rng = StdRng::seed_from_u64(6);
        let params = params_with_grads(&mut rng, &[(3, 4)]);
        let copy = Param::shared(params[0].read().value().clone());
        copy.write()
            .set_grad(params[0].read().grad().unwrap().clone())
            .unwrap();

        let mut direct = Muon::new(params.clone(), MuonConfig::default()).unwrap();
        direct.step().unwrap();

        let mut dynamic = Muon::new(vec![copy.clone()], MuonConfig::default()).unwrap();
        Optimizer::step(&mut dynamic).await.unwrap();

        assert_eq!(params[0].read().value(), copy.read().value());
    }
}
