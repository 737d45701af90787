use std::env;

use anyhow::{Context, Result, bail};
use comms::{LocalGroup, ProcessGroup};
use futures::future::try_join_all;
use log::info;
use muon::{DistMuon, MuonConfig, Optimizer, Param, ParamRef};
use ndarray::{Array2, Ix2};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_STEPS: usize = 100;
const BATCH_SIZE: usize = 32;
const LOG_EVERY: usize = 10;

const PARAM_SEED: u64 = 7;
const TARGET_SEED: u64 = 11;
const DATA_SEED: u64 = 1000;

/// One linear regression per weight matrix, two of them sharing a shape.
const SHAPES: [(usize, usize); 3] = [(16, 8), (16, 8), (8, 4)];

fn env_or(name: &str, default: usize) -> Result<usize> {
    match env::var(name) {
        Ok(v) => v
            .parse()
            .with_context(|| format!("{name} must be a non negative integer, got {v:?}")),
        Err(_) => Ok(default),
    }
}

fn random_matrix(rng: &mut StdRng, (rows, cols): (usize, usize), std: f32) -> Array2<f32> {
    Array2::from_shape_simple_fn((rows, cols), || std * rng.sample::<f32, _>(StandardNormal))
}

/// Builds the weights from a fixed seed, so every rank starts from the same replica.
fn init_params() -> Vec<ParamRef> {
    let mut rng = StdRng::seed_from_u64(PARAM_SEED);
    SHAPES
        .iter()
        .map(|&shape| Param::shared(random_matrix(&mut rng, shape, 0.1)))
        .collect()
}

fn targets() -> Vec<Array2<f32>> {
    let mut rng = StdRng::seed_from_u64(TARGET_SEED);
    SHAPES
        .iter()
        .map(|&shape| random_matrix(&mut rng, shape, 1.))
        .collect()
}

/// Samples a fresh batch for every regression and attaches the mean squared error gradient.
///
/// # Returns
/// The summed loss of the batch.
fn attach_grads(params: &[ParamRef], targets: &[Array2<f32>], rng: &mut StdRng) -> Result<f32> {
    let mut loss = 0.;
    for (param, target) in params.iter().zip(targets) {
        let mut param = param.write();
        let x = random_matrix(rng, (BATCH_SIZE, target.nrows()), 1.);

        let w = param.value().view().into_dimensionality::<Ix2>()?;
        let residual = x.dot(&w) - x.dot(target);
        loss += residual.mapv(|r| r * r).sum() / BATCH_SIZE as f32;

        let grad = x.t().dot(&residual) * (2. / BATCH_SIZE as f32);
        param.set_grad(grad)?;
    }

    Ok(loss)
}

async fn train<O: Optimizer + Send>(
    opt: &mut O,
    params: &[ParamRef],
    rng: &mut StdRng,
    rank: usize,
    steps: usize,
) -> Result<()> {
    let targets = targets();

    for step in 0..steps {
        let loss = attach_grads(params, &targets, rng)?;
        opt.step().await?;

        if rank == 0 && (step % LOG_EVERY == 0 || step + 1 == steps) {
            info!(step, loss; "demo: training");
        }
    }

    Ok(())
}

async fn run_worker(pg: LocalGroup, config: MuonConfig, steps: usize) -> Result<Vec<Vec<f32>>> {
    let rank = pg.rank();
    let params = init_params();
    let mut rng = StdRng::seed_from_u64(DATA_SEED + rank as u64);

    let mut opt = DistMuon::new(params.clone(), config, pg)?;
    train(&mut opt, &params, &mut rng, rank, steps).await?;

    let replica = params
        .iter()
        .map(|p| p.read().value().iter().copied().collect())
        .collect();

    Ok(replica)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let workers = env_or("WORKERS", DEFAULT_WORKERS)?;
    let steps = env_or("STEPS", DEFAULT_STEPS)?;
    if workers == 0 {
        bail!("WORKERS must be positive");
    }

    let config = match env::args().nth(1) {
        Some(path) => MuonConfig::from_json_file(&path)?,
        None => MuonConfig::default(),
    };
    info!(workers, steps; "demo: starting with {config:?}");

    let handles = LocalGroup::new_group(workers)?
        .into_iter()
        .map(|pg| tokio::spawn(run_worker(pg, config, steps)));

    let replicas = try_join_all(handles)
        .await?
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    let (first, rest) = replicas.split_first().context("no replica was trained")?;
    if rest.iter().any(|replica| replica != first) {
        bail!("replicas diverged after {steps} steps");
    }

    info!("demo: {} replicas identical after {steps} steps", replicas.len());
    Ok(())
}
