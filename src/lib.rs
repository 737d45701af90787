//! The Muon optimizer: momentum SGD whose updates are orthogonalized with a Newton-Schulz
//! iteration before being applied.
//!
//! [`Muon`] updates every parameter on a single worker. [`DistMuon`] shares the work across
//! the ranks of a [`comms::ProcessGroup`], each rank updating a disjoint subset of the
//! parameters and gathering the rest from its peers.

mod config;
mod error;
pub mod optimization;
pub mod orthogonalization;
pub mod parameters;
mod test_utils;

pub use config::MuonConfig;
pub use error::{MuonErr, Result};
pub use optimization::{DistMuon, Muon, Optimizer};
pub use parameters::{MomentumStore, Param, ParamId, ParamRef};
