mod dist_muon;
mod muon;
mod optimizer;
mod update;

pub use dist_muon::DistMuon;
pub use muon::Muon;
pub use optimizer::{Optimizer, OptimizerTemplate};
