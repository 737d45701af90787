//! Collective communication seam for sharded optimizers.
//!
//! A `ProcessGroup` schedules reduce-scatter and all-gather calls without
//! blocking, handing back `Work` handles that are awaited later. `LocalGroup`
//! is an in-process implementation where every rank shares one address space.

mod error;
mod group;
mod local;
mod work;

pub use error::{CommsErr, Result};
pub use group::{ProcessGroup, ReduceOp};
pub use local::LocalGroup;
pub use work::{Work, wait_all};
