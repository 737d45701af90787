use std::{
    collections::HashMap,
    mem,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use log::{trace, warn};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{CommsErr, ProcessGroup, ReduceOp, Result, Work};

type Reply<T> = oneshot::Sender<Result<T>>;

/// One rank's side of a collective call.
enum Contribution {
    ReduceScatter {
        op: ReduceOp,
        inputs: Vec<Vec<f32>>,
        reply: Reply<Vec<f32>>,
    },
    AllGather {
        input: Vec<f32>,
        reply: Reply<Vec<Vec<f32>>>,
    },
    /// The call was malformed on this rank, it still takes part so its peers don't hang.
    Invalid(CommsErr),
}

impl Contribution {
    fn describe(&self) -> String {
        match self {
            Contribution::ReduceScatter { op, inputs, .. } => format!(
                "reduce-scatter({op:?}, numel={})",
                inputs.first().map_or(0, Vec::len)
            ),
            Contribution::AllGather { input, .. } => format!("all-gather(numel={})", input.len()),
            Contribution::Invalid(err) => format!("invalid call ({err})"),
        }
    }

    fn fail(self, err: CommsErr) {
        match self {
            Contribution::ReduceScatter { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Contribution::AllGather { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Contribution::Invalid(_) => {}
        }
    }
}

/// The accumulated contributions of a call, until every rank has joined.
enum State {
    ReduceScatter {
        op: ReduceOp,
        numel: usize,
        inputs: Vec<Option<Vec<Vec<f32>>>>,
        replies: Vec<Option<Reply<Vec<f32>>>>,
    },
    AllGather {
        numel: usize,
        inputs: Vec<Option<Vec<f32>>>,
        replies: Vec<Option<Reply<Vec<Vec<f32>>>>>,
    },
    Poisoned(CommsErr),
}

impl State {
    fn open(rank: usize, world_size: usize, contribution: Contribution) -> Self {
        match contribution {
            Contribution::ReduceScatter { op, inputs, reply } => {
                let numel = inputs.first().map_or(0, Vec::len);
                let mut state_inputs: Vec<_> = (0..world_size).map(|_| None).collect();
                let mut replies: Vec<_> = (0..world_size).map(|_| None).collect();
                state_inputs[rank] = Some(inputs);
                replies[rank] = Some(reply);

                State::ReduceScatter {
                    op,
                    numel,
                    inputs: state_inputs,
                    replies,
                }
            }
            Contribution::AllGather { input, reply } => {
                let numel = input.len();
                let mut inputs: Vec<_> = (0..world_size).map(|_| None).collect();
                let mut replies: Vec<_> = (0..world_size).map(|_| None).collect();
                inputs[rank] = Some(input);
                replies[rank] = Some(reply);

                State::AllGather {
                    numel,
                    inputs,
                    replies,
                }
            }
            Contribution::Invalid(err) => State::Poisoned(err),
        }
    }

    fn describe(&self) -> String {
        match self {
            State::ReduceScatter { op, numel, .. } => {
                format!("reduce-scatter({op:?}, numel={numel})")
            }
            State::AllGather { numel, .. } => format!("all-gather(numel={numel})"),
            State::Poisoned(err) => format!("failed call ({err})"),
        }
    }

    fn fail(self, err: CommsErr) {
        match self {
            State::ReduceScatter { replies, .. } => {
                for reply in replies.into_iter().flatten() {
                    let _ = reply.send(Err(err.clone()));
                }
            }
            State::AllGather { replies, .. } => {
                for reply in replies.into_iter().flatten() {
                    let _ = reply.send(Err(err.clone()));
                }
            }
            State::Poisoned(_) => {}
        }
    }

    /// Merges another rank's contribution, poisoning the call on any structural disagreement.
    fn join(self, seq: u64, rank: usize, contribution: Contribution) -> Self {
        match (self, contribution) {
            (State::Poisoned(err), contribution) => {
                contribution.fail(err.clone());
                State::Poisoned(err)
            }
            (state, Contribution::Invalid(err)) => {
                state.fail(err.clone());
                State::Poisoned(err)
            }
            (
                State::ReduceScatter {
                    op,
                    numel,
                    mut inputs,
                    mut replies,
                },
                Contribution::ReduceScatter {
                    op: their_op,
                    inputs: theirs,
                    reply,
                },
            ) if op == their_op && theirs.first().map_or(0, Vec::len) == numel => {
                inputs[rank] = Some(theirs);
                replies[rank] = Some(reply);
                State::ReduceScatter {
                    op,
                    numel,
                    inputs,
                    replies,
                }
            }
            (
                State::AllGather {
                    numel,
                    mut inputs,
                    mut replies,
                },
                Contribution::AllGather { input, reply },
            ) if input.len() == numel => {
                inputs[rank] = Some(input);
                replies[rank] = Some(reply);
                State::AllGather {
                    numel,
                    inputs,
                    replies,
                }
            }
            (state, contribution) => {
                let err = CommsErr::CollectiveMismatch {
                    seq,
                    rank,
                    detail: format!(
                        "expected {}, got {}",
                        state.describe(),
                        contribution.describe()
                    ),
                };

                state.fail(err.clone());
                contribution.fail(err.clone());
                State::Poisoned(err)
            }
        }
    }

    /// Runs the collective once every rank has joined and hands out the results.
    fn complete(self, seq: u64, world_size: usize) {
        match self {
            State::ReduceScatter {
                op,
                numel,
                inputs,
                replies,
            } => {
                let mut inputs: Vec<Vec<Vec<f32>>> = inputs.into_iter().flatten().collect();
                let replies: Vec<_> = replies.into_iter().flatten().collect();

                if inputs.len() != world_size || replies.len() != world_size {
                    for reply in replies {
                        let _ = reply.send(Err(CommsErr::Aborted { seq }));
                    }
                    return;
                }

                for (dst, reply) in replies.into_iter().enumerate() {
                    let mut acc = vec![0.; numel];
                    for rank_inputs in inputs.iter_mut() {
                        let slice = mem::take(&mut rank_inputs[dst]);
                        acc.iter_mut().zip(&slice).for_each(|(a, x)| *a += x);
                    }

                    if op == ReduceOp::Avg {
                        let n = world_size as f32;
                        acc.iter_mut().for_each(|a| *a /= n);
                    }

                    let _ = reply.send(Ok(acc));
                }
            }
            State::AllGather {
                inputs, replies, ..
            } => {
                let inputs: Vec<Vec<f32>> = inputs.into_iter().flatten().collect();
                let replies: Vec<_> = replies.into_iter().flatten().collect();

                if inputs.len() != world_size || replies.len() != world_size {
                    for reply in replies {
                        let _ = reply.send(Err(CommsErr::Aborted { seq }));
                    }
                    return;
                }

                for reply in replies {
                    let _ = reply.send(Ok(inputs.clone()));
                }
            }
            State::Poisoned(_) => {}
        }
    }
}

struct Slot {
    arrived: usize,
    state: Option<State>,
}

#[derive(Default)]
struct Rendezvous {
    slots: HashMap<u64, Slot>,
    /// The rank that tore the group down, if any.
    aborted_by: Option<usize>,
}

/// The shared rendezvous point of every rank in a `LocalGroup`.
#[derive(Default)]
struct Fabric {
    pending: Mutex<Rendezvous>,
}

/// An in-process process group, every rank lives in the same address space.
///
/// Calls are matched across ranks by their per-rank issue order, so every rank
/// must issue the same sequence of collectives. A call completes as soon as the
/// last rank joins it, whichever task that happens on. Once any rank aborts, every
/// pending and future call on the group fails with `CommsErr::Aborted`.
pub struct LocalGroup {
    rank: usize,
    world_size: usize,
    next_seq: AtomicU64,
    fabric: Arc<Fabric>,
}

impl LocalGroup {
    /// Creates the endpoints of a new group.
    ///
    /// # Arguments
    /// * `world_size` - The amount of ranks in the group.
    ///
    /// # Returns
    /// One endpoint per rank, ordered by rank, or an error if `world_size` is zero.
    pub fn new_group(world_size: usize) -> Result<Vec<Self>> {
        if world_size == 0 {
            return Err(CommsErr::InvalidWorldSize);
        }

        let fabric = Arc::new(Fabric::default());
        let group = (0..world_size)
            .map(|rank| Self {
                rank,
                world_size,
                next_seq: AtomicU64::new(0),
                fabric: Arc::clone(&fabric),
            })
            .collect();

        Ok(group)
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn submit(&self, seq: u64, contribution: Contribution) {
        let mut pending = self.fabric.pending.lock();
        if pending.aborted_by.is_some() {
            contribution.fail(CommsErr::Aborted { seq });
            return;
        }

        let slot = pending.slots.entry(seq).or_insert_with(|| Slot {
            arrived: 0,
            state: None,
        });

        slot.arrived += 1;
        slot.state = Some(match slot.state.take() {
            None => State::open(self.rank, self.world_size, contribution),
            Some(state) => state.join(seq, self.rank, contribution),
        });

        if slot.arrived == self.world_size {
            if let Some(state) = pending.slots.remove(&seq).and_then(|slot| slot.state) {
                trace!(rank = self.rank, seq = seq; "collective complete");
                state.complete(seq, self.world_size);
            }
        }
    }
}

impl ProcessGroup for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn reduce_scatter(&self, inputs: Vec<Vec<f32>>, op: ReduceOp) -> Result<Work<Vec<f32>>> {
        let seq = self.next_seq();

        let numel = inputs.first().map_or(0, Vec::len);
        let invalid = if inputs.len() != self.world_size {
            Some(CommsErr::WrongInputCount {
                seq,
                got: inputs.len(),
                expected: self.world_size,
            })
        } else if inputs.iter().any(|input| input.len() != numel) {
            Some(CommsErr::RaggedInputs { seq })
        } else {
            None
        };

        if let Some(err) = invalid {
            self.submit(seq, Contribution::Invalid(err.clone()));
            return Err(err);
        }

        trace!(rank = self.rank, seq = seq, numel = numel; "reduce-scatter issued");
        let (work, reply) = Work::pending(seq);
        self.submit(seq, Contribution::ReduceScatter { op, inputs, reply });
        Ok(work)
    }

    fn all_gather(&self, input: Vec<f32>) -> Result<Work<Vec<Vec<f32>>>> {
        let seq = self.next_seq();

        trace!(rank = self.rank, seq = seq, numel = input.len(); "all-gather issued");
        let (work, reply) = Work::pending(seq);
        self.submit(seq, Contribution::AllGather { input, reply });
        Ok(work)
    }

    fn abort(&self) {
        let mut pending = self.fabric.pending.lock();
        if pending.aborted_by.is_some() {
            return;
        }

        pending.aborted_by = Some(self.rank);
        let failed = pending.slots.len();
        for (seq, slot) in pending.slots.drain() {
            if let Some(state) = slot.state {
                state.fail(CommsErr::Aborted { seq });
            }
        }

        warn!(rank = self.rank, failed; "process group aborted");
    }
}
