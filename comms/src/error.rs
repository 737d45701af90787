use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used across the collective layer.
pub type Result<T> = std::result::Result<T, CommsErr>;

/// Failures raised by a process group while scheduling or completing a collective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommsErr {
    /// A group can't be formed with zero participants.
    InvalidWorldSize,
    /// A reduce-scatter got a list that doesn't hold one input per rank.
    WrongInputCount {
        seq: u64,
        got: usize,
        expected: usize,
    },
    /// The inputs of a single call don't share the same element count.
    RaggedInputs { seq: u64 },
    /// Two ranks issued structurally different calls under the same sequence number.
    CollectiveMismatch {
        seq: u64,
        rank: usize,
        detail: String,
    },
    /// The peer side of a pending operation went away, or the group was aborted, before completing it.
    Aborted { seq: u64 },
}

impl Display for CommsErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommsErr::InvalidWorldSize => write!(f, "a process group needs at least one rank"),
            CommsErr::WrongInputCount { seq, got, expected } => write!(
                f,
                "collective #{seq} got {got} inputs, expected one per rank ({expected})"
            ),
            CommsErr::RaggedInputs { seq } => {
                write!(f, "collective #{seq} got inputs of different lengths")
            }
            CommsErr::CollectiveMismatch { seq, rank, detail } => write!(
                f,
                "collective #{seq} desynchronized at rank {rank}: {detail}"
            ),
            CommsErr::Aborted { seq } => {
                write!(f, "collective #{seq} was dropped before completing")
            }
        }
    }
}

impl Error for CommsErr {}
