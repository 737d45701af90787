use std::{
    error::Error,
    fmt::{self, Display},
};

use comms::CommsErr;
use ndarray::ShapeError;

/// The result type used across the optimizer crate.
pub type Result<T> = std::result::Result<T, MuonErr>;

/// The optimizer's error type.
///
/// Every variant aborts the whole step or construction, nothing is applied partially.
#[derive(Debug)]
pub enum MuonErr {
    InvalidConfig(String),
    NoParams,
    DuplicateParam {
        first: usize,
        second: usize,
    },
    RankTooLow {
        param: usize,
    },
    RankMismatch {
        param: usize,
        got: usize,
        expected: usize,
    },
    MissingGrad {
        param: usize,
    },
    GradShapeMismatch {
        param: Option<usize>,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    SizeMismatch {
        got: usize,
        expected: usize,
    },
    Shape(ShapeError),
    Comms(CommsErr),
}

impl Display for MuonErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MuonErr::InvalidConfig(msg) => write!(f, "invalid optimizer config: {msg}"),
            MuonErr::NoParams => write!(f, "the optimizer was given no parameters"),
            MuonErr::DuplicateParam { first, second } => write!(
                f,
                "parameters {first} and {second} are the same tensor, each parameter must be passed once"
            ),
            MuonErr::RankTooLow { param } => write!(
                f,
                "parameter {param} is a scalar, orthogonalization needs at least one dimension"
            ),
            MuonErr::RankMismatch {
                param,
                got,
                expected,
            } => write!(
                f,
                "parameter {param} has {got} dimensions, expected {expected}"
            ),
            MuonErr::MissingGrad { param } => {
                write!(f, "parameter {param} has no gradient attached")
            }
            MuonErr::GradShapeMismatch {
                param: Some(param),
                got,
                expected,
            } => write!(
                f,
                "gradient of parameter {param} has shape {got:?}, expected {expected:?}"
            ),
            MuonErr::GradShapeMismatch {
                param: None,
                got,
                expected,
            } => write!(f, "gradient has shape {got:?}, expected {expected:?}"),
            MuonErr::SizeMismatch { got, expected } => write!(
                f,
                "flat buffer holds {got} elements, the parameter has {expected}"
            ),
            MuonErr::Shape(e) => write!(f, "shape error: {e}"),
            MuonErr::Comms(e) => write!(f, "collective failed: {e}"),
        }
    }
}

impl Error for MuonErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MuonErr::Shape(e) => Some(e),
            MuonErr::Comms(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MuonErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<CommsErr> for MuonErr {
    fn from(value: CommsErr) -> Self {
        Self::Comms(value)
    }
}
