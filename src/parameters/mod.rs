mod grouping;
mod param;
mod state;

use std::{collections::HashMap, sync::Arc};

pub use grouping::{
    Chunk, ParamGroup, ShapeGroup, chunks, group_by_numel, group_by_shape, owner_of,
};
pub use param::{Param, ParamId, ParamRef};
pub use state::MomentumStore;

use crate::{MuonErr, Result};

/// Checks the parameter list an optimizer is built with.
///
/// # Returns
/// `MuonErr::NoParams` for an empty list, `MuonErr::DuplicateParam` if the same tensor
/// appears twice and `MuonErr::RankTooLow` for scalars.
pub(crate) fn validate_params(params: &[ParamRef]) -> Result<()> {
    if params.is_empty() {
        return Err(MuonErr::NoParams);
    }

    let mut seen = HashMap::with_capacity(params.len());
    for (i, param) in params.iter().enumerate() {
        if let Some(first) = seen.insert(Arc::as_ptr(param), i) {
            return Err(MuonErr::DuplicateParam { first, second: i });
        }

        if param.read().ndim() == 0 {
            return Err(MuonErr::RankTooLow { param: i });
        }
    }

    Ok(())
}

/// Checks that every parameter has a gradient before a step mutates anything.
pub(crate) fn check_grads(params: &[ParamRef]) -> Result<()> {
    for (i, param) in params.iter().enumerate() {
        let param = param.read();
        match param.grad() {
            None => return Err(MuonErr::MissingGrad { param: i }),
            Some(grad) if grad.shape() != param.shape() => {
                return Err(MuonErr::GradShapeMismatch {
                    param: Some(i),
                    got: grad.shape().to_vec(),
                    expected: param.shape().to_vec(),
                });
            }
            Some(_) => {}
        }
    }

    Ok(())
}
