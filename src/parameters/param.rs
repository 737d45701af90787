use std::sync::Arc;

use ndarray::{Array, ArrayD, ArrayViewMutD, Dimension};
use parking_lot::RwLock;

use crate::{MuonErr, Result};

/// A parameter shared between the model that owns it and the optimizer that updates it.
pub type ParamRef = Arc<RwLock<Param>>;

/// The stable index an optimizer assigns to each of its parameters at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(usize);

impl ParamId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the position of the parameter in the list the optimizer was built with.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A trainable tensor and the gradient the backward pass attached to it.
///
/// The shape is fixed at creation, gradients must match it.
#[derive(Debug, Clone)]
pub struct Param {
    value: ArrayD<f32>,
    grad: Option<ArrayD<f32>>,
}

impl Param {
    /// Creates a new `Param` without a gradient.
    ///
    /// # Arguments
    /// * `value` - The initial value of the parameter.
    pub fn new<D: Dimension>(value: Array<f32, D>) -> Self {
        Self {
            value: value.into_dyn(),
            grad: None,
        }
    }

    /// Creates a new `Param` ready to be shared with an optimizer.
    ///
    /// # Arguments
    /// * `value` - The initial value of the parameter.
    pub fn shared<D: Dimension>(value: Array<f32, D>) -> ParamRef {
        Arc::new(RwLock::new(Self::new(value)))
    }

    pub fn value(&self) -> &ArrayD<f32> {
        &self.value
    }

    /// Returns a mutable view of the value, its shape can't be changed through it.
    pub fn value_mut(&mut self) -> ArrayViewMutD<'_, f32> {
        self.value.view_mut()
    }

    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }

    pub fn ndim(&self) -> usize {
        self.value.ndim()
    }

    pub fn numel(&self) -> usize {
        self.value.len()
    }

    pub fn grad(&self) -> Option<&ArrayD<f32>> {
        self.grad.as_ref()
    }

    /// Attaches a gradient, replacing the previous one.
    ///
    /// # Arguments
    /// * `grad` - A tensor with the same shape as the parameter.
    ///
    /// # Returns
    /// `MuonErr::GradShapeMismatch` if the shapes differ.
    pub fn set_grad<D: Dimension>(&mut self, grad: Array<f32, D>) -> Result<()> {
        if grad.shape() != self.value.shape() {
            return Err(MuonErr::GradShapeMismatch {
                param: None,
                got: grad.shape().to_vec(),
                expected: self.value.shape().to_vec(),
            });
        }

        self.grad = Some(grad.into_dyn());
        Ok(())
    }

    /// Detaches the gradient and returns it.
    pub fn take_grad(&mut self) -> Option<ArrayD<f32>> {
        self.grad.take()
    }

    /// Drops the gradient, the next step fails until a new one is attached.
    pub fn zero_grad(&mut self) {
        self.grad = None;
    }

    /// Copies the value out in row-major order.
    pub(crate) fn value_flat(&self) -> Vec<f32> {
        self.value.iter().copied().collect()
    }

    /// Copies the gradient out in row-major order.
    pub(crate) fn grad_flat(&self) -> Option<Vec<f32>> {
        self.grad.as_ref().map(|g| g.iter().copied().collect())
    }

    /// Overwrites the value from a row-major buffer.
    ///
    /// # Returns
    /// `MuonErr::SizeMismatch` if `data` doesn't hold exactly one element per entry.
    pub(crate) fn load_flat(&mut self, data: &[f32]) -> Result<()> {
        if data.len() != self.value.len() {
            return Err(MuonErr::SizeMismatch {
                got: data.len(),
                expected: self.value.len(),
            });
        }

        self.value.iter_mut().zip(data).for_each(|(v, d)| *v = *d);
        Ok(())
    }

    /// Replaces the gradient with a row-major buffer.
    pub(crate) fn set_grad_flat(&mut self, data: Vec<f32>) -> Result<()> {
        let grad = ArrayD::from_shape_vec(self.value.raw_dim(), data)?;
        self.grad = Some(grad);
        Ok(())
    }

    /// Borrows the value mutably and the gradient immutably at the same time.
    pub(crate) fn split_mut(&mut self) -> (&mut ArrayD<f32>, Option<&ArrayD<f32>>) {
        (&mut self.value, self.grad.as_ref())
    }
}
