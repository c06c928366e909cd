use std::cell::Cell;
use std::ops::{Deref, DerefMut};

use ndarray::ArrayD;

use crate::error::Result;

/// A backbone or prediction head: a tensor-to-tensor map with a training flag.
pub trait Network {
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>>;
    fn is_training(&self) -> bool;
    fn set_training(&mut self, training: bool);
}

/// Wraps a closure as a [`Network`]. Starts in training mode.
pub struct FnNetwork<F> {
    f: F,
    training: bool,
}

impl<F> FnNetwork<F>
where
    F: Fn(&ArrayD<f32>) -> Result<ArrayD<f32>>,
{
    pub fn new(f: F) -> FnNetwork<F> {
        FnNetwork { f, training: true }
    }
}

impl<F> Network for FnNetwork<F>
where
    F: Fn(&ArrayD<f32>) -> Result<ArrayD<f32>>,
{
    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        (self.f)(input)
    }
    fn is_training(&self) -> bool {
        self.training
    }
    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

/// Switches a network's training flag for the lifetime of the guard.
///
/// The previous flag is restored exactly once when the guard is dropped,
/// whether the scope ends normally, through `?`, or by unwinding.
pub struct TrainingModeGuard<'a, N: Network + ?Sized> {
    net: &'a mut N,
    previous: bool,
}

impl<'a, N: Network + ?Sized> TrainingModeGuard<'a, N> {
    pub fn new(net: &'a mut N, training: bool) -> TrainingModeGuard<'a, N> {
        let previous = net.is_training();
        net.set_training(training);
        TrainingModeGuard { net, previous }
    }

    /// Puts `net` into inference mode.
    pub fn eval(net: &'a mut N) -> TrainingModeGuard<'a, N> {
        Self::new(net, false)
    }

    pub fn previous(&self) -> bool {
        self.previous
    }
}

impl<N: Network + ?Sized> Deref for TrainingModeGuard<'_, N> {
    type Target = N;
    fn deref(&self) -> &N {
        &*self.net
    }
}

impl<N: Network + ?Sized> DerefMut for TrainingModeGuard<'_, N> {
    fn deref_mut(&mut self) -> &mut N {
        &mut *self.net
    }
}

impl<N: Network + ?Sized> Drop for TrainingModeGuard<'_, N> {
    fn drop(&mut self) {
        self.net.set_training(self.previous);
    }
}

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Whether forward passes on this thread should record gradients.
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(|g| g.get())
}

/// Disables gradient tracking on the current thread until dropped.
pub struct NoGradGuard {
    previous: bool,
}

impl NoGradGuard {
    pub fn new() -> NoGradGuard {
        let previous = GRAD_ENABLED.with(|g| g.replace(false));
        NoGradGuard { previous }
    }
}

impl Default for NoGradGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        GRAD_ENABLED.with(|g| g.set(self.previous));
    }
}
