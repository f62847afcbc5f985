//! Kernel state locking mechanism.
//!
//! Every mutable piece of kernel state lives in a [`CpuLockCell`], which can
//! only be read or written while holding a [`CpuLockGuard`]. The guard wraps
//! the port's nestable interrupt mask, so all mutation happens with hardware
//! interrupts suspended, which is the only mutual exclusion a single-core
//! kernel needs.
use core::cell::UnsafeCell;
use core::marker::PhantomData;

use crate::{utils::Init, PortThreading};

/// Enter a CPU Lock state and get an RAII guard. The port's saved interrupt
/// mask nests, so this may be called while another guard is alive (e.g. an
/// error hook invoking a service).
#[inline]
pub(crate) fn lock_cpu<Traits: PortThreading>() -> CpuLockGuard<Traits> {
    CpuLockGuard {
        saved: Traits::suspend_interrupts(),
        _not_send: PhantomData,
    }
}

/// RAII guard for a CPU Lock state. Dropping it restores the interrupt mask
/// saved on entry.
pub(crate) struct CpuLockGuard<Traits: PortThreading> {
    saved: Traits::IrqState,
    /// The guard stands for the current execution context and must not
    /// migrate to another thread of the hosted port.
    _not_send: PhantomData<*mut ()>,
}

impl<Traits: PortThreading> Drop for CpuLockGuard<Traits> {
    #[inline]
    fn drop(&mut self) {
        Traits::resume_interrupts(self.saved);
    }
}

/// Cell type that can be accessed by a [`CpuLockGuard`].
///
/// Accessors either copy values in and out or run a short closure over a
/// borrow. The closure must not re-enter the kernel (no service calls, no
/// hooks, no port calls); re-entry happens only between cell accesses, where
/// no borrow is live.
pub(crate) struct CpuLockCell<Traits, T> {
    value: UnsafeCell<T>,
    _phantom: PhantomData<Traits>,
}

// Safety: all access is funneled through a `CpuLockGuard`, and on a single
// core at most one context executes between interrupt-mask transitions.
unsafe impl<Traits, T: Send> Sync for CpuLockCell<Traits, T> {}

impl<Traits, T> CpuLockCell<Traits, T> {
    pub(crate) const fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
            _phantom: PhantomData,
        }
    }
}

impl<Traits: PortThreading, T> CpuLockCell<Traits, T> {
    #[inline]
    pub(crate) fn get(&self, _lock: &CpuLockGuard<Traits>) -> T
    where
        T: Copy,
    {
        // Safety: the guard proves interrupts are suspended
        unsafe { *self.value.get() }
    }

    #[inline]
    pub(crate) fn set(&self, _lock: &mut CpuLockGuard<Traits>, value: T) {
        // Safety: ditto, and `&mut` on the guard excludes shared readers
        unsafe { *self.value.get() = value }
    }

    #[inline]
    pub(crate) fn with<R>(&self, _lock: &CpuLockGuard<Traits>, f: impl FnOnce(&T) -> R) -> R {
        // Safety: the borrow ends when `f` returns
        f(unsafe { &*self.value.get() })
    }

    #[inline]
    pub(crate) fn with_mut<R>(
        &self,
        _lock: &mut CpuLockGuard<Traits>,
        f: impl FnOnce(&mut T) -> R,
    ) -> R {
        // Safety: ditto; `&mut` on the guard makes this borrow unique
        f(unsafe { &mut *self.value.get() })
    }
}

impl<Traits, T: Init> Init for CpuLockCell<Traits, T> {
    const INIT: Self = Self::new(T::INIT);
}
