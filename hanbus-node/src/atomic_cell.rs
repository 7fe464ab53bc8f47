//! A critical-section protected cell for sharing small `Copy` values with interrupt handlers
//!
//! Targets without compare-and-swap (e.g. thumbv6m, PIC-class cores) have no usable atomics for
//! anything but the smallest types, so every access takes a critical section instead.

use core::cell::Cell;

use critical_section::Mutex;

/// A cell whose value can be loaded and stored from any context
#[derive(Debug)]
pub struct AtomicCell<T: Copy> {
    inner: Mutex<Cell<T>>,
}

impl<T: Copy> AtomicCell<T> {
    /// Create a new cell
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Cell::new(value)),
        }
    }

    /// Read the value
    pub fn load(&self) -> T {
        critical_section::with(|cs| self.inner.borrow(cs).get())
    }

    /// Replace the value
    pub fn store(&self, value: T) {
        critical_section::with(|cs| self.inner.borrow(cs).set(value));
    }

    /// Apply `f` to the value and store the result, all within one critical section
    ///
    /// Returns the previous value.
    pub fn update(&self, f: impl FnOnce(T) -> T) -> T {
        critical_section::with(|cs| {
            let cell = self.inner.borrow(cs);
            let old = cell.get();
            cell.set(f(old));
            old
        })
    }
}

impl<T: Copy + Default> AtomicCell<T> {
    /// Read the value and reset it to the default
    pub fn take(&self) -> T {
        critical_section::with(|cs| self.inner.borrow(cs).take())
    }
}

impl<T: Copy + Default> Default for AtomicCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
