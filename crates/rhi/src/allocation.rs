//! Allocation state shared by [`GpuBuffer`](crate::buffer::GpuBuffer) and
//! [`GpuImage`](crate::image::GpuImage).
//!
//! Resources start [`Unallocated`](AllocationState::Unallocated); the only
//! way to reach the native handles is through the `Allocated` variant, so
//! write-before-allocate and double-allocate are reported by the type
//! rather than by scattered boolean guards.

use crate::error::{RhiError, RhiResult};

/// Tagged allocation state of a GPU resource.
#[derive(Debug, Default)]
pub enum AllocationState<T> {
    #[default]
    Unallocated,
    Allocated(T),
}

impl<T> AllocationState<T> {
    /// Runs `allocate` and stores its result.
    ///
    /// # Errors
    ///
    /// [`RhiError::AlreadyAllocated`] if already allocated (`allocate` is
    /// not called), or whatever `allocate` returns.
    pub fn allocate_with(
        &mut self,
        what: &'static str,
        allocate: impl FnOnce() -> RhiResult<T>,
    ) -> RhiResult<&mut T> {
        if self.is_allocated() {
            return Err(RhiError::AlreadyAllocated(what));
        }

        *self = Self::Allocated(allocate()?);
        match self {
            Self::Allocated(inner) => Ok(inner),
            Self::Unallocated => Err(RhiError::NotAllocated(what)),
        }
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        matches!(self, Self::Allocated(_))
    }

    /// Borrows the allocation or reports [`RhiError::NotAllocated`].
    pub fn get(&self, what: &'static str) -> RhiResult<&T> {
        match self {
            Self::Allocated(inner) => Ok(inner),
            Self::Unallocated => Err(RhiError::NotAllocated(what)),
        }
    }

    /// Mutable variant of [`AllocationState::get`].
    pub fn get_mut(&mut self, what: &'static str) -> RhiResult<&mut T> {
        match self {
            Self::Allocated(inner) => Ok(inner),
            Self::Unallocated => Err(RhiError::NotAllocated(what)),
        }
    }

    /// Returns to `Unallocated`, handing back the previous allocation.
    pub fn release(&mut self) -> Option<T> {
        match std::mem::take(self) {
            Self::Allocated(inner) => Some(inner),
            Self::Unallocated => None,
        }
    }
}

/// Fails unless `requested` bytes fit in `allocated` bytes.
pub fn check_capacity(allocated: u64, requested: u64) -> RhiResult<()> {
    if requested > allocated {
        return Err(RhiError::InsufficientCapacity {
            allocated,
            requested,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_unallocated() {
        let state: AllocationState<u32> = AllocationState::default();
        assert!(!state.is_allocated());
        assert!(matches!(state.get("buffer"), Err(RhiError::NotAllocated("buffer"))));
    }

    #[test]
    fn test_allocate_once() {
        let mut state = AllocationState::Unallocated;
        *state.allocate_with("buffer", || Ok(7u32)).unwrap() += 1;
        assert_eq!(*state.get("buffer").unwrap(), 8);
    }

    #[test]
    fn test_second_allocate_fails_without_running_allocator() {
        let mut state = AllocationState::Unallocated;
        state.allocate_with("image", || Ok(1u32)).unwrap();

        let mut called = false;
        let err = state
            .allocate_with("image", || {
                called = true;
                Ok(2)
            })
            .unwrap_err();

        assert!(matches!(err, RhiError::AlreadyAllocated("image")));
        assert!(!called);
        assert_eq!(*state.get("image").unwrap(), 1);
    }

    #[test]
    fn test_failed_allocate_stays_unallocated() {
        let mut state: AllocationState<u32> = AllocationState::Unallocated;
        let err = state
            .allocate_with("buffer", || Err(RhiError::InvalidDescription("zero size".into())))
            .unwrap_err();
        assert!(matches!(err, RhiError::InvalidDescription(_)));
        assert!(!state.is_allocated());
    }

    #[test]
    fn test_release_allows_reallocation() {
        let mut state = AllocationState::Unallocated;
        state.allocate_with("buffer", || Ok(1u32)).unwrap();
        assert_eq!(state.release(), Some(1));
        assert!(state.release().is_none());
        state.allocate_with("buffer", || Ok(2u32)).unwrap();
        assert_eq!(*state.get("buffer").unwrap(), 2);
    }

    #[test]
    fn test_check_capacity() {
        assert!(check_capacity(64, 64).is_ok());
        assert!(check_capacity(64, 0).is_ok());
        assert!(matches!(
            check_capacity(64, 65),
            Err(RhiError::InsufficientCapacity {
                allocated: 64,
                requested: 65
            })
        ));
    }
}
