/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Stack arenas for units whose frames are built by hand.
//!
//! An arena is a zeroed, 16-byte aligned buffer exclusively owned by one
//! unit.  Requests are padded so the initial frame never sits flush against
//! the requested limit, and rounded up to the alignment so the top of the
//! arena is itself aligned.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::StackError;

/// Alignment of every arena and of its top address.
pub const STACK_ALIGN: usize = 16;

/// Bytes added to every request before rounding.
pub const STACK_PADDING: usize = 64;

/// Size actually reserved for a request of `requested` bytes, or `None` when
/// the padded size overflows.
pub fn padded_size(requested: usize) -> Option<usize> {
    requested
        .checked_add(STACK_PADDING)?
        .checked_next_multiple_of(STACK_ALIGN)
}

pub struct StackArena {
    base: NonNull<u8>,
    layout: Layout,
    requested: usize,
}

// SAFETY: the arena is plain memory owned exclusively by one unit; nothing in
// it is tied to the allocating thread.
unsafe impl Send for StackArena {}

impl StackArena {
    pub fn allocate(requested: usize) -> Result<Self, StackError> {
        if requested == 0 {
            return Err(StackError::Empty);
        }
        let size = padded_size(requested).ok_or(StackError::TooLarge(requested))?;
        let layout =
            Layout::from_size_align(size, STACK_ALIGN).map_err(|_| StackError::TooLarge(size))?;
        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let base = NonNull::new(raw).ok_or(StackError::OutOfMemory(size))?;
        Ok(Self {
            base,
            layout,
            requested,
        })
    }

    /// Lowest address of the arena.
    pub fn bottom(&self) -> *const u8 {
        self.base.as_ptr()
    }

    /// One past the highest address; stacks grow down from here.
    pub fn top(&self) -> *mut u8 {
        // SAFETY: one-past-the-end of the same allocation.
        unsafe { self.base.as_ptr().add(self.layout.size()) }
    }

    /// Bytes the unit asked for.
    pub fn requested(&self) -> usize {
        self.requested
    }

    /// Bytes actually reserved, padding included.
    pub fn capacity(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for StackArena {
    fn drop(&mut self) {
        // SAFETY: allocated in `allocate` with this exact layout.
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) }
    }
}

impl std::fmt::Debug for StackArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackArena")
            .field("bottom", &self.bottom())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_size_rounds_to_alignment() {
        assert_eq!(padded_size(4096), Some(4160));
        assert_eq!(padded_size(1), Some(80));
        assert_eq!(padded_size(usize::MAX), None);
    }

    #[test]
    fn arena_is_aligned_and_zeroed() {
        let arena = StackArena::allocate(1000).unwrap();
        assert_eq!(arena.bottom() as usize % STACK_ALIGN, 0);
        assert_eq!(arena.top() as usize % STACK_ALIGN, 0);
        assert_eq!(arena.requested(), 1000);
        assert!(arena.capacity() >= 1000 + STACK_PADDING);
        let bytes = unsafe { std::slice::from_raw_parts(arena.bottom(), arena.capacity()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_size_is_rejected() {
        assert_eq!(StackArena::allocate(0).unwrap_err(), StackError::Empty);
    }

    #[test]
    fn oversized_request_is_rejected() {
        assert_eq!(
            StackArena::allocate(usize::MAX).unwrap_err(),
            StackError::TooLarge(usize::MAX)
        );
    }
}
