//! Fixed-size block recycling.
//!
//! Every match owns a handful of per-field arrays of the same length. When a
//! match is freed its arrays go back to the pool and the next match reuses
//! them instead of allocating.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

/// Pool of boxed slices of one length.
pub struct BlockPool<T: Clone> {
    size: usize,
    fill: T,
    free: Vec<Box<[T]>>,
    outstanding: usize,
}

impl<T: Clone> BlockPool<T> {
    /// Creates a pool of `size`-element blocks initialized to `fill`.
    pub fn new(size: usize, fill: T) -> Self {
        Self {
            size,
            fill,
            free: Vec::new(),
            outstanding: 0,
        }
    }

    /// Returns the block length.
    pub fn block_size(&self) -> usize {
        self.size
    }

    /// Hands out a block with every element reset to the fill value.
    pub fn alloc(&mut self) -> Box<[T]> {
        self.outstanding += 1;
        match self.free.pop() {
            Some(mut block) => {
                for slot in block.iter_mut() {
                    *slot = self.fill.clone();
                }
                block
            }
            None => vec![self.fill.clone(); self.size].into_boxed_slice(),
        }
    }

    /// Returns a block to the pool.
    pub fn free(&mut self, block: Box<[T]>) {
        debug_assert_eq!(block.len(), self.size);
        debug_assert!(self.outstanding > 0);
        self.outstanding -= 1;
        self.free.push(block);
    }

    /// Number of blocks currently handed out.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Number of blocks waiting for reuse.
    pub fn available(&self) -> usize {
        self.free.len()
    }
}
