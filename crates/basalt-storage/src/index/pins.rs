//! Pin stack of an open index handle.

use basalt_buffer::{BlockHandle, BufferManager, LockMode};
use basalt_common::page::PageId;
use basalt_common::{BasaltError, Result};
use log::warn;

/// Blocks currently fixed by one index handle, root first.
///
/// Handles are RAII guards: anything still on the stack when it is dropped
/// gets unfixed.
pub(crate) struct PinStack<'a> {
    buffer: &'a BufferManager,
    file_id: u32,
    stack: Vec<BlockHandle<'a>>,
}

impl<'a> PinStack<'a> {
    pub(crate) fn new(buffer: &'a BufferManager, file_id: u32) -> Self {
        Self {
            buffer,
            file_id,
            stack: Vec::with_capacity(4),
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn push(&mut self, handle: BlockHandle<'a>) {
        self.stack.push(handle);
    }

    /// Fixes block `block` of the index file and pushes it.
    pub(crate) fn fix(&mut self, block: u32, mode: LockMode) -> Result<()> {
        let handle = self
            .buffer
            .fix_block(PageId::new(self.file_id, block), mode, true)?;
        self.stack.push(handle);
        Ok(())
    }

    /// Unfixes the top block.
    pub(crate) fn pop(&mut self) -> Result<()> {
        let handle = self
            .stack
            .pop()
            .ok_or(BasaltError::PinStackInvalid { depth: 0 })?;
        self.buffer.unfix_block(handle)
    }

    /// Unfixes the top block unless it is the root.
    pub(crate) fn pop_above_root(&mut self) -> Result<()> {
        if self.stack.len() > 1 {
            self.pop()?;
        }
        Ok(())
    }

    pub(crate) fn top(&self) -> Result<&BlockHandle<'a>> {
        self.stack.last().ok_or(BasaltError::PinStackInvalid { depth: 0 })
    }

    pub(crate) fn top_mut(&mut self) -> Result<&mut BlockHandle<'a>> {
        self.stack
            .last_mut()
            .ok_or(BasaltError::PinStackInvalid { depth: 0 })
    }

    pub(crate) fn root(&self) -> Result<&BlockHandle<'a>> {
        self.stack.first().ok_or(BasaltError::PinStackInvalid { depth: 0 })
    }

    pub(crate) fn root_mut(&mut self) -> Result<&mut BlockHandle<'a>> {
        self.stack
            .first_mut()
            .ok_or(BasaltError::PinStackInvalid { depth: 0 })
    }

    /// Unfixes everything above the root, logging failures.
    pub(crate) fn truncate_to_root(&mut self) {
        while self.stack.len() > 1 {
            if let Err(e) = self.pop() {
                warn!("Failed to unfix index block on cleanup: {}", e);
            }
        }
    }

    /// Unfixes every block, root included. Returns the first failure.
    pub(crate) fn unfix_all(&mut self) -> Result<()> {
        let mut first_err = None;
        while !self.stack.is_empty() {
            if let Err(e) = self.pop() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for PinStack<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.unfix_all() {
            warn!("Failed to release index pins of file {}: {}", self.file_id, e);
        }
    }
}
