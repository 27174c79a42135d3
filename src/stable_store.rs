//! Append-only storage with stable element addresses
//!
//! `StableStore` is a segmented vector: elements live in chunks whose
//! capacity is reserved up front and never exceeded, so a chunk's buffer is
//! never reallocated. Growing the store only appends a new chunk (each one
//! twice the size of the previous), which means every element keeps the
//! address it was given at insertion for the whole lifetime of the store.
//!
//! The timing tree keeps father back-links as indices into this store, and
//! hands out references to records while the tree keeps growing; both rely
//! on the no-relocation guarantee.
//!
//! ```text
//!  chunk 0 (cap f)   chunk 1 (cap 2f)        chunk 2 (cap 4f)
//! ┌──────────────┐ ┌──────────────────────┐ ┌─────────────── ─ ─
//! │ 0 1 ... f-1  │ │ f ... 3f-1           │ │ 3f ...
//! └──────────────┘ └──────────────────────┘ └─────────────── ─ ─
//! ```

use thiserror::Error;

/// Default capacity of the first chunk
pub const DEFAULT_CHUNK_CAPACITY: usize = 16;

/// Errors raised while growing a [`StableStore`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("out of memory: could not reserve a chunk of {requested} elements")]
    OutOfMemory { requested: usize },
}

/// Append-only container whose elements never move once inserted
#[derive(Debug)]
pub struct StableStore<T> {
    chunks: Vec<Vec<T>>,
    first_capacity: usize,
    len: usize,
}

impl<T> StableStore<T> {
    /// Create an empty store with the default first chunk capacity
    pub fn new() -> Self {
        Self::with_chunk_capacity(DEFAULT_CHUNK_CAPACITY)
    }

    /// Create an empty store whose first chunk holds `capacity` elements
    ///
    /// A capacity of zero is bumped to one.
    pub fn with_chunk_capacity(capacity: usize) -> Self {
        StableStore {
            chunks: Vec::new(),
            first_capacity: capacity.max(1),
            len: 0,
        }
    }

    /// Append `value` and return its index
    ///
    /// The index (and the address of the stored element) stays valid until
    /// the store is dropped.
    pub fn emplace(&mut self, value: T) -> Result<usize, StoreError> {
        let needs_chunk = match self.chunks.last() {
            Some(chunk) => chunk.len() == self.chunk_capacity(self.chunks.len() - 1),
            None => true,
        };
        if needs_chunk {
            self.push_chunk()?;
        }

        let index = self.len;
        if let Some(chunk) = self.chunks.last_mut() {
            // Within the reserved capacity: no reallocation can happen here.
            chunk.push(value);
        }
        self.len += 1;
        Ok(index)
    }

    fn push_chunk(&mut self) -> Result<(), StoreError> {
        let requested = self.chunk_capacity(self.chunks.len());
        let mut chunk = Vec::new();
        chunk
            .try_reserve_exact(requested)
            .map_err(|_| StoreError::OutOfMemory { requested })?;
        self.chunks
            .try_reserve(1)
            .map_err(|_| StoreError::OutOfMemory { requested: 1 })?;
        self.chunks.push(chunk);
        Ok(())
    }

    /// Capacity reserved for chunk number `chunk`
    fn chunk_capacity(&self, chunk: usize) -> usize {
        self.first_capacity << chunk
    }

    /// Map a flat index to `(chunk, offset)`
    ///
    /// Chunk `k` starts at `f * (2^k - 1)`, so `k = floor(log2(i / f + 1))`.
    fn locate(&self, index: usize) -> (usize, usize) {
        let scaled = index / self.first_capacity + 1;
        let chunk = (usize::BITS - 1 - scaled.leading_zeros()) as usize;
        let start = self.first_capacity * ((1usize << chunk) - 1);
        (chunk, index - start)
    }

    /// Get the element stored at `index`
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        let (chunk, offset) = self.locate(index);
        self.chunks.get(chunk).and_then(|c| c.get(offset))
    }

    /// Get a mutable reference to the element stored at `index`
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index >= self.len {
            return None;
        }
        let (chunk, offset) = self.locate(index);
        self.chunks.get_mut(chunk).and_then(|c| c.get_mut(offset))
    }

    /// Most recently inserted element
    pub fn last(&self) -> Option<&T> {
        self.chunks.last().and_then(|c| c.last())
    }

    /// Most recently inserted element, viewed through `project`
    ///
    /// Returns `None` if the store is empty or the projection rejects the
    /// element (used to ask for "the last element, as this variant").
    pub fn last_as<U>(&self, project: impl FnOnce(&T) -> Option<&U>) -> Option<&U> {
        self.last().and_then(project)
    }

    /// Iterate over elements in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.chunks.iter().flatten()
    }

    /// Visit every element in insertion order
    pub fn for_each(&self, mut visitor: impl FnMut(&T)) {
        for item in self.iter() {
            visitor(item);
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of chunks allocated so far
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

impl<T> Default for StableStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
