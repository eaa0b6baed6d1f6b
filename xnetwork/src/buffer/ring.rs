//! Fixed-capacity ring buffer of elements.
//!
//! Every IO buffer keeps its pending elements in one of these. The
//! capacity is chosen at construction and never grows: a full ring
//! refuses new elements so producers see backpressure instead of
//! unbounded memory use.

use crate::error::{Error, Result};

/// A fixed-capacity FIFO of `T`.
#[derive(Debug)]
pub struct RingBuffer<T> {
    /// Cell storage, `None` for free cells.
    cells: Box<[Option<T>]>,

    /// Index of the front element (head).
    head: usize,

    /// Index of the next free cell (tail).
    tail: usize,

    /// Current number of elements.
    len: usize,
}

impl<T> RingBuffer<T> {
    /// Creates an empty ring holding at most `capacity` elements.
    ///
    /// Fails with `BadParameter` for a zero capacity.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::bad_parameter("ring capacity must be non-zero"));
        }

        let mut cells = Vec::new();
        cells.try_reserve_exact(capacity).map_err(|_| Error::Alloc)?;
        cells.resize_with(capacity, || None);

        Ok(Self {
            cells: cells.into_boxed_slice(),
            head: 0,
            tail: 0,
            len: 0,
        })
    }

    /// Returns the number of elements in the ring.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the ring is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if the ring is full.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.cells.len()
    }

    /// Returns the ring capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Returns the number of elements that can still be pushed.
    #[inline]
    pub fn free_cell_count(&self) -> usize {
        self.cells.len() - self.len
    }

    /// Appends an element at the back.
    ///
    /// On a full ring the element is handed back untouched.
    pub fn push(&mut self, elem: T) -> core::result::Result<(), T> {
        if self.is_full() {
            return Err(elem);
        }

        self.cells[self.tail] = Some(elem);
        self.tail = (self.tail + 1) % self.cells.len();
        self.len += 1;
        Ok(())
    }

    /// Removes and returns the front element.
    pub fn pop_front(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }

        let elem = self.cells[self.head].take();
        self.head = (self.head + 1) % self.cells.len();
        self.len -= 1;
        elem
    }

    /// Returns a reference to the front element.
    pub fn peek_front(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        self.cells[self.head].as_ref()
    }

    /// Returns a mutable reference to the front element.
    pub fn front_mut(&mut self) -> Option<&mut T> {
        if self.is_empty() {
            return None;
        }
        self.cells[self.head].as_mut()
    }

    /// Removes every element, returning them in FIFO order.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        while let Some(elem) = self.pop_front() {
            out.push(elem);
        }
        self.head = 0;
        self.tail = 0;
        out
    }

    /// Iterates from front to back without consuming.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let cap = self.cells.len();
        (0..self.len).filter_map(move |i| self.cells[(self.head + i) % cap].as_ref())
    }
}
