//! Id-indexed set of IO buffers.

use heapless::FnvIndexMap;

use super::IoBuffer;
use crate::error::{Error, Result};

/// Buffers of one direction, sorted by id, with O(1) lookup.
#[derive(Debug)]
pub(crate) struct StreamTable {
    buffers: Vec<IoBuffer>,
    index: FnvIndexMap<u8, usize, 256>,
}

impl StreamTable {
    /// Builds the table; ids must be unique.
    pub fn new(mut buffers: Vec<IoBuffer>) -> Result<Self> {
        buffers.sort_by_key(IoBuffer::id);

        let mut index = FnvIndexMap::new();
        for (pos, buf) in buffers.iter().enumerate() {
            match index.insert(buf.id(), pos) {
                Ok(None) => {}
                Ok(Some(_)) => {
                    return Err(Error::bad_parameter(format!(
                        "stream id {} used twice",
                        buf.id()
                    )));
                }
                Err(_) => return Err(Error::Alloc),
            }
        }
        Ok(Self { buffers, index })
    }

    /// Looks a buffer up by id.
    #[inline]
    pub fn get(&self, id: u8) -> Option<&IoBuffer> {
        self.index.get(&id).map(|&pos| &self.buffers[pos])
    }

    /// Iterates in ascending id order.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, IoBuffer> {
        self.buffers.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }
}
