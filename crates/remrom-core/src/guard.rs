//! Checked cursors over raw frame buffers.
//!
//! Every header read and write on the link goes through one of these. A read
//! or write that would cross the end of the buffer returns `GuardExceeded`
//! instead of touching memory outside it; callers drop the frame.

use std::ops::Range;
use zerocopy::{AsBytes, FromBytes, Unaligned};

/// An access would have crossed the end of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("frame guard exceeded: need {needed} bytes at offset {offset}, {available} available")]
pub struct GuardExceeded {
    pub offset: usize,
    pub needed: usize,
    pub available: usize,
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Sequential, bounds-checked reader over an inbound frame.
#[derive(Debug, Clone)]
pub struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Copy a header out of the frame and advance past it.
    pub fn read<T: FromBytes + Unaligned>(&mut self) -> Result<T, GuardExceeded> {
        let needed = std::mem::size_of::<T>();
        let value = T::read_from_prefix(&self.buf[self.pos..]).ok_or(self.exceeded(needed))?;
        self.pos += needed;
        Ok(value)
    }

    /// Borrow the next `len` bytes and advance past them.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], GuardExceeded> {
        if len > self.remaining() {
            return Err(self.exceeded(len));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), GuardExceeded> {
        self.bytes(len).map(|_| ())
    }

    /// Everything not yet consumed.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn exceeded(&self, needed: usize) -> GuardExceeded {
        GuardExceeded {
            offset: self.pos,
            needed,
            available: self.remaining(),
        }
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Sequential, bounds-checked writer into an outbound frame buffer.
#[derive(Debug)]
pub struct FrameWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> FrameWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn put<T: AsBytes + ?Sized>(&mut self, value: &T) -> Result<(), GuardExceeded> {
        self.put_bytes(value.as_bytes())
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), GuardExceeded> {
        let range = self.reserve(bytes.len())?;
        self.buf[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Claim `len` bytes to be filled later; returns their range in the buffer.
    pub fn reserve(&mut self, len: usize) -> Result<Range<usize>, GuardExceeded> {
        if len > self.remaining() {
            return Err(GuardExceeded {
                offset: self.pos,
                needed: len,
                available: self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(start..self.pos)
    }

    /// Unwritten tail of the buffer. Pair with `advance` once filled.
    pub fn tail_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.pos..]
    }

    pub fn advance(&mut self, len: usize) -> Result<(), GuardExceeded> {
        self.reserve(len).map(|_| ())
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        self.buf
    }
}

// ── In-place views ───────────────────────────────────────────────────────────

/// Borrow a header at `offset` for in-place modification.
pub fn view_mut<T>(buf: &mut [u8], offset: usize) -> Result<&mut T, GuardExceeded>
where
    T: FromBytes + AsBytes + Unaligned,
{
    let needed = std::mem::size_of::<T>();
    let available = buf.len().saturating_sub(offset);
    let err = GuardExceeded {
        offset,
        needed,
        available,
    };
    if offset > buf.len() {
        return Err(err);
    }
    T::mut_from_prefix(&mut buf[offset..]).ok_or(err)
}
