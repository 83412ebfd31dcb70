//! Two-ended code buffer
//!
//! One contiguous byte region holds both outputs of emission: machine
//! code grows up from offset zero, relocation records grow down from
//! the top. Keeping them in a single blob means a single growth path
//! and a serialization-ready layout. Cursors are indices, never
//! addresses; growth copies the instruction region to identical
//! offsets and re-anchors the relocation region at the new top.

use crate::reloc::{self, RelocMode, RelocIter};

use log::debug;

/// Safety margin kept between the two cursors.
pub const GAP: usize = 128;

/// Default growth cap. Exceeding it is a fatal out-of-memory
/// condition, not a retryable error.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 512 * 1024 * 1024;

#[derive(Debug)]
enum Storage<'a> {
    /// Heap region owned by the buffer; may grow.
    Owned(Box<[u8]>),
    /// Caller-supplied region; growing it is a caller bug.
    Borrowed(&'a mut [u8]),
}

impl Storage<'_> {
    #[inline(always)]
    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Owned(b)    => b,
            Storage::Borrowed(b) => b,
        }
    }

    #[inline(always)]
    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Storage::Owned(b)    => b,
            Storage::Borrowed(b) => b,
        }
    }
}

/// The byte region plus its two cursors.
#[derive(Debug)]
pub struct CodeBuffer<'a> {
    storage: Storage<'a>,

    /// Instruction cursor, next write offset.
    pc: usize,
    /// Relocation cursor, lowest written record byte.
    reloc_pos: usize,
    /// pc of the most recently recorded relocation, for delta records.
    last_reloc_pc: usize,

    max_size: usize,
}

impl<'a> CodeBuffer<'a> {
    /// Allocate an owned buffer of `capacity` bytes.
    #[track_caller]
    pub fn with_capacity(capacity: usize, max_size: usize) -> Self {
        assert!(capacity > 2 * GAP, "code buffer capacity too small");
        assert!(capacity <= max_size, "code buffer capacity above its growth cap");

        let storage = vec![0u8; capacity].into_boxed_slice();
        Self {
            reloc_pos: storage.len(),
            storage: Storage::Owned(storage),
            pc: 0,
            last_reloc_pc: 0,
            max_size,
        }
    }

    /// Wrap a caller-supplied region. The buffer cannot grow; the
    /// caller is responsible for having sized it generously.
    pub fn from_slice(region: &'a mut [u8]) -> Self {
        Self {
            reloc_pos: region.len(),
            storage: Storage::Borrowed(region),
            pc: 0,
            last_reloc_pc: 0,
            max_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }

    #[must_use]
    #[inline(always)]
    pub fn buffer_size(&self) -> usize {
        self.storage.bytes().len()
    }

    #[must_use]
    #[inline(always)]
    pub fn pc_offset(&self) -> usize {
        self.pc
    }

    #[must_use]
    #[inline(always)]
    pub fn reloc_pos(&self) -> usize {
        self.reloc_pos
    }

    /// Address the instruction region currently lives at.
    #[must_use]
    #[inline(always)]
    pub fn base_address(&self) -> u64 {
        self.storage.bytes().as_ptr() as u64
    }

    #[must_use]
    #[inline(always)]
    pub fn bytes(&self) -> &[u8] {
        self.storage.bytes()
    }

    #[must_use]
    #[inline(always)]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.storage.bytes_mut()
    }

    /// True when the cursors are within [`GAP`] of colliding; the
    /// caller must grow before emitting more.
    #[must_use]
    #[inline(always)]
    pub fn overflow(&self) -> bool {
        self.pc >= self.reloc_pos.saturating_sub(GAP)
    }

    /// Append raw bytes at the instruction cursor.
    ///
    /// Growth is the caller's job: emission with [`overflow`] pending
    /// is a contract violation.
    ///
    /// [`overflow`]: CodeBuffer::overflow
    #[inline]
    pub fn emit_bytes(&mut self, data: &[u8]) -> usize {
        let offset = self.pc;
        debug_assert!{
            offset + data.len() <= self.reloc_pos,
            "instruction cursor ran into the relocation log"
        };
        self.storage.bytes_mut()[offset..offset + data.len()].copy_from_slice(data);
        self.pc += data.len();
        offset
    }

    /// Append one little-endian instruction word, returning its offset.
    #[inline(always)]
    pub fn emit_word(&mut self, word: u32) -> usize {
        self.emit_bytes(&word.to_le_bytes())
    }

    /// Record a relocation anchored at the current instruction cursor.
    #[inline]
    pub fn record_reloc(&mut self, mode: RelocMode, data: i64) {
        let delta = (self.pc - self.last_reloc_pc) as u32;
        self.reloc_pos = reloc::write_record(
            self.storage.bytes_mut(),
            self.reloc_pos,
            mode,
            delta,
            data,
        );
        self.last_reloc_pc = self.pc;
    }

    /// Double the region (and again, until the cursors have room),
    /// preserving both sub-regions.
    ///
    /// Growing a caller-supplied region, or past the growth cap, is
    /// fatal.
    #[track_caller]
    pub fn grow(&mut self) {
        debug_assert!(self.overflow());

        let Storage::Owned(old) = &mut self.storage else {
            panic!("external code buffer is too small")
        };

        let old_size = old.len();
        let reloc_len = old_size - self.reloc_pos;

        let mut new_size = 2 * old_size;
        while self.pc + GAP >= new_size - reloc_len {
            new_size *= 2;
        }
        if new_size > self.max_size {
            panic!("code buffer growth past {} bytes: out of memory", self.max_size);
        }

        let mut new = vec![0u8; new_size].into_boxed_slice();
        new[..self.pc].copy_from_slice(&old[..self.pc]);
        new[new_size - reloc_len..].copy_from_slice(&old[self.reloc_pos..]);

        debug!{
            "growing code buffer {old_size} -> {new_size} (pc {pc}, reloc {reloc_len})",
            pc = self.pc
        };

        *old = new;
        self.reloc_pos = new_size - reloc_len;

        debug_assert!(!self.overflow());
    }

    /// Snapshot the final layout. Consumes the buffer; nothing can be
    /// emitted afterwards.
    #[must_use]
    pub fn finish(self) -> CodeDesc<'a> {
        debug_assert!(self.pc <= self.reloc_pos); // no overlap
        CodeDesc {
            instr_size: self.pc,
            reloc_size: self.buffer_size() - self.reloc_pos,
            buffer_size: self.buffer_size(),
            storage: self.storage,
        }
    }
}

/// Finalized emission output handed to the next pipeline stage.
#[derive(Debug)]
pub struct CodeDesc<'a> {
    storage: Storage<'a>,
    instr_size: usize,
    reloc_size: usize,
    buffer_size: usize,
}

impl CodeDesc<'_> {
    #[must_use]
    #[inline(always)]
    pub fn instr_size(&self) -> usize {
        self.instr_size
    }

    #[must_use]
    #[inline(always)]
    pub fn reloc_size(&self) -> usize {
        self.reloc_size
    }

    #[must_use]
    #[inline(always)]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// The emitted machine code.
    #[must_use]
    #[inline(always)]
    pub fn instr_bytes(&self) -> &[u8] {
        &self.storage.bytes()[..self.instr_size]
    }

    /// Mutable view of the machine code, for in-place patching.
    #[must_use]
    #[inline(always)]
    pub fn instr_bytes_mut(&mut self) -> &mut [u8] {
        let instr_size = self.instr_size;
        &mut self.storage.bytes_mut()[..instr_size]
    }

    /// The raw relocation region.
    #[must_use]
    #[inline(always)]
    pub fn reloc_bytes(&self) -> &[u8] {
        &self.storage.bytes()[self.buffer_size - self.reloc_size..]
    }

    /// Decoded relocation records, in emission order.
    #[inline(always)]
    pub fn reloc_entries(&self) -> RelocIter<'_> {
        RelocIter::new(self.reloc_bytes())
    }

    /// Address the machine code currently lives at.
    #[must_use]
    #[inline(always)]
    pub fn base_address(&self) -> u64 {
        self.storage.bytes().as_ptr() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emission_advances_the_cursor() {
        let mut buf = CodeBuffer::with_capacity(1024, DEFAULT_MAX_BUFFER_SIZE);
        assert_eq!(buf.emit_word(0x00000013), 0);
        assert_eq!(buf.emit_word(0x02A00513), 4);
        assert_eq!(buf.pc_offset(), 8);
        assert!(!buf.overflow());

        let desc = buf.finish();
        assert_eq!(desc.instr_size(), 8);
        assert_eq!(desc.reloc_size(), 0);
        assert_eq!(&desc.instr_bytes()[4..], [0x13, 0x05, 0xA0, 0x02]);
    }

    #[test]
    fn growth_preserves_both_regions() {
        let mut buf = CodeBuffer::with_capacity(512, DEFAULT_MAX_BUFFER_SIZE);

        for i in 0..64u32 {
            buf.emit_word(0x1000_0000 | i);
            if i % 8 == 0 {
                buf.record_reloc(RelocMode::EmbeddedObject, i as i64);
            }
        }
        while !buf.overflow() {
            buf.emit_word(0x13);
        }

        let pc_before = buf.pc_offset();
        let instr_before = buf.bytes()[..pc_before].to_vec();
        let reloc_before: Vec<_> =
            RelocIter::new(&buf.bytes()[buf.reloc_pos()..]).collect();

        buf.grow();

        assert_eq!(buf.buffer_size(), 1024);
        assert_eq!(buf.pc_offset(), pc_before);
        assert_eq!(&buf.bytes()[..pc_before], instr_before.as_slice());
        let reloc_after: Vec<_> =
            RelocIter::new(&buf.bytes()[buf.reloc_pos()..]).collect();
        assert_eq!(reloc_after, reloc_before);
    }

    #[test]
    #[should_panic(expected = "external code buffer is too small")]
    fn growing_a_borrowed_region_is_fatal() {
        let mut region = [0u8; 512];
        let mut buf = CodeBuffer::from_slice(&mut region);
        while !buf.overflow() {
            buf.emit_word(0x13);
        }
        buf.grow();
    }

    #[test]
    #[should_panic(expected = "out of memory")]
    fn growth_past_the_cap_is_fatal() {
        let mut buf = CodeBuffer::with_capacity(512, 1024);
        loop {
            while !buf.overflow() {
                buf.emit_word(0x13);
            }
            buf.grow();
        }
    }
}
