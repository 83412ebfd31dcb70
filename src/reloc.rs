//! Relocation records
//!
//! A compact, append-only log of instruction-region locations whose
//! embedded values may need revisiting. Records live at the top of the
//! code buffer and grow downward toward the instruction cursor; each
//! stores its pc as a delta from the previously recorded one, so the
//! log survives buffer growth without per-entry rebasing.

use crate::util::misc;

/// What kind of value the marked location embeds.
#[repr(u8)]
#[derive(Eq, Copy, Clone, Debug, PartialEq)]
pub enum RelocMode {
    /// A patchable call or jump target.
    CodeTarget        = 0,
    /// A reference to a managed object, carried as payload.
    EmbeddedObject    = 1,
    /// A plain external reference; recorded only when the code will be
    /// serialized or debug verification is on.
    ExternalReference = 2,
    /// A position inside the code object itself.
    InternalReference = 3,
    /// A deoptimization bookkeeping entry, carried as payload.
    DeoptReason       = 4,
}

impl RelocMode {
    /// Whether records of this mode carry a payload word.
    #[inline(always)]
    pub const fn has_data(self) -> bool {
        matches!{
            self,
            RelocMode::EmbeddedObject
                | RelocMode::ExternalReference
                | RelocMode::DeoptReason
        }
    }

    #[inline(always)]
    #[track_caller]
    pub(crate) fn from_u8(tag: u8) -> RelocMode {
        match tag {
            0 => RelocMode::CodeTarget,
            1 => RelocMode::EmbeddedObject,
            2 => RelocMode::ExternalReference,
            3 => RelocMode::InternalReference,
            4 => RelocMode::DeoptReason,
            _ => panic!("corrupt relocation record: unknown mode tag {tag}"),
        }
    }

    #[inline(always)]
    const fn record_size(self) -> usize {
        if self.has_data() { 13 } else { 5 }
    }
}

/// One decoded relocation record.
#[derive(Eq, Copy, Clone, Debug, PartialEq)]
pub struct RelocEntry {
    pub mode: RelocMode,
    /// Byte offset of the marked instruction in the instruction region.
    pub pc_offset: usize,
    /// Payload for modes with [`RelocMode::has_data`], zero otherwise.
    pub data: i64,
}

/// Largest single record; emission head-room checks use this.
pub const MAX_RELOC_RECORD_SIZE: usize = 13;

/// Write one record ending at `pos`, returning the new (lower) cursor.
///
/// Record fields are laid out highest-address-first (mode tag on top)
/// so a reader can walk the log downward from the buffer top in
/// emission order.
pub(crate) fn write_record(
    bytes: &mut [u8],
    pos: usize,
    mode: RelocMode,
    pc_delta: u32,
    data: i64,
) -> usize {
    let pos = pos - mode.record_size();

    let mut at = pos;
    if mode.has_data() {
        bytes[at..at + 8].copy_from_slice(&data.to_le_bytes());
        at += 8;
    }
    bytes[at..at + 4].copy_from_slice(&pc_delta.to_le_bytes());
    bytes[at + 4] = mode as u8;

    pos
}

/// Walk a relocation region, yielding records in emission order.
///
/// `bytes` is the relocation region exactly as stored, oldest record at
/// its top.
#[derive(Debug)]
pub struct RelocIter<'a> {
    bytes: &'a [u8],
    pos: usize,
    pc: usize,
}

impl<'a> RelocIter<'a> {
    #[inline(always)]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: bytes.len(), pc: 0 }
    }
}

impl Iterator for RelocIter<'_> {
    type Item = RelocEntry;

    fn next(&mut self) -> Option<RelocEntry> {
        if self.pos == 0 {
            return None
        }

        let mode = RelocMode::from_u8(self.bytes[self.pos - 1]);
        let delta = misc::le_bytes_into_int::<u32>(
            &self.bytes[self.pos - 5..self.pos - 1]
        );
        let data = if mode.has_data() {
            misc::le_bytes_into_int::<i64>(
                &self.bytes[self.pos - 13..self.pos - 5]
            )
        } else {
            0
        };

        self.pos -= mode.record_size();
        self.pc += delta as usize;

        Some(RelocEntry { mode, pc_offset: self.pc, data })
    }
}
