//! Frame prologue/epilogue emission
//!
//! The emitter only knows the canonical instruction shape; every slot
//! offset is a compile-time constant supplied by the frame-layout
//! specification of the embedding runtime.

use crate::reg::Reg;
use crate::emit::{Emitter, POINTER_SIZE};
use crate::reloc::RelocMode;

/// The two frame shapes this layer can emit.
#[derive(Eq, Copy, Clone, Debug, PartialEq)]
pub enum FrameKind {
    /// Plain frame: return address, caller frame pointer, type marker.
    Standard,
    /// Adds a code-object slot at the bottom of the fixed area.
    Internal,
}

/// Slot offsets of one frame shape. Prologue offsets are relative to
/// the decremented stack pointer; epilogue offsets are relative to the
/// frame pointer.
#[derive(Eq, Copy, Clone, Debug, PartialEq)]
pub struct FrameLayout {
    /// Prologue stack-pointer decrement.
    pub frame_size: i16,
    pub ra_offset: i16,
    pub fp_offset: i16,
    pub marker_offset: i16,
    /// Internal frames only: code-object slot.
    pub code_offset: i16,
    /// Where the incoming stack pointer sits relative to fp.
    pub caller_sp_offset: i16,
    pub epilogue_ra_offset: i16,
    pub epilogue_fp_offset: i16,
}

impl FrameLayout {
    /// The canonical standard-frame layout for a pointer size.
    pub const fn standard(pointer_size: i16) -> Self {
        Self {
            frame_size: 3 * pointer_size,
            ra_offset: 2 * pointer_size,
            fp_offset: pointer_size,
            marker_offset: 0,
            code_offset: 0,
            caller_sp_offset: 2 * pointer_size,
            epilogue_ra_offset: pointer_size,
            epilogue_fp_offset: 0,
        }
    }

    /// The canonical internal-frame layout for a pointer size.
    pub const fn internal(pointer_size: i16) -> Self {
        Self {
            frame_size: 4 * pointer_size,
            ra_offset: 3 * pointer_size,
            fp_offset: 2 * pointer_size,
            marker_offset: pointer_size,
            code_offset: 0,
            caller_sp_offset: 2 * pointer_size,
            epilogue_ra_offset: pointer_size,
            epilogue_fp_offset: 0,
        }
    }
}

/// Default layouts for this emitter's pointer size.
pub const STANDARD_FRAME: FrameLayout = FrameLayout::standard(POINTER_SIZE);
pub const INTERNAL_FRAME: FrameLayout = FrameLayout::internal(POINTER_SIZE);

impl Emitter<'_> {
    /// Emit a frame prologue: decrement sp, store return address,
    /// caller fp and the frame-type marker at their slots; internal
    /// frames additionally store the code-object reference, emitted
    /// fixed-length so the slot initializer can be patched, with an
    /// embedded-object relocation.
    pub fn enter_frame(
        &mut self,
        kind: FrameKind,
        layout: &FrameLayout,
        marker: i64,
        code_object: Option<i64>,
    ) -> usize {
        let offset = self.emit_addi(Reg::SP, Reg::SP, -layout.frame_size);
        self.emit_sd(Reg::SP, Reg::RA, layout.ra_offset);
        self.emit_sd(Reg::SP, Reg::FP, layout.fp_offset);

        self.load_imm_smallest(Reg::T6, marker);
        self.emit_sd(Reg::SP, Reg::T6, layout.marker_offset);

        if kind == FrameKind::Internal {
            let code_object =
                code_object.expect("internal frames store a code object reference");
            self.record_reloc(RelocMode::EmbeddedObject, code_object);
            self.load_imm(Reg::T6, code_object);
            self.emit_sd(Reg::SP, Reg::T6, layout.code_offset);
        }

        offset
    }

    /// Emit a frame epilogue: restore sp from fp, then reload the
    /// return address and the caller's fp through the old fp.
    pub fn leave_frame(&mut self, layout: &FrameLayout) -> usize {
        let offset = self.emit_addi(Reg::SP, Reg::FP, layout.caller_sp_offset);
        self.emit_ld(Reg::RA, Reg::FP, layout.epilogue_ra_offset);
        self.emit_ld(Reg::FP, Reg::FP, layout.epilogue_fp_offset);
        offset
    }
}
