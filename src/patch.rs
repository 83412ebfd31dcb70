//! In-place patching of two-instruction address patterns
//!
//! Calls and embedded data pointers are emitted as an upper-immediate
//! word followed by a word with a 12-bit immediate. The pair encodes
//! either a PC-relative delta (`auipc` + low part, the normal form) or,
//! when the delta leaves the signed 32-bit range, an absolute sub-4-GiB
//! address (`lui` + low part). Patching rewrites only the immediate
//! fields and the first word's opcode; destination and source register
//! bits survive.
//!
//! All functions are keyed by in-buffer byte offsets plus the base
//! address the code lives at, so they work both during emission and on
//! installed code.

use crate::util::misc::{self, word_at, set_word_at};
use crate::op::{self, OpI, OpU, I_IMM_MASK};
use crate::encode::{encode_u, decode_rd, decode_u_imm, decode_i_imm};

use log::trace;

/// Instruction-cache flush collaborator. Platform-specific and out of
/// scope here; JIT installers supply the real one.
pub type FlushFn = fn(addr: *const u8, len: usize);

/// No-op flush, for hosts where the emitted code is never executed or
/// the platform needs none.
pub fn flush_none(_addr: *const u8, _len: usize) {}

/// Whether a patch must flush the instruction cache over the bytes it
/// rewrote. Skipping is only sound while no other execution context
/// can observe the target address.
#[derive(Eq, Copy, Clone, Debug, PartialEq)]
pub enum FlushMode {
    FlushIfNeeded,
    Skip,
}

/// Byte length of the call sequence (`auipc` + `jalr`).
pub const CALL_SEQUENCE_SIZE: u64 = 8;

/// Recover the call-site address from the return address pushed by the
/// call sequence. Used by stack walkers and deoptimization.
///
/// ```
/// use ingot::patch::call_site_from_return_address;
///
/// assert_eq!(call_site_from_return_address(0x1020), 0x1018);
/// ```
#[inline(always)]
pub const fn call_site_from_return_address(return_address: u64) -> u64 {
    return_address - CALL_SEQUENCE_SIZE
}

/// Rewrite the pair at `offset` to reach `target`.
///
/// Picks the PC-relative form when `target - (base + offset)` fits the
/// signed 32-bit range and the absolute form otherwise; an absolute
/// target at or above 4 GiB is a fatal encoding error.
#[track_caller]
pub fn patch_address(
    code: &mut [u8],
    offset: usize,
    base: u64,
    target: u64,
    flush: FlushFn,
    flush_mode: FlushMode,
) {
    let first = word_at(code, offset);
    let second = word_at(code, offset + 4);
    assert!{
        op::is_u(first, OpU::AUIPC) || op::is_u(first, OpU::LUI),
        "patch site does not start with auipc/lui: {first:#010x}"
    };
    assert!{
        op::is_i(second, OpI::JALR) || op::is_i(second, OpI::LD),
        "patch site does not continue with jalr/ld: {second:#010x}"
    };

    let pc = base.wrapping_add(offset as u64);
    let delta = target.wrapping_sub(pc) as i64;

    // the +0x800 rounding must not push the upper part out of range
    let pcrel_representable =
        delta >= i32::MIN as i64 && delta <= (i32::MAX - 0x7FF) as i64;

    let (new_first, lo) = if pcrel_representable {
        let hi = ((delta + 0x800) >> 12) as i32;
        let lo = (delta - ((hi as i64) << 12)) as i32;
        (encode_u(OpU::AUIPC, decode_rd(first), hi), lo)
    } else {
        assert!{
            target < 1 << 32,
            "absolute patch target above 4 GiB is not encodable: {target:#x}"
        };
        let t32 = target as u32;
        let hi = (t32.wrapping_add(0x800) >> 12) & 0xfffff;
        let hi = if hi >= 0x80000 { hi as i32 - 0x100000 } else { hi as i32 };
        let lo = misc::sext12((t32 & 0xfff) as i64);
        (encode_u(OpU::LUI, decode_rd(first), hi), lo)
    };

    let new_second = (second & !I_IMM_MASK) | (((lo as u32) & 0xfff) << 20);
    set_word_at(code, offset, new_first);
    set_word_at(code, offset + 4, new_second);

    trace!{
        "patched address at {pc:#x} -> {target:#x} ({form})",
        form = if pcrel_representable { "pc-relative" } else { "absolute" }
    };

    if flush_mode != FlushMode::Skip {
        flush(code[offset..].as_ptr(), CALL_SEQUENCE_SIZE as usize);
    }
}

/// Read back the target encoded by the pair at `offset`; the exact
/// inverse of [`patch_address`] for both forms.
#[track_caller]
pub fn read_address(code: &[u8], offset: usize, base: u64) -> u64 {
    let first = word_at(code, offset);
    let second = word_at(code, offset + 4);
    let lo = decode_i_imm(second) as i64;
    let hi = decode_u_imm(first) as i64;

    if op::is_u(first, OpU::AUIPC) {
        let pc = base.wrapping_add(offset as u64);
        pc.wrapping_add(((hi << 12) + lo) as u64)
    } else {
        assert!{
            op::is_u(first, OpU::LUI),
            "address site does not start with auipc/lui: {first:#010x}"
        };
        (((hi << 12) + lo) as u64) & 0xffff_ffff
    }
}

/// Address computed by an `auipc` + `ld` embedded-pointer pair.
#[track_caller]
pub fn read_pointer_address(code: &[u8], offset: usize, base: u64) -> u64 {
    let first = word_at(code, offset);
    let second = word_at(code, offset + 4);
    assert!{
        op::is_u(first, OpU::AUIPC),
        "pointer site does not start with auipc: {first:#010x}"
    };
    assert!{
        op::is_i(second, OpI::LD),
        "pointer site does not continue with ld: {second:#010x}"
    };

    let hi = decode_u_imm(first) as i64;
    let lo = decode_i_imm(second) as i64;
    base.wrapping_add(offset as u64).wrapping_add(((hi << 12) + lo) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reg::Reg;
    use crate::encode::{encode_i, decode_rs1};

    // an unpatched call site: auipc t0, 0 / jalr ra, t0, 0
    fn call_site() -> Vec<u8> {
        let mut code = vec![0u8; 16];
        set_word_at(&mut code, 4, encode_u(OpU::AUIPC, Reg::T0, 0));
        set_word_at(&mut code, 8, encode_i(OpI::JALR, Reg::RA, Reg::T0, 0));
        code
    }

    #[test]
    fn pc_relative_round_trip() {
        const BASE: u64 = 0x4000_0000;

        let mut code = call_site();
        for target in [
            BASE + 4,              // delta 0
            BASE + 20,             // 16 bytes ahead of the site
            BASE,                  // backwards
            BASE + 0x7FF,
            BASE - 0x800,
            BASE + 0x7FFF_0000,
            BASE - 0x3FFF_FF00,
        ] {
            patch_address(&mut code, 4, BASE, target, flush_none, FlushMode::Skip);
            assert_eq!(read_address(&code, 4, BASE), target, "{target:#x}");
        }
    }

    #[test]
    fn absolute_fallback_round_trip() {
        // base high enough that low targets overflow the i32 delta
        const BASE: u64 = 0x60_0000_0000;

        let mut code = call_site();
        for target in [0u64, 0x800, 0x1234_5678, 0xFFFF_FFFF] {
            patch_address(&mut code, 4, BASE, target, flush_none, FlushMode::Skip);
            assert_eq!(read_address(&code, 4, BASE), target, "{target:#x}");
        }

        // and patching back to a reachable target restores the pc-relative form
        patch_address(&mut code, 4, BASE, BASE + 16, flush_none, FlushMode::Skip);
        assert_eq!(read_address(&code, 4, BASE), BASE + 16);
    }

    #[test]
    fn register_bits_survive_patching() {
        let mut code = call_site();
        patch_address(&mut code, 4, 0x1000, 0x2000, flush_none, FlushMode::Skip);

        let first = word_at(&code, 4);
        let second = word_at(&code, 8);
        assert_eq!(decode_rd(first), Reg::T0);
        assert_eq!(decode_rd(second), Reg::RA);
        assert_eq!(decode_rs1(second), Reg::T0);
        assert!(op::is_i(second, OpI::JALR));
    }

    #[test]
    fn flush_covers_exactly_the_patched_words() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static FLUSHED: AtomicUsize = AtomicUsize::new(0);
        fn counting_flush(_addr: *const u8, len: usize) {
            FLUSHED.fetch_add(len, Ordering::Relaxed);
        }

        let mut code = call_site();
        patch_address(&mut code, 4, 0x1000, 0x2000, counting_flush, FlushMode::FlushIfNeeded);
        assert_eq!(FLUSHED.load(Ordering::Relaxed), 8);
    }

    #[test]
    #[should_panic(expected = "above 4 GiB")]
    fn absolute_target_above_4gib_is_fatal() {
        let mut code = call_site();
        patch_address(&mut code, 4, 0x60_0000_0000, 1 << 33, flush_none, FlushMode::Skip);
    }

    #[test]
    #[should_panic(expected = "patch site")]
    fn patching_arbitrary_code_is_rejected() {
        let mut code = vec![0u8; 16];
        set_word_at(&mut code, 0, encode_i(OpI::ADDI, Reg::A0, Reg::A0, 1));
        set_word_at(&mut code, 4, encode_i(OpI::ADDI, Reg::A0, Reg::A0, 1));
        patch_address(&mut code, 0, 0x1000, 0x2000, flush_none, FlushMode::Skip);
    }

    #[test]
    fn pointer_pair_decodes_like_the_hardware() {
        const BASE: u64 = 0x7000_0000;

        let mut code = vec![0u8; 8];
        set_word_at(&mut code, 0, encode_u(OpU::AUIPC, Reg::A0, 0x10));
        set_word_at(&mut code, 4, encode_i(OpI::LD, Reg::A0, Reg::A0, -8));
        assert_eq!(read_pointer_address(&code, 0, BASE), BASE + 0x10000 - 8);
    }
}
