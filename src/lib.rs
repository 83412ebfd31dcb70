// TODO: C-extension (compressed) encodings would halve call-site sizes
// TODO: 64-bit absolute patch targets (the two-word form caps out below 4 GiB)

//! RV64 machine-code emission layer
//!
//! The pieces a code generator needs below instruction selection: a
//! bit-exact instruction encoder for the R/I/IS/S/U formats, a code
//! buffer that grows instructions upward and relocation records
//! downward inside one region, a two-instruction address patching
//! protocol for calls and embedded pointers, shortest-sequence
//! constant materialization, and frame prologue/epilogue emission.
//!
//! ```
//! use ingot::emit::{Emitter, EmitterOptions};
//! use ingot::patch::FlushMode;
//! use ingot::reg::Reg;
//!
//! let mut e = Emitter::new(4096, EmitterOptions::default());
//! e.load_imm_smallest(Reg::A0, 42);
//! let call = e.emit_patchable_call();
//! e.emit_ret();
//!
//! let target = e.base_address() + 0x100;
//! e.patch_address_at(call, target, FlushMode::Skip);
//! assert_eq!(e.read_address_at(call), target);
//!
//! let code = e.finish();
//! assert_eq!(code.instr_size(), 16);
//! ```

pub mod util;

pub mod reg;
pub mod op;
pub mod encode;
pub mod buffer;
pub mod reloc;
pub mod patch;
pub mod imm;
pub mod emit;
pub mod frame;

pub use reg::{Reg, FReg};
pub use encode::Xlen;
pub use buffer::{CodeBuffer, CodeDesc, GAP, DEFAULT_MAX_BUFFER_SIZE};
pub use reloc::{RelocMode, RelocEntry, RelocIter};
pub use patch::{FlushMode, FlushFn, flush_none};
pub use emit::{Emitter, EmitterOptions};
pub use frame::{FrameKind, FrameLayout};
