//! Trampoline stub template.

use std::borrow::Cow;

use crate::error::{Error, Result};
use crate::x86::{Addr, PTR_SIZE, write_u32};

/// Bytes reserved below the saved registers so the dispatcher can move the
/// block downwards without touching its own frame.
///
/// The dispatcher relocates the block by any delta, but with the default stub
/// a handler may lower `esp` by at most this many bytes. Larger downward moves
/// need a [`StubTemplate`] that reserves more.
pub const STUB_SCRATCH: u32 = 0x100;

/// Default i686 stub.
///
/// ```text
/// 00  9C                  pushfd
/// 01  60                  pushad
/// 02  83 44 24 0C 08      add  dword [esp+0Ch], 8     ; esp := caller esp
/// 07  89 E0               mov  eax, esp               ; &X86Regs
/// 09  81 EC 00 01 00 00   sub  esp, 100h
/// 0F  50                  push eax
/// 10  68 xx xx xx xx      push cave                   ; cave field at 11h
/// 15  68 xx xx xx xx      push descriptor             ; descriptor field at 16h
/// 1A  E8 xx xx xx xx      call dispatch               ; call field at 1Bh
/// 1F  81 C4 0C 01 00 00   add  esp, 10Ch
/// 25  01 C4               add  esp, eax               ; dispatcher's stack delta
/// 27  61                  popad
/// 28  9D                  popfd
/// 29  C3                  ret
/// 2A  CC x6
/// ```
const I686_STUB: [u8; 0x30] = [
    0x9C, //
    0x60, //
    0x83, 0x44, 0x24, 0x0C, 0x08, //
    0x89, 0xE0, //
    0x81, 0xEC, 0x00, 0x01, 0x00, 0x00, //
    0x50, //
    0x68, 0x00, 0x00, 0x00, 0x00, //
    0x68, 0x00, 0x00, 0x00, 0x00, //
    0xE8, 0x00, 0x00, 0x00, 0x00, //
    0x81, 0xC4, 0x0C, 0x01, 0x00, 0x00, //
    0x01, 0xC4, //
    0x61, //
    0x9D, //
    0xC3, //
    0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC,
];

const I686_CAVE_FIELD: usize = 0x11;
const I686_DESCRIPTOR_FIELD: usize = 0x16;
const I686_CALL_FIELD: usize = 0x1B;

/// Fixed-size stub with three 32-bit fields patched per instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubTemplate {
    bytes: Cow<'static, [u8]>,
    cave_field: usize,
    descriptor_field: usize,
    call_field: usize,
}

impl Default for StubTemplate {
    fn default() -> Self {
        Self::i686()
    }
}

impl StubTemplate {
    pub fn new(
        bytes: impl Into<Cow<'static, [u8]>>,
        cave_field: usize,
        descriptor_field: usize,
        call_field: usize,
    ) -> Result<Self> {
        let bytes = bytes.into();
        let mut fields = [
            ("cave", cave_field),
            ("descriptor", descriptor_field),
            ("call", call_field),
        ];

        for (label, offset) in fields {
            if offset + PTR_SIZE > bytes.len() {
                return Err(Error::InvalidStubTemplate(format!(
                    "{label} field at {offset:#x} exceeds template size {:#x}",
                    bytes.len()
                )));
            }
        }

        fields.sort_by_key(|(_, offset)| *offset);
        for pair in fields.windows(2) {
            if pair[0].1 + PTR_SIZE > pair[1].1 {
                return Err(Error::InvalidStubTemplate(format!(
                    "{} and {} fields overlap",
                    pair[0].0, pair[1].0
                )));
            }
        }

        Ok(Self {
            bytes,
            cave_field,
            descriptor_field,
            call_field,
        })
    }

    pub fn i686() -> Self {
        Self {
            bytes: Cow::Borrowed(&I686_STUB),
            cave_field: I686_CAVE_FIELD,
            descriptor_field: I686_DESCRIPTOR_FIELD,
            call_field: I686_CALL_FIELD,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn cave_field(&self) -> usize {
        self.cave_field
    }

    pub fn descriptor_field(&self) -> usize {
        self.descriptor_field
    }

    pub fn call_field(&self) -> usize {
        self.call_field
    }

    /// Copy of the template for placement at `at`.
    ///
    /// The call field is self-relative: `dispatch - field_address - PTR_SIZE`.
    pub fn instantiate(&self, at: Addr, cave: Addr, descriptor: Addr, dispatch: Addr) -> Vec<u8> {
        let mut stub = self.bytes.to_vec();
        write_u32(&mut stub, self.cave_field, cave);
        write_u32(&mut stub, self.descriptor_field, descriptor);

        let field_address = at.wrapping_add(self.call_field as u32);
        let disp = dispatch
            .wrapping_sub(field_address)
            .wrapping_sub(PTR_SIZE as u32);
        write_u32(&mut stub, self.call_field, disp);
        stub
    }
}
