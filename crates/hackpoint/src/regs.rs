//! Register snapshot handed to breakpoint handlers.

use strum::{Display, EnumIter, EnumString};

/// General purpose registers of the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Register {
    Eax,
    Ecx,
    Edx,
    Ebx,
    Esp,
    Ebp,
    Esi,
    Edi,
}

/// Register state captured by the trampoline stub.
///
/// The layout mirrors what the stub leaves on the stack: the `PUSHAD` block
/// (lowest address first), then the flags pushed before it, then the return
/// address pushed by the `CALL` written at the patched site.
///
/// `esp` is the stack pointer of the interrupted code, i.e. the address just
/// above `retaddr`. Handlers may change it; see [`crate::dispatch`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct X86Regs {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub flags: u32,
    pub retaddr: u32,
}

/// Byte size of the saved block, which is also the fixed distance between
/// the block and the interrupted stack pointer.
pub const SNAPSHOT_SIZE: usize = std::mem::size_of::<X86Regs>();

impl X86Regs {
    pub fn get(&self, reg: Register) -> u32 {
        match reg {
            Register::Eax => self.eax,
            Register::Ecx => self.ecx,
            Register::Edx => self.edx,
            Register::Ebx => self.ebx,
            Register::Esp => self.esp,
            Register::Ebp => self.ebp,
            Register::Esi => self.esi,
            Register::Edi => self.edi,
        }
    }

    pub fn get_mut(&mut self, reg: Register) -> &mut u32 {
        match reg {
            Register::Eax => &mut self.eax,
            Register::Ecx => &mut self.ecx,
            Register::Edx => &mut self.edx,
            Register::Ebx => &mut self.ebx,
            Register::Esp => &mut self.esp,
            Register::Ebp => &mut self.ebp,
            Register::Esi => &mut self.esi,
            Register::Edi => &mut self.edi,
        }
    }

    /// Look up a register by its name ("eax", "ESP", ...).
    pub fn by_name_mut(&mut self, name: &str) -> Option<&mut u32> {
        name.trim().parse::<Register>().ok().map(|reg| self.get_mut(reg))
    }

    /// Resolve a register named by a string field of a handler's configuration.
    pub fn config_register_mut(
        &mut self,
        config: &serde_json::Value,
        key: &str,
    ) -> Option<&mut u32> {
        let name = config.get(key)?.as_str()?;
        self.by_name_mut(name)
    }
}
