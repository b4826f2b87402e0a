//! The inline-assembler register file: 12 architectural registers
//! (`R0..R7, SP, FP, PC, ACC`), plus the x86-mnemonic alias table.
//!
//! Design Note (spec section 9): "the assembler names x86-style registers
//! but encodes them to a 12-register VM file. Keep the mapping in a single
//! source-of-truth table consumed by both the assembler and the VM's
//! register accessors." This module is that table — `ouro-compiler`'s
//! assembler and `ouro-vm`'s register accessors both depend on it instead
//! of duplicating the alias list.

/// The 12 VM-level architectural registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Register {
    R0 = 0,
    R1 = 1,
    R2 = 2,
    R3 = 3,
    R4 = 4,
    R5 = 5,
    R6 = 6,
    R7 = 7,
    SP = 8,
    FP = 9,
    PC = 10,
    ACC = 11,
}

pub const REGISTER_COUNT: usize = 12;

impl Register {
    pub fn index(self) -> usize {
        self as u8 as usize
    }

    pub fn from_index(index: usize) -> Option<Register> {
        Some(match index {
            0 => Register::R0,
            1 => Register::R1,
            2 => Register::R2,
            3 => Register::R3,
            4 => Register::R4,
            5 => Register::R5,
            6 => Register::R6,
            7 => Register::R7,
            8 => Register::SP,
            9 => Register::FP,
            10 => Register::PC,
            11 => Register::ACC,
            _ => return None,
        })
    }
}

/// Resolve an x86-style mnemonic (any width alias) to its VM register.
///
/// `eax`/`rax`/`ax`/`al` all alias `R0`, and so on through `R3`; `esp`/`rsp`
/// aliases `SP`, `ebp`/`rbp` aliases `FP`, `eip`/`rip` aliases `PC`. Lookup
/// is case-insensitive.
pub fn resolve_alias(name: &str) -> Option<Register> {
    let lower = name.to_ascii_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, reg)| *reg)
}

/// Canonical VM-register name, used when the assembler re-emits a
/// disassembly or an error message.
pub fn canonical_name(reg: Register) -> &'static str {
    match reg {
        Register::R0 => "R0",
        Register::R1 => "R1",
        Register::R2 => "R2",
        Register::R3 => "R3",
        Register::R4 => "R4",
        Register::R5 => "R5",
        Register::R6 => "R6",
        Register::R7 => "R7",
        Register::SP => "SP",
        Register::FP => "FP",
        Register::PC => "PC",
        Register::ACC => "ACC",
    }
}

const ALIASES: &[(&str, Register)] = &[
    ("r0", Register::R0),
    ("eax", Register::R0),
    ("rax", Register::R0),
    ("ax", Register::R0),
    ("al", Register::R0),
    ("r1", Register::R1),
    ("ebx", Register::R1),
    ("rbx", Register::R1),
    ("bx", Register::R1),
    ("bl", Register::R1),
    ("r2", Register::R2),
    ("ecx", Register::R2),
    ("rcx", Register::R2),
    ("cx", Register::R2),
    ("cl", Register::R2),
    ("r3", Register::R3),
    ("edx", Register::R3),
    ("rdx", Register::R3),
    ("dx", Register::R3),
    ("dl", Register::R3),
    ("r4", Register::R4),
    ("esi", Register::R4),
    ("rsi", Register::R4),
    ("si", Register::R4),
    ("r5", Register::R5),
    ("edi", Register::R5),
    ("rdi", Register::R5),
    ("di", Register::R5),
    ("r6", Register::R6),
    ("r8", Register::R6),
    ("r6d", Register::R6),
    ("r7", Register::R7),
    ("r9", Register::R7),
    ("r7d", Register::R7),
    ("sp", Register::SP),
    ("esp", Register::SP),
    ("rsp", Register::SP),
    ("fp", Register::FP),
    ("ebp", Register::FP),
    ("rbp", Register::FP),
    ("pc", Register::PC),
    ("eip", Register::PC),
    ("rip", Register::PC),
    ("acc", Register::ACC),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x86_width_aliases_map_to_same_register() {
        for alias in ["eax", "rax", "ax", "al"] {
            assert_eq!(resolve_alias(alias), Some(Register::R0));
        }
    }

    #[test]
    fn unknown_mnemonic_has_no_alias() {
        assert_eq!(resolve_alias("zmm0"), None);
    }

    #[test]
    fn register_index_roundtrips() {
        for i in 0..REGISTER_COUNT {
            let reg = Register::from_index(i).unwrap();
            assert_eq!(reg.index(), i);
        }
    }
}
