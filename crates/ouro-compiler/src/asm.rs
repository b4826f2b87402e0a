//! Two-pass inline assembler (spec section 4.3, "Inline Assembly").
//!
//! Pass 1 scans the instruction list, assigning a byte offset to every
//! label and picking the narrowest immediate width each operand fits in.
//! Pass 2 re-walks the same list with offsets known and emits bytes. Two
//! passes are needed because a forward jump's target offset isn't known
//! until every instruction ahead of it has been sized.

use std::collections::HashMap;

use ouro_core::asmreg::{self, Register as VmRegister};
use ouro_core::opcode::{ImmWidth, Opcode};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AsmError {
    #[error("unknown mnemonic '{0}'")]
    UnknownMnemonic(String),
    #[error("unknown register '{0}'")]
    UnknownRegister(String),
    #[error("undefined label '{0}'")]
    UndefinedLabel(String),
    #[error("duplicate label '{0}'")]
    DuplicateLabel(String),
    #[error("malformed operand in '{0}'")]
    MalformedOperand(String),
}

/// One decoded line of `@asm` source.
#[derive(Debug, Clone)]
enum AsmLine {
    Label(String),
    Insn { mnemonic: String, operands: Vec<String> },
}

/// An effective address in x86 syntax: `[base + index*scale + disp]`.
#[derive(Debug, Clone, Copy)]
struct EffectiveAddress {
    base: Option<VmRegister>,
    disp: i64,
}

pub struct Assembler {
    lines: Vec<AsmLine>,
    labels: HashMap<String, u32>,
    origin_line: u32,
}

/// A fully assembled `@asm` block: raw bytecode plus the registers it reads
/// so the emitter can splice it into the surrounding function body.
pub struct AssembledBlock {
    pub bytes: Vec<u8>,
}

impl Assembler {
    pub fn new(raw_text: &str, origin_line: u32) -> Self {
        Assembler {
            lines: parse_lines(raw_text),
            labels: HashMap::new(),
            origin_line,
        }
    }

    pub fn assemble(&mut self) -> Result<AssembledBlock, AsmError> {
        let sizes = self.first_pass()?;
        let bytes = self.second_pass(&sizes)?;
        Ok(AssembledBlock { bytes })
    }

    fn first_pass(&mut self) -> Result<Vec<u32>, AsmError> {
        let mut offset = 0u32;
        let mut sizes = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            match line {
                AsmLine::Label(name) => {
                    if self.labels.insert(name.clone(), offset).is_some() {
                        return Err(AsmError::DuplicateLabel(name.clone()));
                    }
                    sizes.push(0);
                }
                AsmLine::Insn { mnemonic, operands } => {
                    let size = instruction_size(mnemonic, operands)?;
                    sizes.push(size);
                    offset += size;
                }
            }
        }
        Ok(sizes)
    }

    fn second_pass(&self, sizes: &[u32]) -> Result<Vec<u8>, AsmError> {
        let mut out = Vec::new();
        let mut offset = 0u32;
        for (line, size) in self.lines.iter().zip(sizes.iter()) {
            match line {
                AsmLine::Label(_) => {}
                AsmLine::Insn { mnemonic, operands } => {
                    encode_instruction(mnemonic, operands, &self.labels, offset, &mut out)?;
                }
            }
            offset += size;
        }
        Ok(out)
    }
}

fn parse_lines(raw_text: &str) -> Vec<AsmLine> {
    let mut lines = Vec::new();
    for raw_line in raw_text.lines() {
        let line = raw_line.split(';').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        if let Some(label) = line.strip_suffix(':') {
            lines.push(AsmLine::Label(label.trim().to_string()));
            continue;
        }
        let mut parts = line.splitn(2, char::is_whitespace);
        let mnemonic = parts.next().unwrap_or("").to_string();
        let operands = parts
            .next()
            .unwrap_or("")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        lines.push(AsmLine::Insn { mnemonic, operands });
    }
    lines
}

fn resolve_register(name: &str) -> Result<VmRegister, AsmError> {
    asmreg::resolve_alias(name).ok_or_else(|| AsmError::UnknownRegister(name.to_string()))
}

fn parse_effective_address(operand: &str) -> Result<EffectiveAddress, AsmError> {
    let inner = operand
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| AsmError::MalformedOperand(operand.to_string()))?;
    let inner = inner.trim();
    if let Some((base_str, disp_str)) = inner.split_once('+') {
        let base = resolve_register(base_str.trim())?;
        let disp = disp_str
            .trim()
            .parse::<i64>()
            .map_err(|_| AsmError::MalformedOperand(operand.to_string()))?;
        Ok(EffectiveAddress { base: Some(base), disp })
    } else if let Some((base_str, disp_str)) = inner.split_once('-') {
        let base = resolve_register(base_str.trim())?;
        let disp = disp_str
            .trim()
            .parse::<i64>()
            .map_err(|_| AsmError::MalformedOperand(operand.to_string()))?;
        Ok(EffectiveAddress { base: Some(base), disp: -disp })
    } else {
        let base = resolve_register(inner)?;
        Ok(EffectiveAddress { base: Some(base), disp: 0 })
    }
}

/// Operand-size estimate used by pass 1; mirrors the encoding `second_pass`
/// actually performs below.
fn instruction_size(mnemonic: &str, operands: &[String]) -> Result<u32, AsmError> {
    let mnemonic_lower = mnemonic.to_ascii_lowercase();
    let base = 2u32; // opcode
    Ok(match mnemonic_lower.as_str() {
        "mov" => {
            if operands.len() != 2 {
                return Err(AsmError::MalformedOperand(mnemonic.to_string()));
            }
            // PUSH/LOAD_REG for the source, then DUP + STORE_REG so the
            // moved value lands in both the register file and the stack
            // (the latter keeps existing stack-flow behaviour intact).
            let source_size = if let Ok(imm) = operands[1].parse::<i64>() {
                base + 1 + ImmWidth::narrowest_for(imm) as u32
            } else {
                base + 1 + ImmWidth::W1 as u32 // LOAD_REG, register index always fits W1
            };
            source_size + base + (base + 1 + ImmWidth::W1 as u32)
        }
        "add" | "sub" | "and" | "or" | "xor" | "cmp" => base,
        "push" => {
            if let Ok(imm) = operands.first().map(|s| s.as_str()).unwrap_or("").parse::<i64>() {
                base + 1 + ImmWidth::narrowest_for(imm) as u32
            } else {
                base
            }
        }
        "pop" | "inc" | "dec" | "neg" | "not" | "ret" | "nop" | "halt" => base,
        "jmp" | "je" | "jne" | "jl" | "jg" | "jge" | "jle" | "ja" | "jb" | "jae" | "jbe" | "jz" | "jnz" | "call" => {
            base + 1 + ImmWidth::W4 as u32
        }
        "int" | "syscall" => base + 1 + ImmWidth::W1 as u32,
        _ => return Err(AsmError::UnknownMnemonic(mnemonic.to_string())),
    })
}

fn push_immediate(out: &mut Vec<u8>, value: i64) {
    let width = ImmWidth::narrowest_for(value);
    out.push(width as u8);
    match width {
        ImmWidth::W1 => out.push(value as i8 as u8),
        ImmWidth::W2 => out.extend_from_slice(&(value as i16).to_le_bytes()),
        ImmWidth::W4 => out.extend_from_slice(&(value as i32).to_le_bytes()),
        ImmWidth::W8 => out.extend_from_slice(&value.to_le_bytes()),
    }
}

fn push_opcode(out: &mut Vec<u8>, op: Opcode) {
    out.extend_from_slice(&(op as u16).to_le_bytes());
}

fn encode_instruction(
    mnemonic: &str,
    operands: &[String],
    labels: &HashMap<String, u32>,
    current_offset: u32,
    out: &mut Vec<u8>,
) -> Result<(), AsmError> {
    let mnemonic_lower = mnemonic.to_ascii_lowercase();
    match mnemonic_lower.as_str() {
        "mov" => {
            let dst = &operands[0];
            let src = &operands[1];
            // Memory-operand destinations have no register-file slot; fall
            // back to ACC, matching the stub treatment memory addressing
            // already got before the register file existed.
            let dst_reg = resolve_register(dst).or_else(|_| parse_effective_address(dst).map(|_| VmRegister::ACC))?;
            if let Ok(imm) = src.parse::<i64>() {
                push_opcode(out, Opcode::PUSH);
                push_immediate(out, imm);
            } else {
                let src_reg = resolve_register(src)?;
                push_opcode(out, Opcode::LOAD_REG);
                push_immediate(out, src_reg.index() as i64);
            }
            push_opcode(out, Opcode::DUP);
            push_opcode(out, Opcode::STORE_REG);
            push_immediate(out, dst_reg.index() as i64);
        }
        "add" => {
            push_opcode(out, Opcode::ADD);
        }
        "sub" => {
            push_opcode(out, Opcode::SUB);
        }
        "and" => push_opcode(out, Opcode::AND),
        "or" => push_opcode(out, Opcode::OR),
        "xor" => push_opcode(out, Opcode::XOR),
        "not" => push_opcode(out, Opcode::NOT),
        "neg" => push_opcode(out, Opcode::NEG),
        "cmp" => push_opcode(out, Opcode::CMP),
        "push" => {
            push_opcode(out, Opcode::PUSH);
            let imm = operands
                .first()
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0);
            push_immediate(out, imm);
        }
        "pop" => push_opcode(out, Opcode::POP),
        "inc" => {
            push_opcode(out, Opcode::PUSH);
            push_immediate(out, 1);
            push_opcode(out, Opcode::ADD);
        }
        "dec" => {
            push_opcode(out, Opcode::PUSH);
            push_immediate(out, 1);
            push_opcode(out, Opcode::SUB);
        }
        "ret" => push_opcode(out, Opcode::RET),
        "nop" => push_opcode(out, Opcode::NOP),
        "halt" => push_opcode(out, Opcode::HALT),
        "jmp" | "je" | "jne" | "jl" | "jg" | "jge" | "jle" | "ja" | "jb" | "jae" | "jbe" | "jz" | "jnz" => {
            let opcode = match mnemonic_lower.as_str() {
                "jmp" => Opcode::JMP,
                "je" => Opcode::JE,
                "jne" => Opcode::JNE,
                "jl" => Opcode::JL,
                "jg" => Opcode::JG,
                "jge" => Opcode::JAE,
                "jle" => Opcode::JBE,
                "ja" => Opcode::JA,
                "jb" => Opcode::JB,
                "jae" => Opcode::JAE,
                "jbe" => Opcode::JBE,
                "jz" => Opcode::JZ,
                "jnz" => Opcode::JNZ,
                _ => unreachable!(),
            };
            let label = operands.first().ok_or_else(|| AsmError::MalformedOperand(mnemonic.to_string()))?;
            let target = *labels
                .get(label.as_str())
                .ok_or_else(|| AsmError::UndefinedLabel(label.clone()))?;
            push_opcode(out, opcode);
            push_immediate(out, target as i64 - current_offset as i64);
        }
        "call" => {
            let label = operands.first().ok_or_else(|| AsmError::MalformedOperand(mnemonic.to_string()))?;
            let target = *labels
                .get(label.as_str())
                .ok_or_else(|| AsmError::UndefinedLabel(label.clone()))?;
            push_opcode(out, Opcode::CALL);
            push_immediate(out, target as i64);
        }
        "int" => {
            push_opcode(out, Opcode::INT);
            let imm = operands.first().and_then(|s| s.parse::<i64>().ok()).unwrap_or(0);
            push_immediate(out, imm);
        }
        "syscall" => {
            push_opcode(out, Opcode::SYSCALL);
            let imm = operands.first().and_then(|s| s.parse::<i64>().ok()).unwrap_or(0);
            push_immediate(out, imm);
        }
        _ => return Err(AsmError::UnknownMnemonic(mnemonic.to_string())),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_push_add_ret() {
        let mut asm = Assembler::new("push 1\npush 2\nadd\nret", 0);
        let block = asm.assemble().unwrap();
        assert!(!block.bytes.is_empty());
    }

    #[test]
    fn resolves_forward_label_jump() {
        let mut asm = Assembler::new("jmp done\npush 1\ndone:\nret", 0);
        let block = asm.assemble().unwrap();
        assert!(!block.bytes.is_empty());
    }

    #[test]
    fn x86_register_aliases_accepted() {
        assert_eq!(resolve_register("eax").unwrap(), VmRegister::R0);
        assert_eq!(resolve_register("rbx").unwrap(), VmRegister::R1);
    }

    #[test]
    fn undefined_label_is_an_error() {
        let mut asm = Assembler::new("jmp nowhere\nret", 0);
        assert!(matches!(asm.assemble(), Err(AsmError::UndefinedLabel(_))));
    }

    #[test]
    fn duplicate_label_is_an_error() {
        let mut asm = Assembler::new("a:\nret\na:\nret", 0);
        assert!(matches!(asm.assemble(), Err(AsmError::DuplicateLabel(_))));
    }
}
