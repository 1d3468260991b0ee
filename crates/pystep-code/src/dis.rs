//! Disassembler for [`CodeObject`]s.
//!
//! Produces one line per two-byte instruction: offset, mnemonic, operand,
//! and an annotation resolved through the instruction table's operand
//! kinds. Malformed streams (unknown opcode bytes, an odd trailing byte)
//! render as diagnostics rather than erroring, so a driver can always dump
//! whatever it was handed.

use std::fmt::{Debug, Write};

use crate::code::CodeObject;
use crate::opcode::{CompareKind, Opcode, OperandKind};

/// Disassemble a full instruction stream.
pub fn disassemble<V: Debug>(code: &CodeObject<V>) -> String {
    let mut out = String::new();
    let bytes = &code.instructions;
    let mut offset = 0;
    while offset < bytes.len() {
        if offset + 2 > bytes.len() {
            let _ = writeln!(out, "{offset:>5}  <truncated instruction: 0x{:02x}>", bytes[offset]);
            break;
        }
        let (byte, arg) = (bytes[offset], bytes[offset + 1]);
        match Opcode::from_u8(byte) {
            Some(op) => {
                let _ = writeln!(out, "{offset:>5}  {}", format_instruction(code, offset, op, arg));
            }
            None => {
                let _ = writeln!(out, "{offset:>5}  <unknown opcode 0x{byte:02x}> {arg}");
            }
        }
        offset += 2;
    }
    out
}

/// Render a single decoded instruction (without its offset column).
pub fn format_instruction<V: Debug>(
    code: &CodeObject<V>,
    offset: usize,
    op: Opcode,
    arg: u8,
) -> String {
    let mut line = format!("{:<28}", op.mnemonic());
    if !op.has_operand() {
        return line.trim_end().to_string();
    }
    let _ = write!(line, "{arg:>4}");
    if let Some(note) = annotate(code, offset, op, arg) {
        let _ = write!(line, "  ({note})");
    }
    line
}

fn annotate<V: Debug>(code: &CodeObject<V>, offset: usize, op: Opcode, arg: u8) -> Option<String> {
    match op.operand_kind() {
        OperandKind::ConstIndex => Some(match code.const_at(arg) {
            Some(v) => format!("{v:?}"),
            None => "<const out of range>".to_string(),
        }),
        OperandKind::NameIndex => Some(
            code.name_at(arg)
                .map(str::to_string)
                .unwrap_or_else(|| "<name out of range>".to_string()),
        ),
        OperandKind::LocalIndex => Some(
            code.varname_at(arg)
                .map(str::to_string)
                .unwrap_or_else(|| "<varname out of range>".to_string()),
        ),
        OperandKind::JumpRelative => Some(format!("to {}", offset + 2 + arg as usize)),
        OperandKind::JumpAbsolute => Some(format!("to {arg}")),
        OperandKind::CompareKind => Some(
            CompareKind::from_u8(arg)
                .map(|k| k.symbol().to_string())
                .unwrap_or_else(|| "<invalid comparison>".to_string()),
        ),
        OperandKind::None | OperandKind::Count | OperandKind::Flags => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::Asm;

    #[test]
    fn test_annotations() {
        let mut asm: Asm<i64> = Asm::new();
        asm.load_const(42).unwrap();
        asm.store_name("answer").unwrap();
        let end = asm.label();
        asm.jump_rel(Opcode::JumpForward, end);
        asm.bind(end);
        asm.op(Opcode::ReturnValue);
        let code = asm.finish().unwrap();

        let text = disassemble(&code);
        assert!(text.contains("LOAD_CONST"), "{text}");
        assert!(text.contains("(42)"), "{text}");
        assert!(text.contains("(answer)"), "{text}");
        assert!(text.contains("JUMP_FORWARD"), "{text}");
        assert!(text.contains("(to 6)"), "{text}");
        assert!(text.contains("RETURN_VALUE"), "{text}");
    }

    #[test]
    fn test_unknown_and_truncated_bytes_render() {
        let code = CodeObject::<i64> {
            instructions: vec![6, 0, 83],
            consts: vec![],
            names: vec![],
            varnames: vec![],
        };
        let text = disassemble(&code);
        assert!(text.contains("<unknown opcode 0x06>"), "{text}");
        assert!(text.contains("<truncated instruction: 0x53>"), "{text}");
    }

    #[test]
    fn test_compare_symbol() {
        let mut asm: Asm<i64> = Asm::new();
        asm.compare_op(CompareKind::NotIn);
        let code = asm.finish().unwrap();
        assert!(disassemble(&code).contains("(not in)"));
    }
}
