//! Parses the textual assembly format into a [`ProgramImage`].
//!
//! The format is two tagged sections, `BEGIN DATA … END DATA` and
//! `BEGIN INSTRUCTION … END INSTRUCTION`. Anything outside those sections is
//! ignored. `#` and `;` introduce line comments. Malformed lines never abort
//! the parse; they're reported as [`LoaderWarning`]s and the affected cell
//! or address is simply left at its default.

use crate::cell::Cell;
use crate::engine::ProgramImage;
use crate::error::LoaderWarning;
use crate::opcode::{Opcode, SyscallKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Data,
    Instruction,
}

/// Parses `source` into a program image plus any warnings noticed along the
/// way. Never fails outright — an unparseable line is reported and skipped.
pub fn load(source: &str) -> (ProgramImage, Vec<LoaderWarning>) {
    let mut image = ProgramImage::default();
    let mut warnings = Vec::new();
    let mut section = Section::None;

    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "BEGIN DATA" => {
                section = Section::Data;
                continue;
            }
            "END DATA" => {
                section = Section::None;
                continue;
            }
            "BEGIN INSTRUCTION" => {
                section = Section::Instruction;
                continue;
            }
            "END INSTRUCTION" => {
                section = Section::None;
                continue;
            }
            _ => {}
        }

        match section {
            Section::None => {}
            Section::Data => parse_data_line(line, line_no, &mut image, &mut warnings),
            Section::Instruction => parse_instruction_line(line, line_no, &mut image, &mut warnings),
        }
    }

    (image, warnings)
}

fn strip_comment(line: &str) -> &str {
    let hash = line.find('#');
    let semi = line.find(';');
    match (hash, semi) {
        (Some(h), Some(s)) => &line[..h.min(s)],
        (Some(h), None) => &line[..h],
        (None, Some(s)) => &line[..s],
        (None, None) => line,
    }
}

fn parse_data_line(
    line: &str,
    line_no: usize,
    image: &mut ProgramImage,
    warnings: &mut Vec<LoaderWarning>,
) {
    let mut tokens = line.split_whitespace();
    let Some(addr_tok) = tokens.next() else { return };
    let Ok(addr) = addr_tok.parse::<i64>() else {
        warnings.push(LoaderWarning::UnparsableData {
            line: line_no,
            text: line.to_string(),
        });
        return;
    };

    let rest = line[addr_tok.len()..].trim();
    if let Some(text) = quoted_string(rest) {
        image.data.push((addr, Cell::Text(text)));
        return;
    }

    let values: Vec<&str> = rest.split_whitespace().collect();
    if values.is_empty() {
        warnings.push(LoaderWarning::UnparsableData {
            line: line_no,
            text: line.to_string(),
        });
        return;
    }

    for (offset, tok) in values.iter().enumerate() {
        match tok.parse::<i64>() {
            Ok(v) => image.data.push((addr + offset as i64, Cell::Int(v))),
            Err(_) => warnings.push(LoaderWarning::UnparsableData {
                line: line_no,
                text: line.to_string(),
            }),
        }
    }
}

/// Returns the unquoted contents of `s` if it is a single `"..."` token.
fn quoted_string(s: &str) -> Option<String> {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        Some(s[1..s.len() - 1].to_string())
    } else {
        None
    }
}

fn parse_instruction_line(
    line: &str,
    line_no: usize,
    image: &mut ProgramImage,
    warnings: &mut Vec<LoaderWarning>,
) {
    let mut tokens = line.split_whitespace();
    let Some(addr_tok) = tokens.next() else { return };
    let Ok(addr) = addr_tok.parse::<i64>() else {
        warnings.push(LoaderWarning::UnparsableData {
            line: line_no,
            text: line.to_string(),
        });
        return;
    };
    let Some(mnemonic) = tokens.next() else {
        warnings.push(LoaderWarning::UnparsableData {
            line: line_no,
            text: line.to_string(),
        });
        return;
    };
    let operands: Vec<&str> = tokens.collect();

    match decode(mnemonic, &operands) {
        Ok(opcode) => {
            image.instructions.insert(addr, opcode);
        }
        Err(DecodeError::Unknown) => warnings.push(LoaderWarning::UnknownOpcode {
            line: line_no,
            mnemonic: mnemonic.to_string(),
        }),
        Err(DecodeError::Arity) => warnings.push(LoaderWarning::ArityMismatch {
            line: line_no,
            mnemonic: mnemonic.to_string(),
        }),
    }
}

enum DecodeError {
    Unknown,
    Arity,
}

fn decode(mnemonic: &str, operands: &[&str]) -> Result<Opcode, DecodeError> {
    fn int(tok: &str) -> Result<i64, DecodeError> {
        tok.parse::<i64>().map_err(|_| DecodeError::Arity)
    }

    match mnemonic {
        "SET" => match operands {
            [value, addr] => Ok(Opcode::Set { value: int(value)?, addr: int(addr)? }),
            _ => Err(DecodeError::Arity),
        },
        "CPY" => match operands {
            [src, dst] => Ok(Opcode::Cpy { src: int(src)?, dst: int(dst)? }),
            _ => Err(DecodeError::Arity),
        },
        "CPYI" => match operands {
            [src, dst] => Ok(Opcode::CpyIndirect { src: int(src)?, dst: int(dst)? }),
            _ => Err(DecodeError::Arity),
        },
        "CPYI2" => match operands {
            [src, dst] => Ok(Opcode::CpyIndirect2 { src: int(src)?, dst: int(dst)? }),
            _ => Err(DecodeError::Arity),
        },
        "ADD" => match operands {
            [addr, imm] => Ok(Opcode::Add { addr: int(addr)?, imm: int(imm)? }),
            _ => Err(DecodeError::Arity),
        },
        "ADDI" => match operands {
            [dst, src] => Ok(Opcode::AddIndirect { dst: int(dst)?, src: int(src)? }),
            _ => Err(DecodeError::Arity),
        },
        "SUBI" => match operands {
            [src, dst] => Ok(Opcode::SubIndirect { src: int(src)?, dst: int(dst)? }),
            _ => Err(DecodeError::Arity),
        },
        "JIF" => match operands {
            [cond_addr, target] => Ok(Opcode::Jif { cond_addr: int(cond_addr)?, target: int(target)? }),
            _ => Err(DecodeError::Arity),
        },
        "PUSH" => match operands {
            [value] => Ok(Opcode::Push { value: int(value)? }),
            _ => Err(DecodeError::Arity),
        },
        "POP" => match operands {
            [dst] => Ok(Opcode::Pop { dst: int(dst)? }),
            _ => Err(DecodeError::Arity),
        },
        "CALL" => match operands {
            [target] => Ok(Opcode::Call { target: int(target)? }),
            _ => Err(DecodeError::Arity),
        },
        "RET" => match operands {
            [] => Ok(Opcode::Ret),
            _ => Err(DecodeError::Arity),
        },
        "HLT" => match operands {
            [] => Ok(Opcode::Hlt),
            _ => Err(DecodeError::Arity),
        },
        "USER" => match operands {
            [addr] => Ok(Opcode::User { addr: int(addr)? }),
            _ => Err(DecodeError::Arity),
        },
        "SYSCALL" => match operands {
            ["PRN", addr] => Ok(Opcode::Syscall { kind: SyscallKind::Prn(int(addr)?) }),
            ["YIELD"] => Ok(Opcode::Syscall { kind: SyscallKind::Yield }),
            ["HLT"] => Ok(Opcode::Syscall { kind: SyscallKind::Hlt }),
            _ => Err(DecodeError::Arity),
        },
        _ => Err(DecodeError::Unknown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_and_instruction_sections() {
        let source = "\
BEGIN DATA
1000 5
1001 7
END DATA
BEGIN INSTRUCTION
0 ADDI 1000 1001
1 HLT
END INSTRUCTION
";
        let (image, warnings) = load(source);
        assert!(warnings.is_empty());
        assert_eq!(image.data, vec![(1000, Cell::Int(5)), (1001, Cell::Int(7))]);
        assert_eq!(image.instructions.len(), 2);
        assert_eq!(
            image.instructions.get(&0),
            Some(&Opcode::AddIndirect { dst: 1000, src: 1001 })
        );
    }

    #[test]
    fn quoted_string_becomes_text_cell() {
        let source = "BEGIN DATA\n2000 \"hello\"\nEND DATA\n";
        let (image, warnings) = load(source);
        assert!(warnings.is_empty());
        assert_eq!(image.data, vec![(2000, Cell::Text("hello".to_string()))]);
    }

    #[test]
    fn multiple_values_fill_successive_addresses() {
        let source = "BEGIN DATA\n500 1 2 3\nEND DATA\n";
        let (image, _) = load(source);
        assert_eq!(
            image.data,
            vec![(500, Cell::Int(1)), (501, Cell::Int(2)), (502, Cell::Int(3))]
        );
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let source = "\
# a leading comment
BEGIN DATA
; another style of comment
1000 1  # trailing comment
END DATA
";
        let (image, warnings) = load(source);
        assert!(warnings.is_empty());
        assert_eq!(image.data, vec![(1000, Cell::Int(1))]);
    }

    #[test]
    fn unparsable_data_value_produces_warning_and_leaves_nothing_loaded() {
        let source = "BEGIN DATA\n1000 not_a_number\nEND DATA\n";
        let (image, warnings) = load(source);
        assert!(image.data.is_empty());
        assert_eq!(
            warnings,
            vec![LoaderWarning::UnparsableData {
                line: 2,
                text: "1000 not_a_number".to_string(),
            }]
        );
    }

    #[test]
    fn unknown_opcode_produces_warning_and_decodes_nothing() {
        let source = "BEGIN INSTRUCTION\n0 FROB 1 2\nEND INSTRUCTION\n";
        let (image, warnings) = load(source);
        assert!(image.instructions.is_empty());
        assert_eq!(
            warnings,
            vec![LoaderWarning::UnknownOpcode {
                line: 2,
                mnemonic: "FROB".to_string(),
            }]
        );
    }

    #[test]
    fn wrong_arity_produces_warning() {
        let source = "BEGIN INSTRUCTION\n0 SET 5\nEND INSTRUCTION\n";
        let (_, warnings) = load(source);
        assert_eq!(
            warnings,
            vec![LoaderWarning::ArityMismatch {
                line: 2,
                mnemonic: "SET".to_string(),
            }]
        );
    }

    #[test]
    fn syscall_variants_decode_correctly() {
        let source = "\
BEGIN INSTRUCTION
0 SYSCALL PRN 1000
1 SYSCALL YIELD
2 SYSCALL HLT
END INSTRUCTION
";
        let (image, warnings) = load(source);
        assert!(warnings.is_empty());
        assert_eq!(
            image.instructions.get(&0),
            Some(&Opcode::Syscall { kind: SyscallKind::Prn(1000) })
        );
        assert_eq!(
            image.instructions.get(&1),
            Some(&Opcode::Syscall { kind: SyscallKind::Yield })
        );
        assert_eq!(
            image.instructions.get(&2),
            Some(&Opcode::Syscall { kind: SyscallKind::Hlt })
        );
    }

    #[test]
    fn text_outside_any_section_is_ignored() {
        let source = "0 SET 5 0\nBEGIN DATA\n1000 1\nEND DATA\n";
        let (image, warnings) = load(source);
        assert!(warnings.is_empty());
        assert_eq!(image.instructions.len(), 0);
        assert_eq!(image.data, vec![(1000, Cell::Int(1))]);
    }
}
