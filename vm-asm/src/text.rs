//! The textual assembler/disassembler (§6 "Text listing format"): a
//! human-readable rendering of a [`Program`] and the parser that reads it
//! back.
//!
//! The on-disk binary format (`crate::codec`) is the normative wire
//! format; this module is a convenience the CLI exposes via `-d`/`-a` so a
//! program can be read and edited as text. Both directions funnel through
//! [`Program::new`], so a listing can never describe a program the
//! interpreter isn't prepared to run.

use crate::error::InvalidFile;
use crate::instruction::Instruction;
use crate::opcode::{Opcode, ParamProfile};
use crate::program::{Function, Program};
use crate::value::Constant;

fn invalid(reason: impl Into<String>) -> InvalidFile {
    InvalidFile::new(reason)
}

// ---------------------------------------------------------------------------
// Disassembly: Program -> text
// ---------------------------------------------------------------------------

/// Render `program` as a text listing. The writer always escapes string
/// constants (backslash, quote, the three whitespace controls, and `\xHH`
/// for anything else non-printable-ASCII) so that `assemble` can read back
/// exactly the bytes written, per Open Question 3.
pub fn disassemble(program: &Program) -> String {
    let mut out = String::new();

    out.push_str(".constants:\n");
    for (i, constant) in program.constants.iter().enumerate() {
        out.push_str(&format!("  {i} {}\n", render_constant(constant)));
    }

    out.push_str(".start:\n");
    for (i, ins) in program.start.iter().enumerate() {
        out.push_str(&format!("  {i} {ins}\n"));
    }

    out.push_str(".functions:\n");
    for (i, function) in program.functions.iter().enumerate() {
        let name = program.function_name(i);
        out.push_str(&format!(
            "  {i} {} {} {}     # {name}\n",
            function.name_index, function.param_size, function.level
        ));
    }

    for (i, function) in program.functions.iter().enumerate() {
        let name = program.function_name(i);
        out.push_str(&format!(".F{i}: # {name}\n"));
        for (j, ins) in function.instructions.iter().enumerate() {
            out.push_str(&format!("  {j} {ins}\n"));
        }
    }

    out
}

fn render_constant(constant: &Constant) -> String {
    match constant {
        Constant::Str(bytes) => format!("S \"{}\"", escape_bytes(bytes)),
        Constant::Int(v) => format!("I 0x{v:08x}", v = *v as u32),
        Constant::Double(v) => format!("D 0x{:016x}", v.to_bits()),
    }
}

fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Assembly: text -> Program
// ---------------------------------------------------------------------------

/// Parse a text listing into a [`Program`], validating every §4.B
/// invariant through [`Program::new`].
pub fn assemble(text: &str) -> Result<Program, InvalidFile> {
    let mut lines = Lines::new(text);

    lines.expect_header(".constants:")?;
    let mut constants = Vec::new();
    while let Some(line) = lines.peek_non_header() {
        let (index, rest) = split_index(line)?;
        expect_index(index, constants.len())?;
        constants.push(parse_constant(rest)?);
        lines.advance();
    }

    lines.expect_header(".start:")?;
    let mut start = Vec::new();
    while let Some(line) = lines.peek_non_header() {
        let (index, rest) = split_index(line)?;
        expect_index(index, start.len())?;
        start.push(parse_instruction(rest)?);
        lines.advance();
    }

    lines.expect_header(".functions:")?;
    let mut headers = Vec::new();
    while let Some(line) = lines.peek_non_function_header() {
        let (index, rest) = split_index(line)?;
        expect_index(index, headers.len())?;
        headers.push(parse_function_header(rest)?);
        lines.advance();
    }

    let mut functions = Vec::with_capacity(headers.len());
    for (name_index, param_size, level) in headers {
        lines.skip_function_header()?;
        let mut instructions = Vec::new();
        while let Some(line) = lines.peek_non_header() {
            let (index, rest) = split_index(line)?;
            expect_index(index, instructions.len())?;
            instructions.push(parse_instruction(rest)?);
            lines.advance();
        }
        functions.push(Function {
            name_index,
            param_size,
            level,
            instructions,
        });
    }

    if let Some(line) = lines.peek_any() {
        return Err(invalid(format!("unexpected trailing content: {line:?}")));
    }

    Program::new(1, constants, start, functions)
}

fn expect_index(found: usize, expected: usize) -> Result<(), InvalidFile> {
    if found != expected {
        return Err(invalid(format!(
            "expected index {expected}, found {found}"
        )));
    }
    Ok(())
}

fn split_index(line: &str) -> Result<(usize, &str), InvalidFile> {
    let mut parts = line.splitn(2, char::is_whitespace);
    let index = parts
        .next()
        .ok_or_else(|| invalid("missing index"))?
        .parse::<usize>()
        .map_err(|_| invalid(format!("bad index in line: {line:?}")))?;
    let rest = parts.next().unwrap_or("").trim_start();
    Ok((index, rest))
}

fn parse_constant(rest: &str) -> Result<Constant, InvalidFile> {
    let mut parts = rest.splitn(2, char::is_whitespace);
    let tag = parts.next().ok_or_else(|| invalid("missing constant tag"))?;
    let payload = parts.next().unwrap_or("").trim();
    match tag {
        "S" => {
            let quoted = payload
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .ok_or_else(|| invalid(format!("malformed string constant: {payload:?}")))?;
            Ok(Constant::Str(unescape_bytes(quoted)?))
        }
        "I" => Ok(Constant::Int(parse_int_literal(payload)?)),
        "D" => Ok(Constant::Double(parse_double_literal(payload)?)),
        other => Err(invalid(format!("unknown constant tag: {other:?}"))),
    }
}

fn unescape_bytes(s: &str) -> Result<Vec<u8>, InvalidFile> {
    let mut out = Vec::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('\\') => out.push(b'\\'),
            Some('\'') => out.push(b'\''),
            Some('"') => out.push(b'"'),
            Some('n') => out.push(b'\n'),
            Some('r') => out.push(b'\r'),
            Some('t') => out.push(b'\t'),
            Some('x') => {
                let hi = chars.next().ok_or_else(|| invalid("incomplete \\x escape"))?;
                let lo = chars.next().ok_or_else(|| invalid("incomplete \\x escape"))?;
                let byte = u8::from_str_radix(&format!("{hi}{lo}"), 16)
                    .map_err(|_| invalid("invalid \\x escape"))?;
                out.push(byte);
            }
            Some(other) => return Err(invalid(format!("unknown escape sequence: \\{other}"))),
            None => return Err(invalid("dangling backslash at end of string")),
        }
    }
    Ok(out)
}

fn parse_int_literal(s: &str) -> Result<i32, InvalidFile> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        let v = u32::from_str_radix(hex, 16)
            .map_err(|_| invalid(format!("bad hex int literal: {s:?}")))?;
        Ok(v as i32)
    } else {
        s.parse::<i32>()
            .map_err(|_| invalid(format!("bad int literal: {s:?}")))
    }
}

fn parse_double_literal(s: &str) -> Result<f64, InvalidFile> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        let bits = u64::from_str_radix(hex, 16)
            .map_err(|_| invalid(format!("bad hex double literal: {s:?}")))?;
        Ok(f64::from_bits(bits))
    } else {
        s.parse::<f64>()
            .map_err(|_| invalid(format!("bad double literal: {s:?}")))
    }
}

fn parse_instruction(rest: &str) -> Result<Instruction, InvalidFile> {
    let mut parts = rest.splitn(2, char::is_whitespace);
    let mnemonic = parts.next().ok_or_else(|| invalid("missing mnemonic"))?;
    let op = Opcode::from_mnemonic(mnemonic)
        .ok_or_else(|| invalid(format!("unknown mnemonic: {mnemonic:?}")))?;
    let operands = parts.next().unwrap_or("").trim();
    match op.param_profile() {
        ParamProfile::None => {
            if !operands.is_empty() {
                return Err(invalid(format!("{mnemonic} takes no operands")));
            }
            Ok(Instruction::nullary(op))
        }
        ParamProfile::One(width) => {
            let x = parse_operand(operands, width)?;
            Ok(Instruction::unary(op, x))
        }
        ParamProfile::Two(w0, w1) => {
            let (x_str, y_str) = operands
                .split_once(',')
                .ok_or_else(|| invalid(format!("{mnemonic} requires two comma-separated operands")))?;
            let x = parse_operand(x_str.trim(), w0)?;
            let y = parse_operand(y_str.trim(), w1)?;
            Ok(Instruction::binary(op, x, y))
        }
    }
}

/// Parse an operand literal and truncate it to the on-disk width the
/// opcode declares, matching the zero-extension `codec::decode` performs
/// when reading the same width off disk — so a hand-written negative
/// literal like `bipush -1` canonicalizes to the same `Instruction.x` a
/// binary round-trip would produce, keeping `disassemble` output stable.
fn parse_operand(s: &str, width: u8) -> Result<u32, InvalidFile> {
    let raw = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|_| invalid(format!("bad hex operand: {s:?}")))?
    } else if let Ok(v) = s.parse::<i32>() {
        v as u32
    } else {
        s.parse::<u32>()
            .map_err(|_| invalid(format!("bad operand: {s:?}")))?
    };
    Ok(match width {
        1 => raw & 0xff,
        2 => raw & 0xffff,
        4 => raw,
        _ => unreachable!("opcode tables only declare 1/2/4-byte operands"),
    })
}

/// `<index> <nameIndex> <paramSize> <level>     # <name>` — the name
/// comment is documentation only; the binary name is resolved through
/// `nameIndex`, same as the binary format.
fn parse_function_header(rest: &str) -> Result<(u16, u16, u16), InvalidFile> {
    let fields = strip_comment(rest);
    let mut parts = fields.split_whitespace();
    let name_index = next_u16(&mut parts, "nameIndex")?;
    let param_size = next_u16(&mut parts, "paramSize")?;
    let level = next_u16(&mut parts, "level")?;
    Ok((name_index, param_size, level))
}

fn next_u16<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    field: &str,
) -> Result<u16, InvalidFile> {
    parts
        .next()
        .ok_or_else(|| invalid(format!("missing {field}")))?
        .parse::<u16>()
        .map_err(|_| invalid(format!("bad {field}")))
}

/// Strip a trailing `# comment`, but only outside a quoted string constant
/// and without letting a backslash-escaped quote (`\"`) toggle quote state —
/// otherwise a string constant containing `\"#` would have its closing
/// quote mistaken for opening one, truncating the line at the `#`.
fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    let mut chars = line.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' if in_quotes => {
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            '#' if !in_quotes => return &line[..i],
            _ => {}
        }
    }
    line
}

/// A line cursor over a text listing: strips comments and blank lines,
/// and knows how to recognize the fixed section/function headers.
struct Lines<'a> {
    raw: Vec<&'a str>,
    pos: usize,
}

impl<'a> Lines<'a> {
    fn new(text: &'a str) -> Self {
        let raw = text
            .lines()
            .map(strip_comment)
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        Self { raw, pos: 0 }
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn peek_any(&self) -> Option<&'a str> {
        self.raw.get(self.pos).copied()
    }

    /// The next line, unless it opens a new top-level (`.foo:`) or
    /// per-function (`.F<i>:`/`<name>:`) section.
    fn peek_non_header(&self) -> Option<&'a str> {
        self.peek_any().filter(|l| !is_any_header(l))
    }

    /// The next line, unless it opens a per-function header — used while
    /// scanning the `.functions:` table, which is itself terminated by the
    /// first function body header.
    fn peek_non_function_header(&self) -> Option<&'a str> {
        self.peek_any().filter(|l| !is_function_header(l))
    }

    fn expect_header(&mut self, header: &str) -> Result<(), InvalidFile> {
        match self.peek_any() {
            Some(l) if l == header => {
                self.advance();
                Ok(())
            }
            other => Err(invalid(format!(
                "expected section header {header:?}, found {other:?}"
            ))),
        }
    }

    fn skip_function_header(&mut self) -> Result<(), InvalidFile> {
        match self.peek_any() {
            Some(l) if is_function_header(l) => {
                self.advance();
                Ok(())
            }
            other => Err(invalid(format!("expected a function header, found {other:?}"))),
        }
    }
}

fn is_any_header(line: &str) -> bool {
    line.starts_with('.') || is_function_header(line)
}

fn is_function_header(line: &str) -> bool {
    (line.starts_with(".F") && line.contains(':')) || (line.ends_with(':') && !line.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    fn sample_program() -> Program {
        Program::new(
            1,
            vec![
                Constant::Str(b"main".to_vec()),
                Constant::Str(b"hi\n\"there\"".to_vec()),
                Constant::Int(-7),
                Constant::Double(3.5),
            ],
            vec![
                Instruction::unary(Opcode::SNew, 0),
                Instruction::unary(Opcode::Call, 0),
            ],
            vec![Function {
                name_index: 0,
                param_size: 0,
                level: 1,
                instructions: vec![
                    Instruction::unary(Opcode::BiPush, 3),
                    Instruction::unary(Opcode::BiPush, 4),
                    Instruction::nullary(Opcode::IMul),
                    Instruction::binary(Opcode::LoadA, 1, 2),
                    Instruction::nullary(Opcode::IPrint),
                    Instruction::nullary(Opcode::PrintL),
                    Instruction::nullary(Opcode::Ret),
                ],
            }],
        )
        .expect("sample program is well-formed")
    }

    #[test]
    fn disassemble_then_assemble_round_trips() {
        let program = sample_program();
        let text = disassemble(&program);
        let reparsed = assemble(&text).expect("disassembled text reparses");
        assert_eq!(reparsed, program);
    }

    #[test]
    fn disassembling_is_idempotent_after_a_round_trip() {
        let program = sample_program();
        let text = disassemble(&program);
        let reparsed = assemble(&text).unwrap();
        assert_eq!(disassemble(&reparsed), text);
    }

    #[test]
    fn string_escapes_round_trip() {
        let bytes = b"a\\b\"c'd\ne\rf\tg\x01h".to_vec();
        let escaped = escape_bytes(&bytes);
        let unescaped = unescape_bytes(&escaped).unwrap();
        assert_eq!(unescaped, bytes);
    }

    #[test]
    fn hex_and_decimal_int_literals_agree() {
        assert_eq!(parse_int_literal("0x7").unwrap(), 7);
        assert_eq!(parse_int_literal("-7").unwrap(), -7);
    }

    #[test]
    fn hex_bit_pattern_double_literal_is_exact() {
        let v = 3.14159265358979_f64;
        let text = format!("0x{:016x}", v.to_bits());
        assert_eq!(parse_double_literal(&text).unwrap(), v);
    }

    #[test]
    fn strip_comment_does_not_toggle_on_an_escaped_quote() {
        // A string constant ending in an escaped quote, immediately followed
        // by a '#': the '\"' must not be mistaken for the string's closing
        // quote, or the real '#' comment marker after it would be missed.
        let line = r##"  0 S "\"#" # trailing comment"##;
        assert_eq!(strip_comment(line), r##"  0 S "\"#" "##);
    }

    #[test]
    fn string_constant_containing_quote_then_hash_round_trips() {
        let program = Program::new(
            1,
            vec![Constant::Str(b"main".to_vec()), Constant::Str(b"\"#".to_vec())],
            vec![],
            vec![Function {
                name_index: 0,
                param_size: 0,
                level: 1,
                instructions: vec![Instruction::nullary(Opcode::Ret)],
            }],
        )
        .expect("valid program");
        let text = disassemble(&program);
        let reparsed = assemble(&text).expect("round-trips through text despite \"# in a string");
        assert_eq!(reparsed, program);
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let text = "\
.constants:
  0 S \"hi\" # a greeting

.start:
.functions:
  0 0 0 1     # main
.F0: # main
  0 ret
";
        let program = assemble(text).expect("parses with comments and blank lines");
        assert_eq!(program.constants, vec![Constant::Str(b"hi".to_vec())]);
    }

    #[test]
    fn out_of_order_index_is_rejected() {
        let text = "\
.constants:
  1 S \"hi\"
.start:
.functions:
  0 0 0 1     # main
.F0: # main
  0 ret
";
        let err = assemble(text).unwrap_err();
        assert!(err.reason.contains("index"));
    }

    #[test]
    fn unknown_mnemonic_is_rejected() {
        let text = "\
.constants:
  0 S \"main\"
.start:
.functions:
  0 0 0 1     # main
.F0: # main
  0 frobnicate
";
        let err = assemble(text).unwrap_err();
        assert!(err.reason.contains("mnemonic"));
    }
}
