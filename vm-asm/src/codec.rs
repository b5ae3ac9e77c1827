//! The binary file format: a bit-exact, big-endian encoding of a
//! [`Program`], as specified in §4.C/§6.
//!
//! ```text
//! magic:        u32 = 0x43303A29
//! version:      u32
//! constants_count: u16
//! constants:    repeated { tag:u8 payload }
//! start_count:  u16
//! start:        repeated { opcode:u8 [operand0] [operand1] }
//! functions_count: u16
//! functions:    repeated { nameIndex:u16 paramSize:u16 level:u16 instr_count:u16 instructions... }
//! ```
//!
//! All multi-byte fields are big-endian, including the 8-byte IEEE-754
//! payload of a `DOUBLE` constant.

use crate::error::InvalidFile;
use crate::instruction::Instruction;
use crate::opcode::{Opcode, ParamProfile};
use crate::program::{Function, Program};
use crate::value::Constant;

/// The magic number that opens every binary file: the bytes `43 30 3A 29`
/// (ASCII `"C0:)"`, read big-endian).
pub const MAGIC: u32 = 0x4330_3A29;

/// Encode a program to its bit-exact binary representation.
pub fn encode(program: &Program) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC.to_be_bytes());
    out.extend_from_slice(&program.version.to_be_bytes());

    write_u16(&mut out, program.constants.len() as u16);
    for constant in &program.constants {
        write_constant(&mut out, constant);
    }

    write_instructions(&mut out, &program.start);

    write_u16(&mut out, program.functions.len() as u16);
    for function in &program.functions {
        write_u16(&mut out, function.name_index);
        write_u16(&mut out, function.param_size);
        write_u16(&mut out, function.level);
        write_instructions(&mut out, &function.instructions);
    }

    out
}

fn write_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn write_constant(out: &mut Vec<u8>, constant: &Constant) {
    out.push(constant.tag());
    match constant {
        Constant::Str(bytes) => {
            write_u16(out, bytes.len() as u16);
            out.extend_from_slice(bytes);
        }
        Constant::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
        Constant::Double(v) => out.extend_from_slice(&v.to_be_bytes()),
    }
}

fn write_instructions(out: &mut Vec<u8>, instructions: &[Instruction]) {
    write_u16(out, instructions.len() as u16);
    for ins in instructions {
        out.push(ins.op as u8);
        match ins.op.param_profile() {
            ParamProfile::None => {}
            ParamProfile::One(width) => write_operand(out, ins.x, width),
            ParamProfile::Two(w0, w1) => {
                write_operand(out, ins.x, w0);
                write_operand(out, ins.y, w1);
            }
        }
    }
}

fn write_operand(out: &mut Vec<u8>, value: u32, width: u8) {
    let bytes = value.to_be_bytes();
    match width {
        1 => out.push(bytes[3]),
        2 => out.extend_from_slice(&bytes[2..4]),
        4 => out.extend_from_slice(&bytes),
        _ => unreachable!("opcode tables only declare 1/2/4-byte operands"),
    }
}

/// A cursor over the input buffer that reports `InvalidFile{"incomplete
/// binary file"}` on any truncation, per §4.C.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], InvalidFile> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| InvalidFile::new("incomplete binary file"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, InvalidFile> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, InvalidFile> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, InvalidFile> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f64(&mut self) -> Result<f64, InvalidFile> {
        let b = self.take(8)?;
        Ok(f64::from_be_bytes(b.try_into().expect("exactly 8 bytes")))
    }

    fn operand(&mut self, width: u8) -> Result<u32, InvalidFile> {
        match width {
            1 => Ok(self.u8()? as u32),
            2 => Ok(self.u16()? as u32),
            4 => self.u32(),
            _ => unreachable!("opcode tables only declare 1/2/4-byte operands"),
        }
    }

    fn at_eof(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

fn read_constant(r: &mut Reader<'_>) -> Result<Constant, InvalidFile> {
    match r.u8()? {
        0x00 => {
            let len = r.u16()?;
            let bytes = r.take(len as usize)?.to_vec();
            Ok(Constant::Str(bytes))
        }
        0x01 => Ok(Constant::Int(r.u32()? as i32)),
        0x02 => Ok(Constant::Double(r.f64()?)),
        tag => Err(InvalidFile::new(format!("unknown constant tag: 0x{tag:02x}"))),
    }
}

fn read_instruction(r: &mut Reader<'_>) -> Result<Instruction, InvalidFile> {
    let byte = r.u8()?;
    let op = Opcode::from_byte(byte)
        .ok_or_else(|| InvalidFile::new(format!("unknown opcode: 0x{byte:02x}")))?;
    let (x, y) = match op.param_profile() {
        ParamProfile::None => (0, 0),
        ParamProfile::One(w) => (r.operand(w)?, 0),
        ParamProfile::Two(w0, w1) => (r.operand(w0)?, r.operand(w1)?),
    };
    Ok(Instruction { op, x, y })
}

fn read_instructions(r: &mut Reader<'_>) -> Result<Vec<Instruction>, InvalidFile> {
    let count = r.u16()?;
    (0..count).map(|_| read_instruction(r)).collect()
}

/// Decode a program from its binary representation.
///
/// Decoding is strictly sequential: the magic and version are checked
/// first, then constants, the start block, and functions are read in
/// order, and any trailing bytes after the final function are rejected.
pub fn decode(bytes: &[u8]) -> Result<Program, InvalidFile> {
    let mut r = Reader::new(bytes);

    let magic = r.u32()?;
    if magic != MAGIC {
        return Err(InvalidFile::new("invalid magic"));
    }
    let version = r.u32()?;

    let constants_count = r.u16()?;
    let constants = (0..constants_count)
        .map(|_| read_constant(&mut r))
        .collect::<Result<Vec<_>, _>>()?;

    let start = read_instructions(&mut r)?;

    let functions_count = r.u16()?;
    let functions = (0..functions_count)
        .map(|_| {
            let name_index = r.u16()?;
            let param_size = r.u16()?;
            let level = r.u16()?;
            let instructions = read_instructions(&mut r)?;
            Ok(Function {
                name_index,
                param_size,
                level,
                instructions,
            })
        })
        .collect::<Result<Vec<_>, InvalidFile>>()?;

    if !r.at_eof() {
        return Err(InvalidFile::new("trailing bytes after final function"));
    }

    Program::new(version, constants, start, functions)
}
