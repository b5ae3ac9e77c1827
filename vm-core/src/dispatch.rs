//! Per-opcode execution semantics (§4.F): what each instruction does to the
//! memory, call stack, and instruction pointer of a running [`Interpreter`].

use std::io::{BufRead, Write};

use c0vm_asm::value::Constant;
use c0vm_asm::{Instruction, Opcode};

use crate::error::RuntimeError;
use crate::interpreter::{Control, Interpreter};

/// Slots a value of a given type occupies, for array addressing
/// (`base + index * slots_count`).
fn slots_count(op: Opcode) -> u32 {
    match op {
        Opcode::DALoad | Opcode::DAStore => 2,
        _ => 1,
    }
}

impl<'p> Interpreter<'p> {
    pub(crate) fn execute_instruction<R: BufRead, W: Write>(
        &mut self,
        ins: Instruction,
        stdin: &mut R,
        stdout: &mut W,
    ) -> Result<Control, RuntimeError> {
        use Opcode::*;
        match ins.op {
            Nop => Ok(Control::Advance),

            BiPush => {
                let v = (ins.x as u8 as i8) as i32;
                self.memory.push_int(v)?;
                Ok(Control::Advance)
            }
            IPush => {
                self.memory.push_int(ins.x as i32)?;
                Ok(Control::Advance)
            }

            Pop => {
                self.memory.dec_sp(1)?;
                Ok(Control::Advance)
            }
            Pop2 => {
                self.memory.dec_sp(2)?;
                Ok(Control::Advance)
            }
            PopN => {
                self.memory.dec_sp(ins.x)?;
                Ok(Control::Advance)
            }
            Dup => {
                self.memory.dup()?;
                Ok(Control::Advance)
            }
            Dup2 => {
                self.memory.dup2()?;
                Ok(Control::Advance)
            }

            LoadC => {
                self.push_constant(ins.x as usize)?;
                Ok(Control::Advance)
            }
            LoadA => {
                let addr = self.calls.loada(ins.x as u16, ins.y);
                self.memory.push_addr(addr)?;
                Ok(Control::Advance)
            }
            New => {
                let count = self.memory.pop_int()?;
                let count = u32::try_from(count)
                    .map_err(|_| RuntimeError::HeapOverflow)?;
                let addr = self.memory.alloc_heap(count)?;
                self.memory.push_addr(addr)?;
                Ok(Control::Advance)
            }
            SNew => {
                self.memory.inc_sp(ins.x)?;
                Ok(Control::Advance)
            }

            ILoad => {
                let addr = self.memory.pop_addr()?;
                let v = self.memory.read_int(addr)?;
                self.memory.push_int(v)?;
                Ok(Control::Advance)
            }
            DLoad => {
                let addr = self.memory.pop_addr()?;
                let v = self.memory.read_double(addr)?;
                self.memory.push_double(v)?;
                Ok(Control::Advance)
            }
            ALoad => {
                let addr = self.memory.pop_addr()?;
                let v = self.memory.read_addr(addr)?;
                self.memory.push_addr(v)?;
                Ok(Control::Advance)
            }
            IALoad | DALoad | AALoad => {
                let addr = self.array_element_addr(ins.op)?;
                match ins.op {
                    IALoad => {
                        let v = self.memory.read_int(addr)?;
                        self.memory.push_int(v)?;
                    }
                    DALoad => {
                        let v = self.memory.read_double(addr)?;
                        self.memory.push_double(v)?;
                    }
                    AALoad => {
                        let v = self.memory.read_addr(addr)?;
                        self.memory.push_addr(v)?;
                    }
                    _ => unreachable!(),
                }
                Ok(Control::Advance)
            }

            IStore => {
                let v = self.memory.pop_int()?;
                let addr = self.memory.pop_addr()?;
                self.memory.write_int(addr, v)?;
                Ok(Control::Advance)
            }
            DStore => {
                let v = self.memory.pop_double()?;
                let addr = self.memory.pop_addr()?;
                self.memory.write_double(addr, v)?;
                Ok(Control::Advance)
            }
            AStore => {
                let v = self.memory.pop_addr()?;
                let addr = self.memory.pop_addr()?;
                self.memory.write_addr(addr, v)?;
                Ok(Control::Advance)
            }
            IAStore => {
                let v = self.memory.pop_int()?;
                let addr = self.array_element_addr(ins.op)?;
                self.memory.write_int(addr, v)?;
                Ok(Control::Advance)
            }
            DAStore => {
                let v = self.memory.pop_double()?;
                let addr = self.array_element_addr(ins.op)?;
                self.memory.write_double(addr, v)?;
                Ok(Control::Advance)
            }
            AAStore => {
                let v = self.memory.pop_addr()?;
                let addr = self.array_element_addr(ins.op)?;
                self.memory.write_addr(addr, v)?;
                Ok(Control::Advance)
            }

            IAdd => binary_int(self, |a, b| Ok(a.wrapping_add(b))),
            DAdd => binary_double(self, |a, b| a + b),
            ISub => binary_int(self, |a, b| Ok(a.wrapping_sub(b))),
            DSub => binary_double(self, |a, b| a - b),
            IMul => binary_int(self, |a, b| Ok(a.wrapping_mul(b))),
            DMul => binary_double(self, |a, b| a * b),
            IDiv => binary_int(self, |a, b| {
                if b == 0 {
                    Err(RuntimeError::DivideByZero)
                } else {
                    Ok(a.wrapping_div(b))
                }
            }),
            DDiv => binary_double(self, |a, b| a / b),
            INeg => {
                let v = self.memory.pop_int()?;
                self.memory.push_int(v.wrapping_neg())?;
                Ok(Control::Advance)
            }
            DNeg => {
                let v = self.memory.pop_double()?;
                self.memory.push_double(-v)?;
                Ok(Control::Advance)
            }

            ICmp => {
                let rhs = self.memory.pop_int()?;
                let lhs = self.memory.pop_int()?;
                self.memory.push_int(three_way(lhs, rhs))?;
                Ok(Control::Advance)
            }
            DCmp => {
                let rhs = self.memory.pop_double()?;
                let lhs = self.memory.pop_double()?;
                self.memory.push_int(double_three_way(lhs, rhs))?;
                Ok(Control::Advance)
            }

            I2D => {
                let v = self.memory.pop_int()?;
                self.memory.push_double(v as f64)?;
                Ok(Control::Advance)
            }
            D2I => {
                let v = self.memory.pop_double()?;
                self.memory.push_int(v as i32)?;
                Ok(Control::Advance)
            }
            I2C => {
                let v = self.memory.pop_int()?;
                self.memory.push_char(v)?;
                Ok(Control::Advance)
            }

            Jmp => self.jump_to(ins.x),
            Je => self.jump_if(ins.x, |cond| cond == 0),
            Jne => self.jump_if(ins.x, |cond| cond != 0),
            Jl => self.jump_if(ins.x, |cond| cond < 0),
            Jge => self.jump_if(ins.x, |cond| cond >= 0),
            Jg => self.jump_if(ins.x, |cond| cond > 0),
            Jle => self.jump_if(ins.x, |cond| cond <= 0),

            Call => {
                let index = ins.x as usize;
                let function = self
                    .program
                    .functions
                    .get(index)
                    .ok_or(RuntimeError::InvalidControlTransfer)?;
                let name = self.program.function_name(index).to_string();
                let target =
                    self.calls
                        .call(&mut self.memory, index, function, name, self.ip)?;
                Ok(Control::Jump(target))
            }
            Ret => {
                let target = self.calls.ret(&mut self.memory)?;
                Ok(Control::Jump(target))
            }
            IRet => {
                let v = self.memory.pop_int()?;
                let target = self.calls.ret(&mut self.memory)?;
                self.memory.push_int(v)?;
                Ok(Control::Jump(target))
            }
            DRet => {
                let v = self.memory.pop_double()?;
                let target = self.calls.ret(&mut self.memory)?;
                self.memory.push_double(v)?;
                Ok(Control::Jump(target))
            }
            ARet => {
                let v = self.memory.pop_addr()?;
                let target = self.calls.ret(&mut self.memory)?;
                self.memory.push_addr(v)?;
                Ok(Control::Jump(target))
            }

            IPrint => {
                let v = self.memory.pop_int()?;
                write!(stdout, "{v}").map_err(io_error)?;
                Ok(Control::Advance)
            }
            DPrint => {
                let v = self.memory.pop_double()?;
                write!(stdout, "{v:.6}").map_err(io_error)?;
                Ok(Control::Advance)
            }
            CPrint => {
                let v = self.memory.pop_char()?;
                stdout.write_all(&[v as u8]).map_err(io_error)?;
                Ok(Control::Advance)
            }
            SPrint => {
                let mut addr = self.memory.pop_addr()?;
                loop {
                    let ch = self.memory.read_char(addr)?;
                    if ch == 0 {
                        break;
                    }
                    stdout.write_all(&[ch as u8]).map_err(io_error)?;
                    addr += 1;
                }
                Ok(Control::Advance)
            }
            PrintL => {
                writeln!(stdout).map_err(io_error)?;
                Ok(Control::Advance)
            }

            IScan => {
                let token = scan_token(stdin)?;
                let v: i32 = token
                    .parse()
                    .map_err(|_| RuntimeError::IOError {
                        reason: format!("'{token}' is not a valid int"),
                    })?;
                self.memory.push_int(v)?;
                Ok(Control::Advance)
            }
            DScan => {
                let token = scan_token(stdin)?;
                let v: f64 = token
                    .parse()
                    .map_err(|_| RuntimeError::IOError {
                        reason: format!("'{token}' is not a valid double"),
                    })?;
                self.memory.push_double(v)?;
                Ok(Control::Advance)
            }
            CScan => {
                let token = scan_token(stdin)?;
                let ch = token.bytes().next().ok_or_else(|| RuntimeError::IOError {
                    reason: "expected a character, found an empty token".to_string(),
                })?;
                self.memory.push_char(ch as i32)?;
                Ok(Control::Advance)
            }
        }
    }

    fn push_constant(&mut self, index: usize) -> Result<(), RuntimeError> {
        let constant = self
            .program
            .constants
            .get(index)
            .ok_or(RuntimeError::InvalidInstruction)?;
        match constant {
            Constant::Str(_) => {
                let addr = self.string_pool[index];
                self.memory.push_addr(addr)
            }
            Constant::Int(v) => self.memory.push_int(*v),
            Constant::Double(v) => self.memory.push_double(*v),
        }
    }

    /// `base + index * slots<T>`, computed with wrapping arithmetic so a
    /// crafted out-of-range `index` wraps to some address instead of
    /// panicking on overflow — `check_range` then deterministically rejects
    /// whatever address it lands on, per §7.
    fn array_element_addr(&mut self, op: Opcode) -> Result<u32, RuntimeError> {
        let index = self.memory.pop_addr()?;
        let base = self.memory.pop_addr()?;
        Ok(base.wrapping_add(index.wrapping_mul(slots_count(op))))
    }

    fn jump_to(&self, offset: u32) -> Result<Control, RuntimeError> {
        let target = offset as usize;
        if target >= self.current_instructions().len() {
            return Err(RuntimeError::InvalidControlTransfer);
        }
        Ok(Control::Jump(target))
    }

    fn jump_if(
        &mut self,
        offset: u32,
        should_jump: impl Fn(i32) -> bool,
    ) -> Result<Control, RuntimeError> {
        let cond = self.memory.pop_int()?;
        if should_jump(cond) {
            self.jump_to(offset)
        } else {
            Ok(Control::Advance)
        }
    }
}

fn binary_int(
    interp: &mut Interpreter<'_>,
    f: impl FnOnce(i32, i32) -> Result<i32, RuntimeError>,
) -> Result<Control, RuntimeError> {
    let rhs = interp.memory.pop_int()?;
    let lhs = interp.memory.pop_int()?;
    interp.memory.push_int(f(lhs, rhs)?)?;
    Ok(Control::Advance)
}

fn binary_double(
    interp: &mut Interpreter<'_>,
    f: impl FnOnce(f64, f64) -> f64,
) -> Result<Control, RuntimeError> {
    let rhs = interp.memory.pop_double()?;
    let lhs = interp.memory.pop_double()?;
    interp.memory.push_double(f(lhs, rhs))?;
    Ok(Control::Advance)
}

fn three_way(lhs: i32, rhs: i32) -> i32 {
    match lhs.cmp(&rhs) {
        std::cmp::Ordering::Greater => 1,
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
    }
}

/// NaN compares equal to everything (`0`), and same-signed infinities
/// compare equal to each other, matching the original implementation.
fn double_three_way(lhs: f64, rhs: f64) -> i32 {
    if lhs.is_nan() || rhs.is_nan() {
        return 0;
    }
    if lhs.is_infinite() && rhs.is_infinite() && lhs * rhs > 0.0 {
        return 0;
    }
    if lhs > rhs {
        1
    } else if lhs < rhs {
        -1
    } else {
        0
    }
}

fn io_error(e: std::io::Error) -> RuntimeError {
    RuntimeError::IOError {
        reason: e.to_string(),
    }
}

fn scan_token<R: BufRead>(stdin: &mut R) -> Result<String, RuntimeError> {
    let mut token = String::new();
    let mut started = false;
    loop {
        let buf = stdin.fill_buf().map_err(io_error)?;
        if buf.is_empty() {
            break;
        }
        let mut consumed = 0;
        for &byte in buf {
            consumed += 1;
            if (byte as char).is_whitespace() {
                if started {
                    stdin.consume(consumed);
                    return Ok(token);
                }
            } else {
                started = true;
                token.push(byte as char);
            }
        }
        stdin.consume(consumed);
    }
    if started {
        Ok(token)
    } else {
        Err(RuntimeError::IOError {
            reason: "end of input".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use c0vm_asm::value::Constant;
    use c0vm_asm::{Function, Instruction, Opcode, Program};
    use rstest::rstest;

    use crate::interpreter::Interpreter;

    fn run_main(instructions: Vec<Instruction>) -> Result<Vec<u8>, crate::error::RuntimeError> {
        let program = Program::new(
            1,
            vec![Constant::Str(b"main".to_vec())],
            vec![],
            vec![Function {
                name_index: 0,
                param_size: 0,
                level: 1,
                instructions,
            }],
        )
        .unwrap();
        let mut interp = Interpreter::new(&program).unwrap();
        let mut stdin = std::io::empty();
        let mut stdout = Vec::new();
        interp
            .run(&mut stdin, &mut stdout)
            .map(|()| stdout)
            .map_err(|fault| fault.error)
    }

    #[rstest]
    #[case(3, 4, "7")]
    #[case(-1, 1, "0")]
    #[case(0, 0, "0")]
    fn iadd_prints_the_expected_sum(#[case] a: i32, #[case] b: i32, #[case] expected: &str) {
        let out = run_main(vec![
            Instruction::unary(Opcode::IPush, a as u32),
            Instruction::unary(Opcode::IPush, b as u32),
            Instruction::nullary(Opcode::IAdd),
            Instruction::nullary(Opcode::IPrint),
            Instruction::nullary(Opcode::Ret),
        ])
        .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }

    #[test]
    fn idiv_by_zero_is_divide_by_zero() {
        let err = run_main(vec![
            Instruction::unary(Opcode::BiPush, 1),
            Instruction::unary(Opcode::BiPush, 0),
            Instruction::nullary(Opcode::IDiv),
            Instruction::nullary(Opcode::IRet),
        ])
        .unwrap_err();
        assert_eq!(err, crate::error::RuntimeError::DivideByZero);
    }

    #[rstest]
    #[case(f64::NAN, 1.0, 0)]
    #[case(f64::INFINITY, f64::INFINITY, 0)]
    #[case(f64::NEG_INFINITY, f64::NEG_INFINITY, 0)]
    #[case(1.0, 2.0, -1)]
    #[case(2.0, 1.0, 1)]
    fn dcmp_matches_spec_boundary_cases(#[case] lhs: f64, #[case] rhs: f64, #[case] expected: i32) {
        assert_eq!(super::double_three_way(lhs, rhs), expected);
    }

    #[test]
    fn d2i_truncates_toward_zero() {
        let program = Program::new(
            1,
            vec![Constant::Str(b"main".to_vec()), Constant::Double(-3.7)],
            vec![],
            vec![Function {
                name_index: 0,
                param_size: 0,
                level: 1,
                instructions: vec![
                    Instruction::unary(Opcode::LoadC, 1),
                    Instruction::nullary(Opcode::D2I),
                    Instruction::nullary(Opcode::IPrint),
                    Instruction::nullary(Opcode::Ret),
                ],
            }],
        )
        .unwrap();
        let mut interp = Interpreter::new(&program).unwrap();
        let mut stdin = std::io::empty();
        let mut stdout = Vec::new();
        interp.run(&mut stdin, &mut stdout).unwrap();
        assert_eq!(String::from_utf8(stdout).unwrap(), "-3");
    }

    #[test]
    fn i2c_keeps_only_the_low_byte() {
        let out = run_main(vec![
            Instruction::unary(Opcode::IPush, 0x1_4142),
            Instruction::nullary(Opcode::I2C),
            Instruction::nullary(Opcode::CPrint),
            Instruction::nullary(Opcode::Ret),
        ])
        .unwrap();
        assert_eq!(out, vec![0x42]);
    }

    #[test]
    fn iaload_with_an_overflowing_index_is_invalid_memory_access_not_a_panic() {
        let err = run_main(vec![
            Instruction::unary(Opcode::IPush, 1),
            Instruction::unary(Opcode::IPush, i32::MAX),
            Instruction::nullary(Opcode::IALoad),
            Instruction::nullary(Opcode::Ret),
        ])
        .unwrap_err();
        assert!(matches!(err, crate::error::RuntimeError::InvalidMemoryAccess { .. }));
    }

    /// A level-2 function reads a level-1 caller's local through `loada`'s
    /// static link, independent of who dynamically called it.
    #[test]
    fn loada_reaches_a_nonlocal_through_the_static_link() {
        let program = Program::new(
            1,
            vec![Constant::Str(b"main".to_vec()), Constant::Str(b"inner".to_vec())],
            vec![],
            vec![
                Function {
                    name_index: 0,
                    param_size: 0,
                    level: 1,
                    instructions: vec![
                        Instruction::unary(Opcode::BiPush, 7), // local `a` at offset 0
                        Instruction::unary(Opcode::Call, 1),
                        Instruction::nullary(Opcode::Ret),
                    ],
                },
                Function {
                    name_index: 1,
                    param_size: 0,
                    level: 2,
                    instructions: vec![
                        Instruction::binary(Opcode::LoadA, 1, 0),
                        Instruction::nullary(Opcode::ILoad),
                        Instruction::nullary(Opcode::IPrint),
                        Instruction::nullary(Opcode::Ret),
                    ],
                },
            ],
        )
        .unwrap();
        let mut interp = Interpreter::new(&program).unwrap();
        let mut stdin = std::io::empty();
        let mut stdout = Vec::new();
        interp.run(&mut stdin, &mut stdout).unwrap();
        assert_eq!(String::from_utf8(stdout).unwrap(), "7");
    }
}
