//! Wires a validated [`Program`] to a [`Memory`] and [`CallStack`] and runs
//! it to completion, per §4.F/§8.
//!
//! Running a program is building an *effective* start block — the file's
//! own start instructions followed by the synthetic `snew <main's
//! paramSize>; call <main>` that enters `main` — then dispatching
//! instructions from whichever function is current until control falls off
//! the end of the outermost frame.

use std::io::{BufRead, Write};

use c0vm_asm::value::Addr;
use c0vm_asm::{Instruction, Opcode, Program};

use crate::call::CallStack;
use crate::error::RuntimeError;
use crate::memory::Memory;

/// A single row of a rendered stack trace.
#[derive(Debug, Clone)]
pub enum TraceFrame {
    /// The innermost frame, stopped mid-instruction.
    Current {
        function_name: String,
        ip: usize,
        instruction: Instruction,
    },
    /// The innermost frame, having run off the end of its function without
    /// a `ret`.
    RanOff { function_name: String },
    /// A frame further up the call chain, at the instruction it called
    /// into the frame below it.
    CalledBy {
        function_name: String,
        ip: usize,
        instruction: Instruction,
    },
}

impl std::fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceFrame::Current {
                function_name,
                ip,
                instruction,
            } => write!(
                f,
                "          function {function_name} at instruction {ip}: {instruction}"
            ),
            TraceFrame::RanOff { function_name } => write!(
                f,
                "          control reaches the end of function {function_name} without return"
            ),
            TraceFrame::CalledBy {
                function_name,
                ip,
                instruction,
            } if function_name == crate::call::ROOT_CONTEXT_NAME => {
                write!(f, "called by .start at instruction {ip}: {instruction}")
            }
            TraceFrame::CalledBy {
                function_name,
                ip,
                instruction,
            } => write!(
                f,
                "called by function {function_name} at instruction {ip}: {instruction}"
            ),
        }
    }
}

/// A runtime fault together with the call chain active when it was raised.
#[derive(Debug, Clone)]
pub struct Fault {
    pub error: RuntimeError,
    pub frames: Vec<TraceFrame>,
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "runtime error: {} occurred at:", self.error)?;
        for (i, frame) in self.frames.iter().enumerate() {
            if i + 1 == self.frames.len() {
                write!(f, "{frame}")?;
            } else {
                writeln!(f, "{frame}")?;
            }
        }
        Ok(())
    }
}

/// What the dispatcher wants the run loop to do after an instruction.
pub(crate) enum Control {
    /// Proceed to the next instruction in sequence.
    Advance,
    /// Resume execution at the given instruction index in whatever
    /// function is now current.
    Jump(usize),
}

/// An executing instance of a [`Program`]: its memory, call stack, and
/// instruction pointer.
pub struct Interpreter<'p> {
    pub(crate) program: &'p Program,
    pub(crate) memory: Memory,
    pub(crate) calls: CallStack,
    pub(crate) string_pool: Vec<Addr>,
    pub(crate) ip: usize,
    effective_start: Vec<Instruction>,
    instructions_executed: u64,
}

impl<'p> Interpreter<'p> {
    /// Build an interpreter for `program`, materializing the string literal
    /// pool in the heap and appending the synthetic entry into `main`.
    pub fn new(program: &'p Program) -> Result<Self, RuntimeError> {
        let mut memory = Memory::new();
        let string_pool = build_string_pool(program, &mut memory)?;

        let main_index = program
            .main_index()
            .expect("program was validated to have a main function");
        let main = &program.functions[main_index];
        let mut effective_start = program.start.clone();
        effective_start.push(Instruction::unary(Opcode::SNew, main.param_size as u32));
        effective_start.push(Instruction::unary(Opcode::Call, main_index as u32));

        Ok(Self {
            program,
            memory,
            calls: CallStack::new(),
            string_pool,
            ip: 0,
            effective_start,
            instructions_executed: 0,
        })
    }

    /// The instruction stream belonging to the currently active context.
    pub(crate) fn current_instructions(&self) -> &[Instruction] {
        match self.calls.current().function_index {
            None => &self.effective_start,
            Some(index) => &self.program.functions[index].instructions,
        }
    }

    fn trace(&self) -> Vec<TraceFrame> {
        let instructions = self.current_instructions();
        let frames = self.calls.frames();
        let mut out = Vec::with_capacity(frames.len());

        let innermost = frames.last().expect("call stack always has a root context");
        if self.ip < instructions.len() {
            out.push(TraceFrame::Current {
                function_name: innermost.function_name.clone(),
                ip: self.ip,
                instruction: instructions[self.ip],
            });
        } else {
            out.push(TraceFrame::RanOff {
                function_name: innermost.function_name.clone(),
            });
        }

        for (callee, caller) in frames.iter().rev().zip(frames.iter().rev().skip(1)) {
            let caller_instructions = match caller.function_index {
                None => &self.effective_start,
                Some(index) => &self.program.functions[index].instructions,
            };
            out.push(TraceFrame::CalledBy {
                function_name: caller.function_name.clone(),
                ip: callee.prev_ip,
                instruction: caller_instructions[callee.prev_ip],
            });
        }

        out
    }

    fn fault(&self, error: RuntimeError) -> Fault {
        Fault {
            error,
            frames: self.trace(),
        }
    }

    /// Run until `main` returns or a fault is raised.
    pub fn run<R: BufRead, W: Write>(&mut self, stdin: &mut R, stdout: &mut W) -> Result<(), Fault> {
        loop {
            let instructions = self.current_instructions();
            if self.ip >= instructions.len() {
                if self.calls.depth() != 1 {
                    return Err(self.fault(RuntimeError::InvalidControlTransfer));
                }
                tracing::debug!(
                    instructions_executed = self.instructions_executed,
                    "program terminated"
                );
                return Ok(());
            }
            let instruction = instructions[self.ip];
            tracing::trace!(ip = self.ip, op = %instruction.op, "dispatch");

            match self.execute_instruction(instruction, stdin, stdout) {
                Ok(Control::Advance) => self.ip += 1,
                Ok(Control::Jump(target)) => self.ip = target,
                Err(error) => return Err(self.fault(error)),
            }
            self.instructions_executed += 1;
        }
    }

    /// Depth of the call stack, including the root context. Exposed for
    /// callers that want to inspect interpreter state without running it
    /// (e.g. tests).
    pub fn call_depth(&self) -> usize {
        self.calls.depth()
    }
}

fn build_string_pool(program: &Program, memory: &mut Memory) -> Result<Vec<Addr>, RuntimeError> {
    let mut pool = Vec::with_capacity(program.constants.len());
    for constant in &program.constants {
        let addr = match constant.as_str_bytes() {
            Some(bytes) => {
                let base = memory.alloc_heap(bytes.len() as u32 + 1)?;
                for (i, &byte) in bytes.iter().enumerate() {
                    memory.write_char(base + i as u32, byte as i32)?;
                }
                memory.write_char(base + bytes.len() as u32, 0)?;
                base
            }
            None => 0,
        };
        pool.push(addr);
    }
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use c0vm_asm::value::Constant;
    use c0vm_asm::Function;

    fn sample_program() -> Program {
        Program::new(
            1,
            vec![Constant::Str(b"main".to_vec())],
            vec![],
            vec![Function {
                name_index: 0,
                param_size: 0,
                level: 1,
                instructions: vec![
                    Instruction::unary(Opcode::BiPush, 3),
                    Instruction::unary(Opcode::BiPush, 4),
                    Instruction::nullary(Opcode::IMul),
                    Instruction::nullary(Opcode::IPrint),
                    Instruction::nullary(Opcode::PrintL),
                    Instruction::nullary(Opcode::Ret),
                ],
            }],
        )
        .unwrap()
    }

    #[test]
    fn runs_to_completion_and_prints_the_expected_output() {
        let program = sample_program();
        let mut interp = Interpreter::new(&program).unwrap();
        let mut stdin = std::io::empty();
        let mut stdout = Vec::new();
        interp.run(&mut stdin, &mut stdout).unwrap();
        assert_eq!(String::from_utf8(stdout).unwrap(), "12\n");
    }

    #[test]
    fn a_missing_ret_is_reported_as_a_fault_with_a_trace() {
        let program = Program::new(
            1,
            vec![Constant::Str(b"main".to_vec())],
            vec![],
            vec![Function {
                name_index: 0,
                param_size: 0,
                level: 1,
                instructions: vec![Instruction::unary(Opcode::BiPush, 1)],
            }],
        )
        .unwrap();
        let mut interp = Interpreter::new(&program).unwrap();
        let mut stdin = std::io::empty();
        let mut stdout = Vec::new();
        let fault = interp.run(&mut stdin, &mut stdout).unwrap_err();
        assert_eq!(fault.error, RuntimeError::InvalidControlTransfer);
        assert!(matches!(fault.frames[0], TraceFrame::RanOff { .. }));
    }
}
