//! The program image: constants, the implicit initializer, and the function
//! table, plus the validation a loader must perform before handing a program
//! to the interpreter.

use crate::error::InvalidFile;
use crate::instruction::Instruction;
use crate::value::Constant;

/// The maximum number of entries any `u16`-indexed table in a program image
/// may hold.
pub const MAX_U16_COUNT: usize = u16::MAX as usize;

/// A user-defined function: its name (as an index into the constant pool),
/// its parameter footprint, its static nesting level, and its code.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    /// Index of this function's name in the constant pool; must resolve to
    /// a `Str` constant.
    pub name_index: u16,
    /// Number of slots of arguments the caller must have pushed.
    pub param_size: u16,
    /// Static nesting depth; `1` for a top-level user function.
    pub level: u16,
    /// The function's instruction stream.
    pub instructions: Vec<Instruction>,
}

/// An immutable, validated program image: the output of either the binary
/// codec or the textual assembler, and the sole input the interpreter
/// requires to run.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// File format version; only `1` is accepted.
    pub version: u32,
    /// The constant pool, indexed by a 16-bit ordinal.
    pub constants: Vec<Constant>,
    /// Instructions for the implicit initializer, run before `main`.
    pub start: Vec<Instruction>,
    /// The function table, in declaration order.
    pub functions: Vec<Function>,
}

/// The only file format version this implementation understands.
pub const SUPPORTED_VERSION: u32 = 1;

impl Program {
    /// Construct a program image, validating every invariant §4.B requires.
    ///
    /// This is the single choke point both the binary codec and the textual
    /// assembler funnel through, so neither can produce a program the
    /// interpreter isn't prepared to run.
    pub fn new(
        version: u32,
        constants: Vec<Constant>,
        start: Vec<Instruction>,
        functions: Vec<Function>,
    ) -> Result<Self, InvalidFile> {
        if version != SUPPORTED_VERSION {
            return Err(InvalidFile::new(format!(
                "unsupported file version: {version}"
            )));
        }
        if constants.len() > MAX_U16_COUNT {
            return Err(InvalidFile::new("too many constants"));
        }
        for constant in &constants {
            if let Constant::Str(bytes) = constant {
                if bytes.len() > MAX_U16_COUNT {
                    return Err(InvalidFile::new("string constant too long"));
                }
            }
        }
        if start.len() > MAX_U16_COUNT {
            return Err(InvalidFile::new("start block too long"));
        }
        if functions.len() > MAX_U16_COUNT {
            return Err(InvalidFile::new("too many functions"));
        }

        let program = Self {
            version,
            constants,
            start,
            functions,
        };

        for function in &program.functions {
            if function.instructions.len() > MAX_U16_COUNT {
                return Err(InvalidFile::new("function body too long"));
            }
            program.resolve_function_name(function)?;
        }

        if program.main_index().is_none() {
            return Err(InvalidFile::new("main not found"));
        }

        Ok(program)
    }

    /// Resolve a function's `name_index` to its name, failing unless it
    /// points at a `Str` constant.
    fn resolve_function_name<'a>(&'a self, function: &Function) -> Result<&'a str, InvalidFile> {
        let constant = self
            .constants
            .get(function.name_index as usize)
            .ok_or_else(|| InvalidFile::new("function name index out of range"))?;
        let bytes = constant
            .as_str_bytes()
            .ok_or_else(|| InvalidFile::new("function name does not resolve to a string constant"))?;
        std::str::from_utf8(bytes)
            .map_err(|_| InvalidFile::new("function name is not valid UTF-8"))
    }

    /// The index of the function named `main`, if present.
    pub fn main_index(&self) -> Option<usize> {
        self.functions
            .iter()
            .position(|f| self.resolve_function_name(f).as_deref() == Ok("main"))
    }

    /// The (already-validated) name of a function.
    pub fn function_name(&self, index: usize) -> &str {
        self.resolve_function_name(&self.functions[index])
            .expect("function table was validated at construction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    fn main_fn() -> Function {
        Function {
            name_index: 0,
            param_size: 0,
            level: 1,
            instructions: vec![Instruction::nullary(Opcode::Ret)],
        }
    }

    #[test]
    fn rejects_missing_main() {
        let err = Program::new(
            1,
            vec![Constant::Str(b"other".to_vec())],
            vec![],
            vec![Function {
                name_index: 0,
                ..main_fn()
            }],
        )
        .unwrap_err();
        assert!(err.reason.contains("main"));
    }

    #[test]
    fn rejects_unsupported_version() {
        let err = Program::new(2, vec![Constant::Str(b"main".to_vec())], vec![], vec![main_fn()])
            .unwrap_err();
        assert!(err.reason.contains("version"));
    }

    #[test]
    fn accepts_minimal_valid_program() {
        let program = Program::new(
            1,
            vec![Constant::Str(b"main".to_vec())],
            vec![],
            vec![main_fn()],
        )
        .expect("valid program");
        assert_eq!(program.main_index(), Some(0));
        assert_eq!(program.function_name(0), "main");
    }

    #[test]
    fn rejects_name_index_not_a_string() {
        let err = Program::new(1, vec![Constant::Int(1)], vec![], vec![main_fn()]).unwrap_err();
        assert!(err.reason.contains("string constant"));
    }
}
