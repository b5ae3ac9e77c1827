//! The call subsystem (§4.E): a stack of [`Context`] records tracking the
//! caller-restore state and static-scope chain for each active invocation.
//!
//! Lexical scoping is resolved through `static_link`, a back-pointer to the
//! context of the statically enclosing function, not the dynamically
//! calling one. A nested function one level deeper than its caller links
//! to the caller directly; a function at the same or a shallower level
//! links to whichever ancestor sits one level above it in the source.

use crate::error::RuntimeError;
use crate::memory::Memory;
use c0vm_asm::value::Addr;
use c0vm_asm::Function;

/// One activation record: the state needed to resume the caller on `ret`,
/// plus the static link used to resolve non-local variable references.
#[derive(Debug, Clone)]
pub struct Context {
    /// Index into the program's function table, or `None` for the
    /// synthetic root context that runs the start block.
    pub function_index: Option<usize>,
    /// The function's name, for stack traces.
    pub function_name: String,
    /// Lexical nesting level of this activation.
    pub level: u16,
    /// Index of the context that statically encloses this one.
    pub static_link: usize,
    /// Caller's base pointer, restored on `ret`.
    pub prev_bp: u32,
    /// Caller's instruction index, resumed on `ret`.
    pub prev_ip: usize,
    /// Caller's stack pointer at call time, restored on `ret`.
    pub prev_sp: u32,
    /// Base pointer of this activation's frame.
    pub bp: u32,
}

/// The name given to the synthetic context that runs a program's start
/// block, matching the original implementation's stack-trace output.
pub const ROOT_CONTEXT_NAME: &str = "__START__";

/// The stack of active [`Context`] records, rooted at the start block.
#[derive(Debug)]
pub struct CallStack {
    contexts: Vec<Context>,
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new()
    }
}

impl CallStack {
    /// A call stack holding only the root context that runs the start
    /// block, at level 0 with its static link pointing to itself.
    pub fn new() -> Self {
        Self {
            contexts: vec![Context {
                function_index: None,
                function_name: ROOT_CONTEXT_NAME.to_string(),
                level: 0,
                static_link: 0,
                prev_bp: 0,
                prev_ip: 0,
                prev_sp: 0,
                bp: 0,
            }],
        }
    }

    /// The currently executing activation.
    pub fn current(&self) -> &Context {
        self.contexts.last().expect("root context is never popped")
    }

    /// The index of the currently executing activation.
    fn current_index(&self) -> usize {
        self.contexts.len() - 1
    }

    /// Every active activation, outermost first. Used for stack traces.
    pub fn frames(&self) -> &[Context] {
        &self.contexts
    }

    /// How many activations are active, including the root.
    pub fn depth(&self) -> usize {
        self.contexts.len()
    }

    fn static_ancestor(&self, level_diff: u16) -> usize {
        let mut link = self.current_index();
        for _ in 0..level_diff {
            link = self.contexts[link].static_link;
        }
        link
    }

    /// `loada(level_diff, offset)`: resolve an address `offset` slots past
    /// the base pointer of the context `level_diff` static levels above the
    /// current one.
    pub fn loada(&self, level_diff: u16, offset: u32) -> Addr {
        let ancestor = self.static_ancestor(level_diff);
        self.contexts[ancestor].bp + offset
    }

    /// Enter `function`, given its index and resolved name. Computes the
    /// new frame's static link from the level relationship to the caller,
    /// claims `function.param_size` already-pushed stack slots as the new
    /// frame's parameters, and returns the instruction index to resume at
    /// (always `0`). `caller_ip` is the index of the `call` instruction
    /// itself, recorded so a later `ret` knows where to resume.
    pub fn call(
        &mut self,
        memory: &mut Memory,
        index: usize,
        function: &Function,
        function_name: String,
        caller_ip: usize,
    ) -> Result<usize, RuntimeError> {
        let caller_level = self.current().level;
        let new_level = function.level;
        let static_link = if new_level == caller_level + 1 {
            self.current_index()
        } else if new_level <= caller_level {
            let mut link = self.current().static_link;
            for _ in 0..(caller_level - new_level) {
                link = self.contexts[link].static_link;
            }
            link
        } else {
            return Err(RuntimeError::InvalidControlTransfer);
        };

        let bp = memory.call_frame_base(function.param_size as u32)?;
        let prev_bp = memory.bp();
        let prev_sp = bp;

        self.contexts.push(Context {
            function_index: Some(index),
            function_name,
            level: new_level,
            static_link,
            prev_bp,
            prev_ip: caller_ip,
            prev_sp,
            bp,
        });
        memory.set_bp(bp);
        Ok(0)
    }

    /// Leave the current activation, restoring the caller's stack pointer
    /// and base pointer. Returns the instruction index to resume the
    /// caller at, i.e. the instruction after the `call`.
    pub fn ret(&mut self, memory: &mut Memory) -> Result<usize, RuntimeError> {
        if self.contexts.len() <= 1 {
            return Err(RuntimeError::InvalidControlTransfer);
        }
        let ctx = self.contexts.pop().expect("checked len above");
        memory.set_sp(ctx.prev_sp);
        memory.set_bp(ctx.prev_bp);
        Ok(ctx.prev_ip + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use c0vm_asm::Instruction;

    fn function(level: u16, param_size: u16) -> Function {
        Function {
            name_index: 0,
            param_size,
            level,
            instructions: vec![Instruction::nullary(c0vm_asm::Opcode::Ret)],
        }
    }

    #[test]
    fn root_context_is_named_and_at_level_zero() {
        let stack = CallStack::new();
        assert_eq!(stack.current().function_name, "__START__");
        assert_eq!(stack.current().level, 0);
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn calling_one_level_deeper_links_to_the_caller() {
        let mut memory = Memory::new();
        let mut stack = CallStack::new();
        let f = function(1, 0);
        stack.call(&mut memory, 0, &f, "f".to_string(), 0).unwrap();
        assert_eq!(stack.current().static_link, 0);
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn calling_a_sibling_links_to_the_shared_parent() {
        let mut memory = Memory::new();
        let mut stack = CallStack::new();
        let outer = function(1, 0);
        let inner_a = function(2, 0);
        let inner_b = function(2, 0);
        stack.call(&mut memory, 0, &outer, "outer".to_string(), 0).unwrap();
        stack.call(&mut memory, 1, &inner_a, "a".to_string(), 1).unwrap();
        stack.ret(&mut memory).unwrap();
        stack.call(&mut memory, 2, &inner_b, "b".to_string(), 2).unwrap();
        // both inner_a and inner_b are level 2 under the same level-1 outer.
        assert_eq!(stack.current().static_link, 1);
    }

    #[test]
    fn ret_from_root_is_an_invalid_control_transfer() {
        let mut memory = Memory::new();
        let mut stack = CallStack::new();
        assert_eq!(
            stack.ret(&mut memory).unwrap_err(),
            RuntimeError::InvalidControlTransfer
        );
    }

    #[test]
    fn call_and_ret_restore_the_callers_frame() {
        let mut memory = Memory::new();
        let mut stack = CallStack::new();
        memory.push_int(7).unwrap(); // one argument already pushed.
        let f = function(1, 1);
        stack.call(&mut memory, 0, &f, "f".to_string(), 0).unwrap();
        assert_eq!(memory.bp(), 0);
        let resume_ip = stack.ret(&mut memory).unwrap();
        assert_eq!(resume_ip, 1);
        assert_eq!(memory.bp(), 0);
        assert_eq!(memory.sp(), 0);
    }

    #[test]
    fn loada_reads_the_static_ancestors_base_pointer() {
        let mut memory = Memory::new();
        let mut stack = CallStack::new();
        let outer = function(1, 0);
        stack.call(&mut memory, 0, &outer, "outer".to_string(), 0).unwrap();
        let outer_bp = memory.bp();
        let inner = function(2, 0);
        stack.call(&mut memory, 1, &inner, "inner".to_string(), 1).unwrap();
        assert_eq!(stack.loada(1, 3), outer_bp + 3);
    }
}
