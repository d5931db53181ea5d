//! Runtime: instantiation and the stack-machine interpreter.
//!
//! A parsed [`crate::parser::module::Module`] is bound to concrete imports
//! by [`instantiate`], producing an [`Instance`]; [`execute`] then interprets
//! its functions. Traps are not Rust errors: they surface as
//! `trapped: true` on the [`ExecutionResult`] and leave the instance usable.

pub mod executor;
pub mod instance;
pub mod memory;
pub mod ops;
pub mod stack;
pub mod table;

pub use executor::execute;
pub use instance::{
    instantiate, ExternalFunction, ExternalGlobal, ExternalMemory, ExternalTable, HostFunc,
    Instance, InstantiateError, SharedGlobal, SharedMemory, SharedTable,
};
pub use memory::Memory;
pub use stack::OperandStack;
pub use table::Table;

/// Outcome of executing a function.
///
/// `result` carries the single declared output (i32 zero-extended), or is
/// absent for nullary results and for traps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub trapped: bool,
    pub result: Option<u64>,
}

impl ExecutionResult {
    pub fn from_value(value: u64) -> ExecutionResult {
        ExecutionResult { trapped: false, result: Some(value) }
    }

    pub fn none() -> ExecutionResult {
        ExecutionResult { trapped: false, result: None }
    }

    pub fn trap() -> ExecutionResult {
        ExecutionResult { trapped: true, result: None }
    }
}

/// Runtime conditions that abort the current invocation.
///
/// Internal to the interpreter's unwinding; the reason is logged and then
/// erased into `ExecutionResult::trap()` at the public boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Trap {
    #[error("unreachable instruction executed")]
    Unreachable,
    #[error("out of bounds memory access")]
    MemoryAccessOutOfBounds,
    #[error("integer divide by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("undefined element")]
    UndefinedElement,
    #[error("uninitialized element")]
    UninitializedElement,
    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,
    #[error("call stack exhausted")]
    CallStackExhausted,
    #[error("host function trapped")]
    HostFunctionFailed,
}
