//! A WebAssembly MVP interpreter.
//!
//! wyrm consumes a binary module, validates its structural invariants,
//! binds it to host-provided imports, and interprets its functions on a
//! stack machine. Coverage is the integer subset of the MVP: i32/i64
//! arithmetic, structured control flow, direct and indirect calls, linear
//! memory, tables, and globals. Floating point, SIMD, threads, and
//! multi-value are out of scope and rejected at parse time.
//!
//! # Modules
//!
//! - [`parser`] -- Binary format decoder. Reads `.wasm` bytes into a
//!   [`parser::module::Module`].
//! - [`runtime`] -- Instantiation, the interpreter, linear memory, tables,
//!   and the operand stack.
//! - [`limits`] -- Page size, the hard memory cap, and execution limits.
//!
//! # Example
//!
//! Parse a module exporting `add(i32, i32) -> i32`, instantiate it without
//! imports, and call the export:
//!
//! ```
//! let wasm = hex::decode(
//!     "0061736d0100000001070160027f7f017f03020100070701036164640000\
//!      0a09010700200020016a0b",
//! )
//! .unwrap();
//!
//! let module = wyrm::parse(&wasm).unwrap();
//! let func_idx = wyrm::find_exported_function(&module, "add").unwrap();
//! let mut instance = wyrm::instantiate(&module, vec![], None, None, vec![]).unwrap();
//!
//! let outcome = wyrm::execute(&mut instance, func_idx, &[3, 4]);
//! assert!(!outcome.trapped);
//! assert_eq!(outcome.result, Some(7));
//! ```

pub mod limits;
pub mod parser;
pub mod runtime;

pub use parser::module::Module;
pub use parser::{find_exported_function, parse, ParserError};
pub use runtime::{
    execute, instantiate, ExecutionResult, ExternalFunction, ExternalGlobal, ExternalMemory,
    ExternalTable, HostFunc, Instance, InstantiateError, SharedGlobal, SharedMemory, SharedTable,
};
