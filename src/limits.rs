//! Implementation limits for parsing and execution.
//!
//! These caps bound resource use on malformed or adversarial input and fix
//! the constants the WebAssembly MVP leaves to the embedder.

/// WebAssembly page size in bytes (64 KiB).
pub const PAGE_SIZE: usize = 65_536;

/// Hard cap on linear memory in bytes (256 MiB).
///
/// Applies to declared and imported memories alike, whether or not the module
/// states a maximum.
pub const HARD_MEMORY_LIMIT: usize = 268_435_456;

/// Hard cap on linear memory in pages.
pub const MEMORY_PAGES_LIMIT: u32 = (HARD_MEMORY_LIMIT / PAGE_SIZE) as u32;

/// Maximum number of nested function activations before execution traps.
pub const CALL_STACK_LIMIT: usize = 1_024;

/// Maximum nesting depth of block/loop/if regions in a single function body.
pub const MAX_BLOCK_NESTING: usize = 1_024;

/// Maximum number of locals in a single function, parameters included.
pub const MAX_FUNCTION_LOCALS: u32 = 50_000;
