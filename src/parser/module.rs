//! In-memory representation of a parsed module.
//!
//! A [`Module`] is immutable once `parse` returns and may be shared by any
//! number of instances. Function and global index spaces place imports first,
//! followed by locally defined entries; the accessors here resolve indices
//! across the merged spaces.

use std::fmt;

use super::instruction::Instruction;
use super::ParserError;

/// Value types the interpreter executes.
///
/// Floating-point, vector, and reference type bytes are recognised by
/// [`ValType::decode`] but rejected as unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValType {
    I32,
    I64,
}

impl ValType {
    pub(crate) fn decode(byte: u8) -> Result<ValType, ParserError> {
        match byte {
            0x7f => Ok(ValType::I32),
            0x7e => Ok(ValType::I64),
            // f64, f32, v128, funcref, externref
            0x7c | 0x7d | 0x7b | 0x70 | 0x6f => Err(ParserError::UnsupportedValueType(byte)),
            _ => Err(ParserError::InvalidValueType(byte)),
        }
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValType::I32 => write!(f, "i32"),
            ValType::I64 => write!(f, "i64"),
        }
    }
}

/// A function signature. `outputs` holds at most one entry (no multi-value).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FuncType {
    pub inputs: Vec<ValType>,
    pub outputs: Vec<ValType>,
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, input) in self.inputs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{input}")?;
        }
        write!(f, ") -> ")?;
        match self.outputs.first() {
            Some(output) => write!(f, "{output}"),
            None => write!(f, "nil"),
        }
    }
}

/// Size bounds for a table or memory. `max`, when present, is >= `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    pub limits: Limits,
}

/// The restricted expression grammar for global initialisers and segment
/// offsets. `Constant` carries i32 values zero-extended to 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantExpression {
    Constant(u64),
    GlobalGet(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Global {
    pub is_mutable: bool,
    pub init: ConstantExpression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportDesc {
    Function { type_index: u32 },
    Table(TableType),
    Memory(MemoryType),
    Global { value_type: ValType, is_mutable: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub desc: ImportDesc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportIndex {
    Function(u32),
    Table(u32),
    Memory(u32),
    Global(u32),
}

impl ExportIndex {
    pub(crate) fn decode(kind: u8, index: u32) -> Result<ExportIndex, ParserError> {
        match kind {
            0x00 => Ok(ExportIndex::Function(index)),
            0x01 => Ok(ExportIndex::Table(index)),
            0x02 => Ok(ExportIndex::Memory(index)),
            0x03 => Ok(ExportIndex::Global(index)),
            _ => Err(ParserError::InvalidExportKind(kind)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub index: ExportIndex,
}

/// Table initialiser: function indices written at `offset` at instantiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSegment {
    pub offset: ConstantExpression,
    pub init: Vec<u32>,
}

/// Memory initialiser: bytes written at `offset` at instantiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegment {
    pub offset: ConstantExpression,
    pub init: Vec<u8>,
}

/// A decoded function body.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    /// Declared locals, expanded (parameters are not included).
    pub locals: Vec<ValType>,
    pub instructions: Vec<Instruction>,
    /// Conservative bound on the operand stack height this body can reach,
    /// used to size the operand stack for an activation.
    pub max_stack_height: u32,
}

/// The parsed, immutable description of a program.
#[derive(Debug, Default, PartialEq)]
pub struct Module {
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    /// Type indices of locally defined functions, in code-section order.
    pub functions: Vec<u32>,
    pub table: Option<TableType>,
    pub memory: Option<MemoryType>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
    pub elements: Vec<ElementSegment>,
    pub code: Vec<FunctionBody>,
    pub data: Vec<DataSegment>,
}

impl Module {
    pub fn imported_function_count(&self) -> usize {
        self.imports
            .iter()
            .filter(|import| matches!(import.desc, ImportDesc::Function { .. }))
            .count()
    }

    pub fn imported_global_count(&self) -> usize {
        self.imports
            .iter()
            .filter(|import| matches!(import.desc, ImportDesc::Global { .. }))
            .count()
    }

    pub fn imported_table(&self) -> Option<&TableType> {
        self.imports.iter().find_map(|import| match &import.desc {
            ImportDesc::Table(table_type) => Some(table_type),
            _ => None,
        })
    }

    pub fn imported_memory(&self) -> Option<&MemoryType> {
        self.imports.iter().find_map(|import| match &import.desc {
            ImportDesc::Memory(memory_type) => Some(memory_type),
            _ => None,
        })
    }

    /// Total function count across the merged index space.
    pub fn function_count(&self) -> usize {
        self.imported_function_count() + self.functions.len()
    }

    /// Total global count across the merged index space.
    pub fn global_count(&self) -> usize {
        self.imported_global_count() + self.globals.len()
    }

    pub fn has_table(&self) -> bool {
        self.table.is_some() || self.imported_table().is_some()
    }

    pub fn has_memory(&self) -> bool {
        self.memory.is_some() || self.imported_memory().is_some()
    }

    /// The signature of a function in the merged index space.
    ///
    /// `func_idx` must be below [`Module::function_count`].
    pub fn function_type(&self, func_idx: u32) -> &FuncType {
        let mut remaining = func_idx as usize;
        for import in &self.imports {
            if let ImportDesc::Function { type_index } = import.desc {
                if remaining == 0 {
                    return &self.types[type_index as usize];
                }
                remaining -= 1;
            }
        }
        &self.types[self.functions[remaining] as usize]
    }
}

/// Look up an exported function's index in the merged function space.
pub fn find_exported_function(module: &Module, name: &str) -> Option<u32> {
    module.exports.iter().find_map(|export| match export.index {
        ExportIndex::Function(func_idx) if export.name == name => Some(func_idx),
        _ => None,
    })
}
