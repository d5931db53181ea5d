//! Binary format decoder.
//!
//! [`parse`] consumes a `.wasm` byte stream and produces a
//! [`module::Module`] or a [`ParserError`]; it never returns a partially
//! decoded module. Sections are matched strictly in ascending id order, each
//! bounded to its declared length, with cross-section index checks applied
//! as soon as the referenced space is known.

pub mod instruction;
pub mod module;
pub mod reader;

use crate::limits::MAX_FUNCTION_LOCALS;

use instruction::{decode_body, decode_constant_expression};
use module::{
    DataSegment, ElementSegment, Export, ExportIndex, FuncType, FunctionBody, Global, Import,
    ImportDesc, Limits, MemoryType, Module, TableType, ValType,
};
use reader::Reader;

pub use module::find_exported_function;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParserError {
    #[error("invalid Wasm module")]
    InvalidModule,
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("malformed LEB128 integer")]
    MalformedLeb128,
    #[error("invalid UTF-8 in name")]
    InvalidUtf8,
    #[error("invalid section id {0}")]
    InvalidSectionId(u8),
    #[error("section {0} out of order")]
    SectionOutOfOrder(u8),
    #[error("section {id} size mismatch: declared {declared} bytes, consumed {consumed}")]
    SectionSizeMismatch { id: u8, declared: u32, consumed: u32 },
    #[error("invalid value type {0:#04x}")]
    InvalidValueType(u8),
    #[error("unsupported value type {0:#04x}")]
    UnsupportedValueType(u8),
    #[error("invalid function type")]
    InvalidFunctionType,
    #[error("a function type may declare at most one result")]
    MultipleResults,
    #[error("invalid limits flags {0:#04x}")]
    InvalidLimits(u8),
    #[error("limits minimum {min} is above maximum {max}")]
    LimitsMinAboveMax { min: u32, max: u32 },
    #[error("invalid import kind {0:#04x}")]
    InvalidImportKind(u8),
    #[error("invalid export kind {0:#04x}")]
    InvalidExportKind(u8),
    #[error("invalid element type {0:#04x}")]
    InvalidElemType(u8),
    #[error("invalid mutability flag {0:#04x}")]
    InvalidMutability(u8),
    #[error("Cannot support more than 1 table section.")]
    TooManyTables,
    #[error("Cannot support more than 1 memory section.")]
    TooManyMemories,
    #[error("function count mismatch: {functions} declared, {bodies} bodies")]
    FunctionCountMismatch { functions: usize, bodies: usize },
    #[error("type index {0} out of range")]
    TypeIndexOutOfRange(u32),
    #[error("function index {0} out of range")]
    FunctionIndexOutOfRange(u32),
    #[error("global index {0} out of range")]
    GlobalIndexOutOfRange(u32),
    #[error("local index {0} out of range")]
    LocalIndexOutOfRange(u32),
    #[error("table index {0} out of range")]
    TableIndexOutOfRange(u32),
    #[error("memory index {0} out of range")]
    MemoryIndexOutOfRange(u32),
    #[error("export index {0} out of range")]
    ExportIndexOutOfRange(u32),
    #[error("start function must have no parameters and no results")]
    InvalidStartFunctionType,
    #[error("memory instruction without a declared memory")]
    MemoryInstructionWithoutMemory,
    #[error("call_indirect without a declared table")]
    CallIndirectWithoutTable,
    #[error("branch label depth {0} out of range")]
    LabelDepthOutOfRange(u32),
    #[error("block nesting exceeds {0} levels")]
    BlockNestingTooDeep(usize),
    #[error("unexpected else outside an if block")]
    UnexpectedElse,
    #[error("unsupported instruction: opcode {0:#04x}")]
    UnsupportedInstruction(u8),
    #[error("invalid constant expression")]
    InvalidConstantExpression,
    #[error("function body size mismatch")]
    FunctionBodySizeMismatch,
    #[error("function declares too many locals")]
    TooManyLocals,
    #[error("zero byte expected after opcode {0:#04x}")]
    ZeroByteExpected(u8),
}

const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];
const WASM_VERSION: u32 = 1;

/// Decode a binary module.
pub fn parse(bytes: &[u8]) -> Result<Module, ParserError> {
    let mut reader = Reader::new(bytes);

    let magic = reader.read_bytes(4).map_err(|_| ParserError::InvalidModule)?;
    let version = reader.read_u32().map_err(|_| ParserError::InvalidModule)?;
    if magic != WASM_MAGIC || version != WASM_VERSION {
        return Err(ParserError::InvalidModule);
    }

    let mut module = Module::default();
    let mut last_id: i32 = -1;
    while reader.remaining() > 0 {
        let id = reader.read_byte()?;
        let size = reader.read_var_u32()? as usize;
        let mut section = reader.sub_reader(size)?;

        // Custom sections may appear anywhere and repeat; their contents
        // (name included) are skipped wholesale.
        if id == 0 {
            continue;
        }
        if id > 11 {
            return Err(ParserError::InvalidSectionId(id));
        }
        if i32::from(id) <= last_id {
            return Err(ParserError::SectionOutOfOrder(id));
        }
        last_id = i32::from(id);

        match id {
            1 => read_type_section(&mut section, &mut module)?,
            2 => read_import_section(&mut section, &mut module)?,
            3 => read_function_section(&mut section, &mut module)?,
            4 => read_table_section(&mut section, &mut module)?,
            5 => read_memory_section(&mut section, &mut module)?,
            6 => read_global_section(&mut section, &mut module)?,
            7 => read_export_section(&mut section, &mut module)?,
            8 => read_start_section(&mut section, &mut module)?,
            9 => read_element_section(&mut section, &mut module)?,
            10 => read_code_section(&mut section, &mut module)?,
            11 => read_data_section(&mut section, &mut module)?,
            _ => unreachable!(),
        }

        if section.remaining() != 0 {
            return Err(ParserError::SectionSizeMismatch {
                id,
                declared: size as u32,
                consumed: (size - section.remaining()) as u32,
            });
        }
    }

    if module.functions.len() != module.code.len() {
        return Err(ParserError::FunctionCountMismatch {
            functions: module.functions.len(),
            bodies: module.code.len(),
        });
    }

    tracing::debug!(
        types = module.types.len(),
        imports = module.imports.len(),
        functions = module.functions.len(),
        exports = module.exports.len(),
        "parsed module"
    );
    Ok(module)
}

fn read_valtype_vec(reader: &mut Reader<'_>) -> Result<Vec<ValType>, ParserError> {
    let count = reader.read_var_u32()?;
    let mut types = Vec::new();
    for _ in 0..count {
        types.push(ValType::decode(reader.read_byte()?)?);
    }
    Ok(types)
}

fn read_limits(reader: &mut Reader<'_>) -> Result<Limits, ParserError> {
    let flags = reader.read_byte()?;
    match flags {
        0x00 => Ok(Limits { min: reader.read_var_u32()?, max: None }),
        0x01 => {
            let min = reader.read_var_u32()?;
            let max = reader.read_var_u32()?;
            if min > max {
                return Err(ParserError::LimitsMinAboveMax { min, max });
            }
            Ok(Limits { min, max: Some(max) })
        }
        _ => Err(ParserError::InvalidLimits(flags)),
    }
}

fn read_table_type(reader: &mut Reader<'_>) -> Result<TableType, ParserError> {
    let elem_type = reader.read_byte()?;
    if elem_type != 0x70 {
        return Err(ParserError::InvalidElemType(elem_type));
    }
    Ok(TableType { limits: read_limits(reader)? })
}

fn read_mutability(reader: &mut Reader<'_>) -> Result<bool, ParserError> {
    match reader.read_byte()? {
        0x00 => Ok(false),
        0x01 => Ok(true),
        other => Err(ParserError::InvalidMutability(other)),
    }
}

fn read_type_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParserError> {
    let count = reader.read_var_u32()?;
    for _ in 0..count {
        if reader.read_byte()? != 0x60 {
            return Err(ParserError::InvalidFunctionType);
        }
        let inputs = read_valtype_vec(reader)?;
        let outputs = read_valtype_vec(reader)?;
        if outputs.len() > 1 {
            return Err(ParserError::MultipleResults);
        }
        module.types.push(FuncType { inputs, outputs });
    }
    Ok(())
}

fn read_import_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParserError> {
    let count = reader.read_var_u32()?;
    for _ in 0..count {
        let module_name = reader.read_name()?;
        let name = reader.read_name()?;
        let kind = reader.read_byte()?;
        let desc = match kind {
            0x00 => {
                let type_index = reader.read_var_u32()?;
                if type_index as usize >= module.types.len() {
                    return Err(ParserError::TypeIndexOutOfRange(type_index));
                }
                ImportDesc::Function { type_index }
            }
            0x01 => {
                if module.imported_table().is_some() {
                    return Err(ParserError::TooManyTables);
                }
                ImportDesc::Table(read_table_type(reader)?)
            }
            0x02 => {
                if module.imported_memory().is_some() {
                    return Err(ParserError::TooManyMemories);
                }
                ImportDesc::Memory(MemoryType { limits: read_limits(reader)? })
            }
            0x03 => {
                let value_type = ValType::decode(reader.read_byte()?)?;
                let is_mutable = read_mutability(reader)?;
                ImportDesc::Global { value_type, is_mutable }
            }
            _ => return Err(ParserError::InvalidImportKind(kind)),
        };
        module.imports.push(Import { module: module_name, name, desc });
    }
    Ok(())
}

fn read_function_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParserError> {
    let count = reader.read_var_u32()?;
    for _ in 0..count {
        let type_index = reader.read_var_u32()?;
        if type_index as usize >= module.types.len() {
            return Err(ParserError::TypeIndexOutOfRange(type_index));
        }
        module.functions.push(type_index);
    }
    Ok(())
}

fn read_table_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParserError> {
    let count = reader.read_var_u32()?;
    if count > 1 || (count == 1 && module.imported_table().is_some()) {
        return Err(ParserError::TooManyTables);
    }
    if count == 1 {
        module.table = Some(read_table_type(reader)?);
    }
    Ok(())
}

fn read_memory_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParserError> {
    let count = reader.read_var_u32()?;
    if count > 1 || (count == 1 && module.imported_memory().is_some()) {
        return Err(ParserError::TooManyMemories);
    }
    if count == 1 {
        module.memory = Some(MemoryType { limits: read_limits(reader)? });
    }
    Ok(())
}

fn read_global_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParserError> {
    let count = reader.read_var_u32()?;
    let global_count = module.imported_global_count() as u32 + count;
    for _ in 0..count {
        // The declared value type is decoded for validity but not retained;
        // global slots are untyped 64-bit cells at runtime.
        ValType::decode(reader.read_byte()?)?;
        let is_mutable = read_mutability(reader)?;
        let init = decode_constant_expression(reader, global_count)?;
        module.globals.push(Global { is_mutable, init });
    }
    Ok(())
}

fn read_export_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParserError> {
    let count = reader.read_var_u32()?;
    for _ in 0..count {
        let name = reader.read_name()?;
        let kind = reader.read_byte()?;
        let index = reader.read_var_u32()?;
        let export_index = ExportIndex::decode(kind, index)?;
        let in_range = match export_index {
            ExportIndex::Function(idx) => (idx as usize) < module.function_count(),
            ExportIndex::Table(idx) => idx == 0 && module.has_table(),
            ExportIndex::Memory(idx) => idx == 0 && module.has_memory(),
            ExportIndex::Global(idx) => (idx as usize) < module.global_count(),
        };
        if !in_range {
            return Err(ParserError::ExportIndexOutOfRange(index));
        }
        module.exports.push(Export { name, index: export_index });
    }
    Ok(())
}

fn read_start_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParserError> {
    let func_idx = reader.read_var_u32()?;
    if func_idx as usize >= module.function_count() {
        return Err(ParserError::FunctionIndexOutOfRange(func_idx));
    }
    let func_type = module.function_type(func_idx);
    if !func_type.inputs.is_empty() || !func_type.outputs.is_empty() {
        return Err(ParserError::InvalidStartFunctionType);
    }
    module.start = Some(func_idx);
    Ok(())
}

fn read_element_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParserError> {
    let count = reader.read_var_u32()?;
    let global_count = module.global_count() as u32;
    for _ in 0..count {
        let table_idx = reader.read_var_u32()?;
        if table_idx != 0 || !module.has_table() {
            return Err(ParserError::TableIndexOutOfRange(table_idx));
        }
        let offset = decode_constant_expression(reader, global_count)?;
        let func_count = reader.read_var_u32()?;
        let mut init = Vec::new();
        for _ in 0..func_count {
            let func_idx = reader.read_var_u32()?;
            if func_idx as usize >= module.function_count() {
                return Err(ParserError::FunctionIndexOutOfRange(func_idx));
            }
            init.push(func_idx);
        }
        module.elements.push(ElementSegment { offset, init });
    }
    Ok(())
}

fn read_code_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParserError> {
    let count = reader.read_var_u32()?;
    if count as usize != module.functions.len() {
        return Err(ParserError::FunctionCountMismatch {
            functions: module.functions.len(),
            bodies: count as usize,
        });
    }
    for body_idx in 0..count {
        let body_size = reader.read_var_u32()? as usize;
        let mut body_reader = reader.sub_reader(body_size)?;

        let param_count = module.types[module.functions[body_idx as usize] as usize].inputs.len();
        let mut locals = Vec::new();
        let group_count = body_reader.read_var_u32()?;
        for _ in 0..group_count {
            let repeat = body_reader.read_var_u32()?;
            let value_type = ValType::decode(body_reader.read_byte()?)?;
            if param_count as u64 + locals.len() as u64 + repeat as u64 > MAX_FUNCTION_LOCALS as u64 {
                return Err(ParserError::TooManyLocals);
            }
            for _ in 0..repeat {
                locals.push(value_type);
            }
        }

        let local_count = (param_count + locals.len()) as u32;
        let (instructions, max_stack_height) = decode_body(&mut body_reader, module, local_count)?;
        if body_reader.remaining() != 0 {
            return Err(ParserError::FunctionBodySizeMismatch);
        }
        module.code.push(FunctionBody { locals, instructions, max_stack_height });
    }
    Ok(())
}

fn read_data_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParserError> {
    let count = reader.read_var_u32()?;
    let global_count = module.global_count() as u32;
    for _ in 0..count {
        let memory_idx = reader.read_var_u32()?;
        if memory_idx != 0 || !module.has_memory() {
            return Err(ParserError::MemoryIndexOutOfRange(memory_idx));
        }
        let offset = decode_constant_expression(reader, global_count)?;
        let len = reader.read_var_u32()? as usize;
        let init = reader.read_bytes(len)?.to_vec();
        module.data.push(DataSegment { offset, init });
    }
    Ok(())
}
