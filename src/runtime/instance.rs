//! Module instantiation: import resolution, resource allocation, segment
//! application, and the start function.
//!
//! Imported tables, memories, and globals are owned by the host and shared
//! into the instance (`Rc`), while module-declared resources are allocated
//! here and owned by the instance. Element and data segments are applied
//! all-or-nothing: every bound is validated before the first write, so a
//! failing instantiation leaves imported state untouched.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::limits::{HARD_MEMORY_LIMIT, MEMORY_PAGES_LIMIT, PAGE_SIZE};
use crate::parser::module::{ConstantExpression, FuncType, ImportDesc, Limits, Module};

use super::executor;
use super::memory::Memory;
use super::table::Table;
use super::ExecutionResult;

pub type SharedTable = Rc<RefCell<Table>>;
pub type SharedMemory = Rc<RefCell<Memory>>;
pub type SharedGlobal = Rc<Cell<u64>>;

/// A host function: invoked with the executing instance and one 64-bit slot
/// per declared input, returning an [`ExecutionResult`] spliced into the
/// caller.
pub type HostFunc = Rc<dyn Fn(&mut Instance<'_>, &[u64]) -> ExecutionResult>;

/// A function import: the callable paired with its claimed signature.
#[derive(Clone)]
pub struct ExternalFunction {
    pub function: HostFunc,
    pub func_type: FuncType,
}

/// A table import. `limits` is the host's claim about the storage and must
/// be at least as strict as the module's declaration.
#[derive(Clone)]
pub struct ExternalTable {
    pub table: SharedTable,
    pub limits: Limits,
}

/// A memory import, with the same strictness contract as [`ExternalTable`].
#[derive(Clone)]
pub struct ExternalMemory {
    pub memory: SharedMemory,
    pub limits: Limits,
}

/// A global import: a shared 64-bit cell and its mutability.
#[derive(Clone)]
pub struct ExternalGlobal {
    pub value: SharedGlobal,
    pub is_mutable: bool,
}

/// A runnable binding of a [`Module`] to concrete imports and allocated
/// resources. The module outlives the instance and stays immutable.
pub struct Instance<'m> {
    pub module: &'m Module,
    pub imported_functions: Vec<ExternalFunction>,
    pub imported_globals: Vec<ExternalGlobal>,
    pub table: Option<SharedTable>,
    pub memory: Option<SharedMemory>,
    /// Page ceiling for `memory.grow`: the declared or provided maximum,
    /// defaulted to the hard cap when absent.
    pub memory_max_pages: u32,
    /// Module-declared globals, in declaration order.
    pub globals: Vec<u64>,
}

impl std::fmt::Debug for Instance<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("module", self.module)
            .field("imported_functions", &self.imported_functions.len())
            .field("imported_globals", &self.imported_globals.len())
            .field("memory_max_pages", &self.memory_max_pages)
            .field("globals", &self.globals)
            .finish()
    }
}

impl Instance<'_> {
    /// Read a global in the merged index space (imports first).
    pub fn global(&self, index: u32) -> u64 {
        let imported = self.imported_globals.len() as u32;
        if index < imported {
            self.imported_globals[index as usize].value.get()
        } else {
            self.globals[(index - imported) as usize]
        }
    }

    /// Write a global in the merged index space. Mutability is a
    /// validation-time property and is not re-checked here.
    pub fn set_global(&mut self, index: u32, value: u64) {
        let imported = self.imported_globals.len() as u32;
        if index < imported {
            self.imported_globals[index as usize].value.set(value);
        } else {
            self.globals[(index - imported) as usize] = value;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstantiateError {
    #[error("Module requires {required} imported functions, {provided} provided")]
    ImportedFunctionCountMismatch { required: usize, provided: usize },
    #[error("Function {0} type doesn't match module's function import type")]
    ImportedFunctionTypeMismatch(usize),
    #[error("Module defines an imported table but none was provided.")]
    ImportedTableMissing,
    #[error("Trying to provide imported table to a module that doesn't define one.")]
    UnexpectedImportedTable,
    #[error("Module defines an imported memory but none was provided.")]
    ImportedMemoryMissing,
    #[error("Trying to provide imported memory to a module that doesn't define one.")]
    UnexpectedImportedMemory,
    #[error("Provided import's min is below import's min defined in module.")]
    ImportedLimitsMinTooLow,
    #[error("Provided import's max is above import's max defined in module.")]
    ImportedLimitsMaxTooHigh,
    #[error("Provided imported table doesn't fit provided limits")]
    ImportedTableLimitsMismatch,
    #[error("Provided imported memory doesn't fit provided limits")]
    ImportedMemoryLimitsMismatch,
    #[error("Imported memory limits cannot exceed hard memory limit of 268435456 bytes.")]
    ImportedMemoryLimitsExceeded,
    #[error("Module requires {required} imported globals, {provided} provided")]
    ImportedGlobalCountMismatch { required: usize, provided: usize },
    #[error("Global {0} mutability doesn't match module's global mutability")]
    ImportedGlobalMutabilityMismatch(usize),
    #[error("Cannot support more than 1 table section.")]
    TooManyTables,
    #[error("Cannot support more than 1 memory section.")]
    TooManyMemories,
    #[error("Cannot exceed hard memory limit of 268435456 bytes.")]
    MemoryLimitsExceeded,
    #[error("Constant expression can use global_get only for const globals.")]
    ConstantExpressionGlobalNotConst,
    #[error("Global can be initialized by another const global only if it's imported.")]
    GlobalInitFromModuleGlobal,
    #[error("Element segment is out of table bounds")]
    ElementSegmentOutOfBounds,
    #[error("Data segment is out of memory bounds")]
    DataSegmentOutOfBounds,
    #[error("Start function failed to execute")]
    StartFunctionFailed,
}

/// Evaluate a constant expression against the resolved imports.
///
/// `global_get` may only name an imported, immutable global; mutable,
/// module-declared, and out-of-range references are rejected. Total on
/// well-typed inputs, never traps.
fn evaluate_constant_expression(
    expr: &ConstantExpression,
    imported_globals: &[ExternalGlobal],
) -> Result<u64, InstantiateError> {
    match *expr {
        ConstantExpression::Constant(value) => Ok(value),
        ConstantExpression::GlobalGet(index) => {
            let global = imported_globals
                .get(index as usize)
                .ok_or(InstantiateError::ConstantExpressionGlobalNotConst)?;
            if global.is_mutable {
                return Err(InstantiateError::ConstantExpressionGlobalNotConst);
            }
            Ok(global.value.get())
        }
    }
}

fn check_imported_limits(declared: &Limits, provided: &Limits) -> Result<(), InstantiateError> {
    if provided.min < declared.min {
        return Err(InstantiateError::ImportedLimitsMinTooLow);
    }
    if let Some(declared_max) = declared.max {
        match provided.max {
            Some(provided_max) if provided_max <= declared_max => {}
            _ => return Err(InstantiateError::ImportedLimitsMaxTooHigh),
        }
    }
    Ok(())
}

/// Bind a module to its imports, allocate declared resources, apply element
/// and data segments, and run the start function.
pub fn instantiate<'m>(
    module: &'m Module,
    imported_functions: Vec<ExternalFunction>,
    imported_table: Option<ExternalTable>,
    imported_memory: Option<ExternalMemory>,
    imported_globals: Vec<ExternalGlobal>,
) -> Result<Instance<'m>, InstantiateError> {
    if module.imported_table().is_some() && module.table.is_some() {
        return Err(InstantiateError::TooManyTables);
    }
    if module.imported_memory().is_some() && module.memory.is_some() {
        return Err(InstantiateError::TooManyMemories);
    }

    // Function imports: exact count, equal types, declaration order.
    let required = module.imported_function_count();
    if imported_functions.len() != required {
        return Err(InstantiateError::ImportedFunctionCountMismatch {
            required,
            provided: imported_functions.len(),
        });
    }
    let mut function_idx = 0usize;
    for import in &module.imports {
        if let ImportDesc::Function { type_index } = import.desc {
            if imported_functions[function_idx].func_type != module.types[type_index as usize] {
                return Err(InstantiateError::ImportedFunctionTypeMismatch(function_idx));
            }
            function_idx += 1;
        }
    }

    // Table: bind the import or allocate the declared one at its minimum.
    let table = match (module.imported_table(), imported_table) {
        (Some(declared), Some(provided)) => {
            check_imported_limits(&declared.limits, &provided.limits)?;
            let size = provided.table.borrow().size();
            let fits = size >= provided.limits.min
                && provided.limits.max.map_or(true, |max| size <= max);
            if !fits {
                return Err(InstantiateError::ImportedTableLimitsMismatch);
            }
            Some(provided.table)
        }
        (Some(_), None) => return Err(InstantiateError::ImportedTableMissing),
        (None, Some(_)) => return Err(InstantiateError::UnexpectedImportedTable),
        (None, None) => module
            .table
            .as_ref()
            .map(|declared| Rc::new(RefCell::new(Table::new(declared.limits.min)))),
    };

    // Memory: bind the import or allocate the declared minimum, both capped.
    let (memory, memory_max_pages) = match (module.imported_memory(), imported_memory) {
        (Some(declared), Some(provided)) => {
            check_imported_limits(&declared.limits, &provided.limits)?;
            if provided.limits.min > MEMORY_PAGES_LIMIT
                || provided.limits.max.map_or(false, |max| max > MEMORY_PAGES_LIMIT)
            {
                return Err(InstantiateError::ImportedMemoryLimitsExceeded);
            }
            let size = provided.memory.borrow().size();
            let fits = size >= provided.limits.min as usize * PAGE_SIZE
                && provided.limits.max.map_or(true, |max| size <= max as usize * PAGE_SIZE);
            if !fits {
                return Err(InstantiateError::ImportedMemoryLimitsMismatch);
            }
            let max_pages = provided.limits.max.unwrap_or(MEMORY_PAGES_LIMIT);
            (Some(provided.memory), max_pages)
        }
        (Some(_), None) => return Err(InstantiateError::ImportedMemoryMissing),
        (None, Some(_)) => return Err(InstantiateError::UnexpectedImportedMemory),
        (None, None) => match &module.memory {
            Some(declared) => {
                let max_pages = declared.limits.max.unwrap_or(MEMORY_PAGES_LIMIT);
                if declared.limits.min as usize * PAGE_SIZE > HARD_MEMORY_LIMIT
                    || max_pages as usize * PAGE_SIZE > HARD_MEMORY_LIMIT
                {
                    return Err(InstantiateError::MemoryLimitsExceeded);
                }
                (Some(Rc::new(RefCell::new(Memory::new(declared.limits.min)))), max_pages)
            }
            None => (None, 0),
        },
    };

    // Global imports: exact count, matching mutability.
    let required = module.imported_global_count();
    if imported_globals.len() != required {
        return Err(InstantiateError::ImportedGlobalCountMismatch {
            required,
            provided: imported_globals.len(),
        });
    }
    let mut global_idx = 0usize;
    for import in &module.imports {
        if let ImportDesc::Global { is_mutable, .. } = import.desc {
            if imported_globals[global_idx].is_mutable != is_mutable {
                return Err(InstantiateError::ImportedGlobalMutabilityMismatch(global_idx));
            }
            global_idx += 1;
        }
    }

    // Module globals initialise in declaration order; an initialiser may
    // read an imported immutable global but never another module global.
    let mut globals = Vec::with_capacity(module.globals.len());
    for global in &module.globals {
        if let ConstantExpression::GlobalGet(index) = global.init {
            if index as usize >= imported_globals.len() {
                return Err(InstantiateError::GlobalInitFromModuleGlobal);
            }
        }
        globals.push(evaluate_constant_expression(&global.init, &imported_globals)?);
    }

    // Validate every segment bound before writing anything, so an
    // out-of-bounds segment cannot leave partial writes behind.
    let mut element_offsets = Vec::with_capacity(module.elements.len());
    for element in &module.elements {
        let offset = evaluate_constant_expression(&element.offset, &imported_globals)?;
        let table_size = match &table {
            Some(table) => table.borrow().size() as u64,
            None => return Err(InstantiateError::ElementSegmentOutOfBounds),
        };
        match offset.checked_add(element.init.len() as u64) {
            Some(end) if end <= table_size => {}
            _ => return Err(InstantiateError::ElementSegmentOutOfBounds),
        }
        element_offsets.push(offset as u32);
    }
    let mut data_offsets = Vec::with_capacity(module.data.len());
    for data in &module.data {
        let offset = evaluate_constant_expression(&data.offset, &imported_globals)?;
        let memory_size = match &memory {
            Some(memory) => memory.borrow().size() as u64,
            None => return Err(InstantiateError::DataSegmentOutOfBounds),
        };
        match offset.checked_add(data.init.len() as u64) {
            Some(end) if end <= memory_size => {}
            _ => return Err(InstantiateError::DataSegmentOutOfBounds),
        }
        data_offsets.push(offset);
    }

    // Commit: elements in declaration order, then data.
    if let Some(table) = &table {
        let mut table = table.borrow_mut();
        for (element, &offset) in module.elements.iter().zip(&element_offsets) {
            for (i, &func_idx) in element.init.iter().enumerate() {
                table
                    .set(offset + i as u32, Some(func_idx))
                    .map_err(|_| InstantiateError::ElementSegmentOutOfBounds)?;
            }
        }
    }
    if let Some(memory) = &memory {
        let mut memory = memory.borrow_mut();
        for (data, &offset) in module.data.iter().zip(&data_offsets) {
            memory
                .write_bytes(offset, &data.init)
                .map_err(|_| InstantiateError::DataSegmentOutOfBounds)?;
        }
    }

    let mut instance = Instance {
        module,
        imported_functions,
        imported_globals,
        table,
        memory,
        memory_max_pages,
        globals,
    };

    if let Some(start_idx) = module.start {
        let outcome = executor::execute(&mut instance, start_idx, &[]);
        if outcome.trapped {
            tracing::warn!(func = start_idx, "start function trapped");
            return Err(InstantiateError::StartFunctionFailed);
        }
    }

    tracing::debug!(
        globals = instance.globals.len(),
        has_table = instance.table.is_some(),
        has_memory = instance.memory.is_some(),
        memory_max_pages = instance.memory_max_pages,
        "module instantiated"
    );
    Ok(instance)
}
