use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::backends::{BackendError, BlockSource, CatalogFunction, IrStatement, Project};
use crate::model::{BlockRecord, FunctionRecord, InstructionRecord};

/// Explicit set of function names to keep. Absence of a filter means "all functions".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionFilter(BTreeSet<String>);

impl FunctionFilter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Catalog functions retained by `filter`, in catalog order.
pub fn select_functions(
    catalog: Vec<CatalogFunction>,
    filter: Option<&FunctionFilter>,
) -> Vec<CatalogFunction> {
    match filter {
        Some(filter) => catalog.into_iter().filter(|f| filter.matches(&f.name)).collect(),
        None => catalog,
    }
}

/// Static metadata for one function. Paths are filled in later by exploration.
pub fn function_record(function: &CatalogFunction) -> FunctionRecord {
    FunctionRecord {
        address: function.address,
        name: function.name.clone(),
        block_count: function.blocks.len(),
        size: function.size,
        blocks: function.blocks.clone(),
        endpoints: function.endpoints.clone(),
        paths: Vec::new(),
    }
}

/// Build the record for one block: decoded instructions, sorted and de-duplicated by
/// address, with lifted IR joined back onto them.
///
/// A failed IR walk keeps the block with bare instructions.
pub fn block_record<B: BlockSource>(address: u64, function: u64, block: &B) -> BlockRecord {
    let mut instructions: BTreeMap<u64, InstructionRecord> = block
        .instructions()
        .into_iter()
        .map(|insn| {
            (
                insn.address,
                InstructionRecord {
                    address: insn.address,
                    mnemonic: insn.mnemonic,
                    operands: insn.operands,
                    ir: Vec::new(),
                },
            )
        })
        .collect();

    match block.ir_statements() {
        Ok(statements) => attach_ir(&mut instructions, &statements),
        Err(err) => debug!("Keeping block 0x{address:x} without IR: {err}"),
    }

    BlockRecord {
        address,
        function,
        size: block.size(),
        instructions: instructions.into_values().collect(),
    }
}

/// Append each statement's text to the instruction under the current address cursor.
///
/// The cursor moves on every statement carrying an address; statements before the first
/// marker, or under an address that decoded to no instruction, are dropped.
pub fn attach_ir(instructions: &mut BTreeMap<u64, InstructionRecord>, statements: &[IrStatement]) {
    let mut cursor: Option<u64> = None;
    for stmt in statements {
        if let Some(addr) = stmt.address {
            cursor = Some(addr);
        }
        if let Some(insn) = cursor.and_then(|addr| instructions.get_mut(&addr)) {
            insn.ir.push(stmt.text.clone());
        }
    }
}

/// Function record plus the records of all its blocks.
///
/// Block lookup failures mean the recovered CFG is inconsistent and are propagated.
pub fn extract_function<P: Project>(
    project: &P,
    function: &CatalogFunction,
) -> Result<(FunctionRecord, Vec<BlockRecord>), BackendError> {
    let mut blocks = Vec::with_capacity(function.blocks.len());
    for &addr in &function.blocks {
        let block = project.block(addr)?;
        blocks.push(block_record(addr, function.address, &block));
    }
    Ok((function_record(function), blocks))
}
