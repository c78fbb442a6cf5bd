use std::collections::{BTreeMap, BTreeSet};

use log::{error, trace};
use num_bigint::BigUint;
use thiserror::Error;

use crate::backends::{EngineError, SymbolicState, SymbolicVariable, VariableKey};
use crate::model::ExecutionPath;

/// Values with at least this many hex digits are rendered as text instead of hex.
pub const TEXT_THRESHOLD_HEX_DIGITS: usize = 62;

/// Register-file offsets of rsp/esp, rbp/ebp, rip/eip and the segment registers in the
/// x86 family register layout.
pub const X86_STRUCTURAL_OFFSETS: [u64; 5] = [0x30, 0x38, 0x40, 0x48, 0xb8];

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Batch evaluation failed: {0}")]
    Batch(#[from] EngineError),
    #[error("Value 0x{value} of {name} does not fit in {bits} bits")]
    Overflow { name: String, value: String, bits: u32 },
}

/// Architecture-keyed register offsets that are structural noise rather than inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionTable {
    by_arch: BTreeMap<String, BTreeSet<u64>>,
}

impl Default for ExclusionTable {
    fn default() -> Self {
        let mut table = Self::empty();
        for arch in ["x86_64", "amd64", "x86", "i386"] {
            table.extend(arch, X86_STRUCTURAL_OFFSETS);
        }
        table
    }
}

impl ExclusionTable {
    pub fn empty() -> Self {
        Self { by_arch: BTreeMap::new() }
    }

    /// Add offsets for `arch` (name matching is case-insensitive).
    pub fn extend(&mut self, arch: &str, offsets: impl IntoIterator<Item = u64>) -> &mut Self {
        self.by_arch.entry(arch.to_lowercase()).or_default().extend(offsets);
        self
    }

    /// Excluded offsets for `arch`; unknown architectures exclude nothing.
    pub fn for_arch(&self, arch: &str) -> BTreeSet<u64> {
        self.by_arch.get(&arch.to_lowercase()).cloned().unwrap_or_default()
    }
}

/// Dataset name for a variable.
pub fn variable_name(key: &VariableKey) -> String {
    match key {
        VariableKey::Api(name) => name.clone(),
        VariableKey::Register(offset) => format!("reg_{offset}"),
        VariableKey::Memory(addr) => format!("mem_{addr:x}"),
        VariableKey::File(name) => name.clone(),
        VariableKey::Other { name, .. } => name.clone(),
    }
}

/// Name and keep every variable except excluded registers, preserving order.
pub fn classify(
    variables: Vec<SymbolicVariable>,
    excluded_registers: &BTreeSet<u64>,
) -> Vec<(String, SymbolicVariable)> {
    variables
        .into_iter()
        .filter(|var| match var.key {
            VariableKey::Register(offset) => !excluded_registers.contains(&offset),
            _ => true,
        })
        .map(|var| (variable_name(&var.key), var))
        .collect()
}

/// Textual form of a resolved value, or `None` for zero.
///
/// Values are laid out big-endian in `ceil(bits / 8)` bytes. Short values print as `0x..`
/// hex; values of 62 hex digits or more are decoded as best-effort UTF-8 text.
pub fn decode_value(name: &str, value: &BigUint, bits: u32) -> Result<Option<String>, EvalError> {
    if value.bits() == 0 {
        return Ok(None);
    }

    let width = bits.div_ceil(8) as usize;
    let raw = value.to_bytes_be();
    if raw.len() > width {
        return Err(EvalError::Overflow {
            name: name.to_string(),
            value: value.to_str_radix(16),
            bits,
        });
    }

    if value.to_str_radix(16).len() < TEXT_THRESHOLD_HEX_DIGITS {
        return Ok(Some(format!("{value:#x}")));
    }

    let mut bytes = vec![0u8; width - raw.len()];
    bytes.extend_from_slice(&raw);
    Ok(Some(bytes_to_text(&bytes)))
}

/// UTF-8 decode dropping invalid sequences, trim trailing whitespace, remove NULs.
///
/// Values are padded with leading zero bytes, so leading whitespace is kept.
pub fn bytes_to_text(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    text.trim_end_matches(is_text_space).replace('\0', "")
}

fn is_text_space(c: char) -> bool {
    c.is_whitespace() || ('\u{1c}'..='\u{1f}').contains(&c)
}

/// Turns a collected state into an `ExecutionPath`.
#[derive(Debug, Clone)]
pub struct StateEvaluator {
    excluded_registers: BTreeSet<u64>,
    strict: bool,
}

impl StateEvaluator {
    pub fn new(excluded_registers: BTreeSet<u64>) -> Self {
        Self { excluded_registers, strict: false }
    }

    /// Propagate per-variable decode failures instead of dropping the variable.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn evaluate<S: SymbolicState>(&self, state: &S) -> Result<ExecutionPath, EvalError> {
        let named = classify(state.variables(), &self.excluded_registers);
        let variables: Vec<SymbolicVariable> = named.iter().map(|(_, var)| var.clone()).collect();

        trace!("Resolving {} variables at 0x{:x}", variables.len(), state.address());
        let resolved =
            if variables.is_empty() { Vec::new() } else { state.batch_eval(&variables)? };

        let mut values = Vec::new();
        for ((name, var), value) in named.iter().zip(resolved.iter()) {
            match decode_value(name, value, var.bits) {
                Ok(Some(text)) => values.push(text),
                Ok(None) => {}
                Err(err) if self.strict => return Err(err),
                Err(err) => error!("Failed to evaluate variable {name}: {err}"),
            }
        }

        Ok(ExecutionPath {
            variables: named.into_iter().map(|(name, _)| name).collect(),
            values,
            history: state.history().to_vec(),
        })
    }
}
