use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use capstone::{arch, prelude::*, Capstone, InsnGroupId};
use goblin::{elf, mach, pe, Object};
use log::debug;

use crate::backends::{
    BackendError, BinaryLoader, BlockSource, CatalogFunction, ControlFlowGraph,
    DecodedInstruction, IrStatement, Project,
};
use crate::model::{ArchInfo, BinaryMetadata, Endianness};
use crate::services::backends::cfg_walk::CfgWalkEngine;

const DEFAULT_MAX_INSTRUCTIONS: usize = 1 << 16;

/// Loader and CFG recovery built on goblin (formats) and capstone (decoding).
///
/// Functions come from defined function symbols (or the entry point when there are none);
/// blocks are split at branch targets and after every control transfer. No IR is lifted.
#[derive(Debug, Clone)]
pub struct CapstoneBackend {
    /// Architecture to assume when the object header is not recognized.
    pub arch_hint: Option<String>,
    /// Per-function decode budget.
    pub max_instructions: usize,
}

impl Default for CapstoneBackend {
    fn default() -> Self {
        Self { arch_hint: None, max_instructions: DEFAULT_MAX_INSTRUCTIONS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapstoneBlock {
    size: u64,
    instructions: Vec<DecodedInstruction>,
}

impl BlockSource for CapstoneBlock {
    fn size(&self) -> u64 {
        self.size
    }

    fn instructions(&self) -> Vec<DecodedInstruction> {
        self.instructions.clone()
    }

    fn ir_statements(&self) -> Result<Vec<IrStatement>, BackendError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone)]
pub struct CapstoneProject {
    metadata: BinaryMetadata,
    functions: Vec<CatalogFunction>,
    blocks: BTreeMap<u64, CapstoneBlock>,
    cfg: ControlFlowGraph,
}

impl Project for CapstoneProject {
    type Block = CapstoneBlock;
    type Engine = CfgWalkEngine;

    fn metadata(&self) -> &BinaryMetadata {
        &self.metadata
    }

    fn functions(&self) -> Vec<CatalogFunction> {
        self.functions.clone()
    }

    fn block(&self, address: u64) -> Result<CapstoneBlock, BackendError> {
        self.blocks.get(&address).cloned().ok_or(BackendError::MissingBlock(address))
    }

    fn cfg(&self) -> &ControlFlowGraph {
        &self.cfg
    }

    fn engine(&self) -> Result<CfgWalkEngine, BackendError> {
        Ok(CfgWalkEngine::new(self.cfg.clone()))
    }
}

#[derive(Debug, Clone)]
struct SymbolInfo {
    name: String,
    address: u64,
    size: Option<u64>,
    file_range: Option<(usize, usize)>,
}

#[derive(Debug, Clone)]
struct SectionRange {
    start: u64,
    end: u64,
    file_offset: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowKind {
    Plain,
    Call,
    Return,
    Jump { target: Option<u64>, conditional: bool },
}

#[derive(Debug, Clone)]
struct Flow {
    insn: DecodedInstruction,
    size: u64,
    kind: FlowKind,
}

fn load_error(path: &Path, reason: impl Into<String>) -> BackendError {
    BackendError::Load { path: path.to_path_buf(), reason: reason.into() }
}

fn arch_from_object(obj: &Object) -> Option<ArchInfo> {
    let endian = |little: bool| if little { Endianness::Little } else { Endianness::Big };
    match obj {
        Object::Elf(elf) => {
            let name = match elf.header.e_machine {
                elf::header::EM_X86_64 => "x86_64",
                elf::header::EM_386 => "x86",
                elf::header::EM_AARCH64 => "arm64",
                elf::header::EM_ARM => "arm",
                elf::header::EM_RISCV if elf.is_64 => "riscv64",
                elf::header::EM_RISCV => "riscv32",
                elf::header::EM_PPC64 => "ppc64",
                _ => return None,
            };
            let bits = if elf.is_64 { 64 } else { 32 };
            Some(ArchInfo::new(name, bits, endian(elf.little_endian)))
        }
        Object::PE(pe) => {
            let (name, bits) = match pe.header.coff_header.machine {
                pe::header::COFF_MACHINE_X86 => ("x86", 32),
                pe::header::COFF_MACHINE_X86_64 => ("x86_64", 64),
                pe::header::COFF_MACHINE_ARM => ("arm", 32),
                pe::header::COFF_MACHINE_ARM64 => ("arm64", 64),
                _ => return None,
            };
            Some(ArchInfo::new(name, bits, Endianness::Little))
        }
        Object::Mach(mach::Mach::Binary(bin)) => {
            let (name, bits) = match bin.header.cputype() {
                mach::cputype::CPU_TYPE_X86_64 => ("x86_64", 64),
                mach::cputype::CPU_TYPE_X86 => ("x86", 32),
                mach::cputype::CPU_TYPE_ARM => ("arm", 32),
                mach::cputype::CPU_TYPE_ARM64 => ("arm64", 64),
                _ => return None,
            };
            Some(ArchInfo::new(name, bits, endian(bin.little_endian)))
        }
        _ => None,
    }
}

fn arch_from_hint(hint: &str) -> ArchInfo {
    let name = hint.to_lowercase();
    let bits = match name.as_str() {
        "x86" | "i386" | "arm" | "armv7" | "riscv32" => 32,
        _ => 64,
    };
    ArchInfo::new(name, bits, Endianness::Little)
}

fn make_cs(arch: &str) -> Result<Capstone, BackendError> {
    let built = match arch {
        "x86_64" | "amd64" => {
            Capstone::new().x86().mode(arch::x86::ArchMode::Mode64).detail(true).build()
        }
        "x86" | "i386" => {
            Capstone::new().x86().mode(arch::x86::ArchMode::Mode32).detail(true).build()
        }
        "arm" | "armv7" => {
            Capstone::new().arm().mode(arch::arm::ArchMode::Arm).detail(true).build()
        }
        "arm64" | "aarch64" => {
            Capstone::new().arm64().mode(arch::arm64::ArchMode::Arm).detail(true).build()
        }
        "riscv" | "riscv64" => {
            Capstone::new().riscv().mode(arch::riscv::ArchMode::RiscV64).detail(true).build()
        }
        "riscv32" => {
            Capstone::new().riscv().mode(arch::riscv::ArchMode::RiscV32).detail(true).build()
        }
        "ppc" | "powerpc" | "ppc64" => {
            Capstone::new().ppc().mode(arch::ppc::ArchMode::Mode64).detail(true).build()
        }
        other => return Err(BackendError::Cfg(format!("no decoder for architecture {other}"))),
    };
    built.map_err(|e| BackendError::Cfg(format!("capstone init failed: {e}")))
}

fn section_range_to_file(
    addr: u64,
    size: Option<u64>,
    sec_addr: u64,
    sec_size: u64,
    sec_offset: u64,
    bytes_len: usize,
) -> Option<(usize, usize)> {
    let sec_end = sec_addr.checked_add(sec_size)?;
    if addr < sec_addr || addr >= sec_end {
        return None;
    }
    let offset_in_section = addr - sec_addr;
    let start = sec_offset.saturating_add(offset_in_section);
    if start as usize >= bytes_len {
        return None;
    }
    let available = sec_size - offset_in_section;
    let length = size.unwrap_or(available).min(available);
    let end = start.saturating_add(length).min(bytes_len as u64);
    if end <= start {
        None
    } else {
        Some((start as usize, end as usize))
    }
}

fn elf_symbols(elf: &elf::Elf, bytes_len: usize) -> Vec<SymbolInfo> {
    let mut symbols = Vec::new();
    for sym in &elf.syms {
        if !sym.is_function() || sym.st_shndx == elf::section_header::SHN_UNDEF as usize {
            continue;
        }
        let name = elf.strtab.get_at(sym.st_name).unwrap_or("").to_string();
        if name.is_empty() {
            continue;
        }
        let size = if sym.st_size > 0 { Some(sym.st_size) } else { None };
        let file_range = elf.section_headers.get(sym.st_shndx).and_then(|shdr| {
            section_range_to_file(
                sym.st_value,
                size,
                shdr.sh_addr,
                shdr.sh_size,
                shdr.sh_offset,
                bytes_len,
            )
        });
        symbols.push(SymbolInfo { name, address: sym.st_value, size, file_range });
    }
    symbols
}

fn mach_symbols(bin: &mach::MachO, bytes_len: usize) -> Vec<SymbolInfo> {
    let mut symbols = Vec::new();
    for sym in bin.symbols() {
        let Ok((name, nlist)) = sym else { continue };
        if nlist.n_value == 0 || nlist.is_undefined() {
            continue;
        }
        let name = name.trim_start_matches('_').to_string();
        if name.is_empty() {
            continue;
        }
        symbols.push(SymbolInfo { name, address: nlist.n_value, size: None, file_range: None });
    }

    let mut mapped = Vec::new();
    for (sec, _) in bin.segments.sections().flatten().filter_map(Result::ok) {
        mapped.push(sec);
    }
    for sym in symbols.iter_mut() {
        sym.file_range = mapped.iter().find_map(|sec| {
            section_range_to_file(
                sym.address,
                sym.size,
                sec.addr,
                sec.size,
                sec.offset.into(),
                bytes_len,
            )
        });
    }
    symbols
}

fn pe_symbols(pe: &pe::PE, bytes_len: usize) -> Vec<SymbolInfo> {
    let base = pe.image_base as u64;
    let mut symbols = Vec::new();
    for exp in &pe.exports {
        if exp.rva == 0 {
            continue;
        }
        let name = exp.name.unwrap_or_default().to_string();
        if name.is_empty() {
            continue;
        }
        let rva = exp.rva as u64;
        let file_range = pe.sections.iter().find_map(|sec| {
            let size = if sec.virtual_size == 0 { sec.size_of_raw_data } else { sec.virtual_size };
            section_range_to_file(
                rva,
                None,
                sec.virtual_address as u64,
                size as u64,
                sec.pointer_to_raw_data as u64,
                bytes_len,
            )
        });
        symbols.push(SymbolInfo { name, address: base + rva, size: None, file_range });
    }
    symbols
}

fn collect_sections(obj: &Object) -> Vec<SectionRange> {
    match obj {
        Object::Elf(elf) => elf
            .section_headers
            .iter()
            .filter(|sh| sh.sh_type != elf::section_header::SHT_NOBITS)
            .map(|sh| SectionRange {
                start: sh.sh_addr,
                end: sh.sh_addr.saturating_add(sh.sh_size),
                file_offset: Some(sh.sh_offset as usize),
            })
            .collect(),
        Object::PE(pe) => pe
            .sections
            .iter()
            .map(|sec| SectionRange {
                start: pe.image_base as u64 + sec.virtual_address as u64,
                end: pe.image_base as u64
                    + sec.virtual_address as u64
                    + sec.size_of_raw_data.min(sec.virtual_size.max(1)) as u64,
                file_offset: Some(sec.pointer_to_raw_data as usize),
            })
            .collect(),
        Object::Mach(mach::Mach::Binary(bin)) => bin
            .segments
            .sections()
            .flatten()
            .filter_map(|res| res.ok())
            .map(|(sec, _)| SectionRange {
                start: sec.addr,
                end: sec.addr.saturating_add(sec.size),
                file_offset: Some(sec.offset as usize),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn entry_point(obj: &Object) -> u64 {
    match obj {
        Object::Elf(elf) => elf.entry,
        Object::PE(pe) => pe.image_base as u64 + pe.entry as u64,
        Object::Mach(mach::Mach::Binary(bin)) => bin.entry,
        _ => 0,
    }
}

/// Imported routines keyed by the address of their import slot.
///
/// ELF entries use the GOT slot each PLT relocation patches (`r_offset`), not the PLT stub
/// a call instruction targets. PE entries use the IAT slot and Mach-O entries the bind
/// address.
fn imported_routines(obj: &Object) -> BTreeMap<u64, Vec<String>> {
    let mut routines: BTreeMap<u64, Vec<String>> = BTreeMap::new();
    match obj {
        Object::Elf(elf) => {
            for reloc in elf.pltrelocs.iter() {
                let name = elf
                    .dynsyms
                    .get(reloc.r_sym)
                    .and_then(|sym| elf.dynstrtab.get_at(sym.st_name))
                    .unwrap_or("");
                if !name.is_empty() {
                    routines.entry(reloc.r_offset).or_default().push(name.to_string());
                }
            }
        }
        Object::PE(pe) => {
            for import in &pe.imports {
                let address = pe.image_base as u64 + import.rva as u64;
                routines.entry(address).or_default().push(import.name.to_string());
            }
        }
        Object::Mach(mach::Mach::Binary(bin)) => {
            for import in bin.imports().unwrap_or_default() {
                let name = import.name.trim_start_matches('_');
                routines.entry(import.address).or_default().push(name.to_string());
            }
        }
        _ => {}
    }
    routines
}

fn function_symbols(obj: &Object, bytes_len: usize) -> Vec<SymbolInfo> {
    let mut symbols = match obj {
        Object::Elf(elf) => elf_symbols(elf, bytes_len),
        Object::PE(pe) => pe_symbols(pe, bytes_len),
        Object::Mach(mach::Mach::Binary(bin)) => mach_symbols(bin, bytes_len),
        _ => Vec::new(),
    };

    symbols.sort_by_key(|s| s.address);
    symbols.dedup_by_key(|s| s.address);

    // Unsized symbols run until the next symbol.
    let next_addresses: Vec<Option<u64>> =
        (0..symbols.len()).map(|i| symbols.get(i + 1).map(|s| s.address)).collect();
    for (sym, next) in symbols.iter_mut().zip(next_addresses) {
        if let (None, Some(next), Some((start, end))) = (sym.size, next, sym.file_range) {
            let limit = start.saturating_add((next - sym.address) as usize);
            sym.file_range = Some((start, end.min(limit)));
        }
    }
    symbols
}

fn entry_symbol(entry: u64, sections: &[SectionRange], bytes_len: usize) -> Option<SymbolInfo> {
    sections.iter().find_map(|sec| {
        let file_offset = sec.file_offset?;
        section_range_to_file(
            entry,
            None,
            sec.start,
            sec.end.saturating_sub(sec.start),
            file_offset as u64,
            bytes_len,
        )
        .map(|range| SymbolInfo {
            name: format!("sub_{entry:x}"),
            address: entry,
            size: None,
            file_range: Some(range),
        })
    })
}

fn branch_target(detail: &capstone::InsnDetail) -> Option<u64> {
    detail.arch_detail().operands().iter().find_map(|op| match op {
        capstone::arch::ArchOperand::X86Operand(op) => {
            if let capstone::arch::x86::X86OperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        capstone::arch::ArchOperand::ArmOperand(op) => {
            if let capstone::arch::arm::ArmOperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        capstone::arch::ArchOperand::Arm64Operand(op) => {
            if let capstone::arch::arm64::Arm64OperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        _ => None,
    })
}

fn is_conditional(mnemonic: &str) -> bool {
    let m = mnemonic.to_lowercase();
    (m.starts_with('j') && m != "jmp" && m != "jr")
        || m.starts_with("b.")
        || matches!(m.as_str(), "cbz" | "cbnz" | "tbz" | "tbnz" | "beq" | "bne" | "blt" | "bge")
}

fn decode_flows(cs: &Capstone, code: &[u8], address: u64, max: usize) -> Vec<Flow> {
    let Ok(insns) = cs.disasm_count(code, address, max) else {
        return Vec::new();
    };
    let ret = InsnGroupId(capstone::InsnGroupType::CS_GRP_RET as u8);
    let call = InsnGroupId(capstone::InsnGroupType::CS_GRP_CALL as u8);
    let jump = InsnGroupId(capstone::InsnGroupType::CS_GRP_JUMP as u8);

    insns
        .iter()
        .map(|i| {
            let mnemonic = i.mnemonic().unwrap_or("").to_string();
            let kind = match cs.insn_detail(i) {
                Ok(detail) => {
                    let groups = detail.groups();
                    if groups.contains(&ret) {
                        FlowKind::Return
                    } else if groups.contains(&call) {
                        FlowKind::Call
                    } else if groups.contains(&jump) {
                        FlowKind::Jump {
                            target: branch_target(&detail),
                            conditional: is_conditional(&mnemonic),
                        }
                    } else {
                        FlowKind::Plain
                    }
                }
                Err(_) => FlowKind::Plain,
            };
            Flow {
                insn: DecodedInstruction {
                    address: i.address(),
                    mnemonic,
                    operands: i.op_str().unwrap_or("").to_string(),
                },
                size: i.bytes().len() as u64,
                kind,
            }
        })
        .collect()
}

/// Split a decoded function into blocks and record intra-function edges.
fn split_blocks(flows: &[Flow], cfg: &mut ControlFlowGraph) -> Vec<(u64, CapstoneBlock)> {
    let starts: BTreeSet<u64> = flows.iter().map(|f| f.insn.address).collect();
    let mut leaders = BTreeSet::new();
    if let Some(first) = flows.first() {
        leaders.insert(first.insn.address);
    }
    for (idx, flow) in flows.iter().enumerate() {
        if let FlowKind::Jump { target: Some(target), .. } = flow.kind {
            if starts.contains(&target) {
                leaders.insert(target);
            }
        }
        if flow.kind != FlowKind::Plain {
            if let Some(next) = flows.get(idx + 1) {
                leaders.insert(next.insn.address);
            }
        }
    }

    let mut blocks = Vec::new();
    let mut current: Option<(u64, CapstoneBlock)> = None;
    for (idx, flow) in flows.iter().enumerate() {
        let (start, block) = current.get_or_insert_with(|| {
            (flow.insn.address, CapstoneBlock { size: 0, instructions: Vec::new() })
        });
        block.size += flow.size;
        block.instructions.push(flow.insn.clone());

        let next = flows.get(idx + 1).map(|f| f.insn.address);
        if next.is_some_and(|n| !leaders.contains(&n)) {
            continue;
        }

        let start = *start;
        cfg.add_node(start);
        match flow.kind {
            FlowKind::Return => {}
            FlowKind::Jump { target, conditional } => {
                if let Some(target) = target.filter(|t| starts.contains(t)) {
                    cfg.add_edge(start, target);
                }
                if let (true, Some(next)) = (conditional, next) {
                    cfg.add_edge(start, next);
                }
            }
            FlowKind::Call | FlowKind::Plain => {
                if let Some(next) = next {
                    cfg.add_edge(start, next);
                }
            }
        }
        if let Some(done) = current.take() {
            blocks.push(done);
        }
    }
    blocks
}

impl BinaryLoader for CapstoneBackend {
    type Project = CapstoneProject;

    fn load(&self, path: &Path) -> Result<CapstoneProject, BackendError> {
        let bytes = fs::read(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => BackendError::MissingBinary(path.to_path_buf()),
            _ => load_error(path, err.to_string()),
        })?;
        let obj = Object::parse(&bytes).map_err(|e| load_error(path, e.to_string()))?;

        let arch = arch_from_object(&obj)
            .or_else(|| self.arch_hint.as_deref().map(arch_from_hint))
            .ok_or_else(|| load_error(path, "unrecognized architecture"))?;
        let cs = make_cs(&arch.name)?;
        let entry = entry_point(&obj);
        let metadata = BinaryMetadata { arch, entry, routines: imported_routines(&obj) };

        let mut symbols = function_symbols(&obj, bytes.len());
        if symbols.is_empty() {
            symbols.extend(entry_symbol(entry, &collect_sections(&obj), bytes.len()));
        }

        let mut cfg = ControlFlowGraph::new();
        let mut functions = Vec::new();
        let mut blocks = BTreeMap::new();
        for sym in symbols {
            let Some((start, end)) = sym.file_range else {
                debug!("No file bytes for {} at 0x{:x}", sym.name, sym.address);
                continue;
            };
            let flows = decode_flows(&cs, &bytes[start..end], sym.address, self.max_instructions);
            let decoded_size: u64 = flows.iter().map(|f| f.size).sum();
            let split = split_blocks(&flows, &mut cfg);

            let block_addrs: Vec<u64> = split.iter().map(|(addr, _)| *addr).collect();
            let endpoints = block_addrs
                .iter()
                .copied()
                .filter(|&b| cfg.successors(b).next().is_none())
                .collect();
            functions.push(CatalogFunction {
                address: sym.address,
                name: sym.name,
                size: sym.size.unwrap_or(decoded_size),
                blocks: block_addrs,
                endpoints,
            });
            blocks.extend(split);
        }

        debug!(
            "Recovered {} functions, {} blocks from {}",
            functions.len(),
            blocks.len(),
            path.display()
        );
        Ok(CapstoneProject { metadata, functions, blocks, cfg })
    }

    fn name(&self) -> &'static str {
        "capstone"
    }
}
