#![allow(dead_code)]

use std::path::{Path, PathBuf};

use object::write::{Object, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope,
};

/// `test edi, edi; je 0xa; mov eax, 1; ret; xor eax, eax; ret`
const PICK: [u8; 13] =
    [0x85, 0xFF, 0x74, 0x06, 0xB8, 0x01, 0x00, 0x00, 0x00, 0xC3, 0x31, 0xC0, 0xC3];

/// Write a relocatable x86_64 ELF with a single function `pick` (three blocks, two
/// paths) and return its path.
pub fn write_pick_elf(dir: &Path) -> PathBuf {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text_id = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
    obj.section_mut(text_id).set_data(PICK.to_vec(), 16);
    obj.add_symbol(Symbol {
        name: b"pick".to_vec(),
        value: 0,
        size: PICK.len() as u64,
        kind: SymbolKind::Text,
        scope: SymbolScope::Linkage,
        weak: false,
        section: SymbolSection::Section(text_id),
        flags: SymbolFlags::Elf { st_info: 0x12, st_other: 0 },
    });

    let path = dir.join("pick.o");
    std::fs::write(&path, obj.write().expect("emit elf")).expect("write fixture");
    path
}

pub fn artifact_for(binary: &Path) -> PathBuf {
    let mut name = binary.as_os_str().to_owned();
    name.push(".vex.json.gz");
    PathBuf::from(name)
}
