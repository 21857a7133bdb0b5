use std::{collections::HashMap, io::BufRead, path::Path};

use bpf_common::parsing::{
    KallsymsError, KernelSymbol,
    kallsyms::{parse_kallsyms, read_kallsyms},
};

/// A symbol enclosing an address, with the distance from its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolRef<'a> {
    pub symbol: &'a KernelSymbol,
    pub offset: u64,
}

/// Kernel symbol table, immutable once built.
///
/// Symbols are kept sorted by address. When several symbols share an
/// address, core kernel ones come first.
#[derive(Debug, Default)]
pub struct KernelSymbols {
    symbols: Vec<KernelSymbol>,
    by_name: HashMap<String, usize>,
}

impl KernelSymbols {
    pub fn from_symbols(mut symbols: Vec<KernelSymbol>) -> Self {
        symbols.sort_by_key(|s| (s.address, s.module.is_some()));
        let mut by_name: HashMap<String, usize> = HashMap::with_capacity(symbols.len());
        for (i, symbol) in symbols.iter().enumerate() {
            match by_name.get(&symbol.name) {
                Some(&j) if symbols[j].module.is_none() || symbol.module.is_some() => {}
                _ => {
                    by_name.insert(symbol.name.clone(), i);
                }
            }
        }
        Self { symbols, by_name }
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, KallsymsError> {
        parse_kallsyms(reader).map(Self::from_symbols)
    }

    /// Blocking: read the whole kallsyms file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KallsymsError> {
        read_kallsyms(path).map(Self::from_symbols)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Address of a symbol by name.
    pub fn lookup_name(&self, name: &str) -> Option<u64> {
        self.by_name.get(name).map(|&i| self.symbols[i].address)
    }

    /// Symbol starting exactly at `address`.
    pub fn resolve(&self, address: u64) -> Option<&KernelSymbol> {
        let i = self.symbols.partition_point(|s| s.address < address);
        self.symbols.get(i).filter(|s| s.address == address)
    }

    /// Closest symbol starting at or below `address`.
    pub fn nearest(&self, address: u64) -> Option<SymbolRef<'_>> {
        let end = self.symbols.partition_point(|s| s.address <= address);
        let start = self.symbols.get(end.checked_sub(1)?)?.address;
        let i = self.symbols.partition_point(|s| s.address < start);
        Some(SymbolRef {
            symbol: &self.symbols[i],
            offset: address - start,
        })
    }

    /// Whether `address` lies in the text of the kernel image.
    ///
    /// With `_stext` and `_etext` available the check is a range test,
    /// otherwise the enclosing symbol must not belong to a module.
    pub fn is_core_kernel_text(&self, address: u64) -> bool {
        if let (Some(start), Some(end)) = (self.lookup_name("_stext"), self.lookup_name("_etext")) {
            return (start..end).contains(&address);
        }
        self.nearest(address)
            .is_some_and(|found| found.symbol.module.is_none())
    }
}
