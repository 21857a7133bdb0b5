//! Utility functions used to extract kernel symbols from kallsyms.
//!
//! Every line has the form `<hex address> <type> <name> [<module>]`.

use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
};

use thiserror::Error;

pub const KALLSYMS_PATH: &str = "/proc/kallsyms";

#[derive(Error, Debug)]
pub enum KallsymsError {
    #[error("reading {path}")]
    ReadFile {
        #[source]
        source: io::Error,
        path: String,
    },
    #[error("malformed kallsyms line {line}: {content:?}")]
    Malformed { line: usize, content: String },
    #[error("all symbol addresses are zero, kptr_restrict is probably enabled")]
    AddressesHidden,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSymbol {
    pub address: u64,
    pub kind: char,
    pub name: String,
    /// Owning module, `None` for the core kernel image.
    pub module: Option<String>,
}

/// Read and parse a kallsyms file.
pub fn read_kallsyms(path: impl AsRef<Path>) -> Result<Vec<KernelSymbol>, KallsymsError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| KallsymsError::ReadFile {
        source,
        path: path.display().to_string(),
    })?;
    parse_kallsyms(BufReader::new(file))
}

/// Parse kallsyms formatted text.
///
/// Unprivileged readers see every address as zero: in that case the table
/// is useless and an error is returned instead of an empty list.
pub fn parse_kallsyms<R: BufRead>(reader: R) -> Result<Vec<KernelSymbol>, KallsymsError> {
    let mut symbols = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| KallsymsError::ReadFile {
            source,
            path: "kallsyms".to_string(),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        symbols.push(parse_line(&line).ok_or_else(|| KallsymsError::Malformed {
            line: i + 1,
            content: line.clone(),
        })?);
    }
    if !symbols.is_empty() && symbols.iter().all(|s| s.address == 0) {
        return Err(KallsymsError::AddressesHidden);
    }
    Ok(symbols)
}

fn parse_line(line: &str) -> Option<KernelSymbol> {
    let mut fields = line.split_whitespace();
    let address = u64::from_str_radix(fields.next()?, 16).ok()?;
    let kind = fields.next()?.chars().next()?;
    let name = fields.next()?.to_string();
    let module = fields
        .next()
        .map(|m| m.trim_start_matches('[').trim_end_matches(']').to_string());
    Some(KernelSymbol {
        address,
        kind,
        name,
        module,
    })
}
