use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;

use log::{debug, info};
use nom::{
    IResult,
    character::complete::{hex_digit1, not_line_ending, satisfy, space0, space1},
    combinator::{map_res, opt},
    sequence::terminated,
};

use crate::error::{Error, Result};
use crate::state::Value;

// nm type letters of objects that can be the target of a load or store
const DATA_TYPES: &str = "bBdDrRgGsSvV";

pub const NONE_LABEL: &str = "None";
pub const OTHER_LABEL: &str = "Other";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRange {
    pub start: u64,
    pub end: u64, // exclusive
    pub name: String,
}

/// Address ranges in listing order. Lookup is a linear scan, so when ranges
/// overlap the first listed one wins.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    ranges: Vec<SymbolRange>,
}

fn hex(input: &str) -> IResult<&str, u64> {
    map_res(hex_digit1, |s| u64::from_str_radix(s, 16))(input)
}

fn symbol_line(input: &str) -> IResult<&str, (u64, u64, Option<char>, &str)> {
    let (input, _) = space0(input)?;
    let (input, start) = hex(input)?;
    let (input, _) = space1(input)?;
    let (input, size) = hex(input)?;
    let (input, _) = space1(input)?;
    let (input, kind) = opt(terminated(satisfy(|c| c.is_ascii_alphabetic()), space1))(input)?;
    let (input, name) = not_line_ending(input)?;
    Ok((input, (start, size, kind, name.trim())))
}

impl SymbolTable {
    /// Parses `start size [type] name` lines. Lines that do not have that
    /// shape, and typed symbols that are not data, are skipped.
    pub fn parse(listing: &str) -> SymbolTable {
        let mut table = SymbolTable::default();
        // reserved labels are taken before any symbol is seen
        let mut names: BTreeSet<String> = [NONE_LABEL, OTHER_LABEL].map(String::from).into();
        for line in listing.lines() {
            let (start, size, kind, name) = match symbol_line(line) {
                Ok((_, fields)) if !fields.3.is_empty() => fields,
                _ => {
                    debug!("skipping symbol line {:?}", line);
                    continue;
                }
            };
            if let Some(kind) = kind {
                if !DATA_TYPES.contains(kind) {
                    continue;
                }
            }
            let name = if names.insert(name.to_owned()) {
                name.to_owned()
            } else {
                format!("{}@0x{:x}", name, start)
            };
            table.ranges.push(SymbolRange {
                start,
                end: start.wrapping_add(size),
                name,
            });
        }
        table
    }

    /// Runs the symbol dump tool on `exe` and parses its output.
    pub fn from_binary(tool: &str, exe: &Path) -> Result<SymbolTable> {
        println!("Reading symbols from {:?}...", exe);
        let output = Command::new(tool)
            .args(["-S", "--size-sort"])
            .arg(exe)
            .output()
            .map_err(|err| Error::SymbolTool(format!("unable to run {}: {}", tool, err)))?;
        if !output.status.success() {
            return Err(Error::SymbolTool(format!(
                "{} exited with {}: {}",
                tool,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let table = SymbolTable::parse(&String::from_utf8_lossy(&output.stdout));
        if table.is_empty() {
            return Err(Error::SymbolTool(format!(
                "no data symbols found in {:?}",
                exe
            )));
        }
        info!("loaded {} symbols from {:?}", table.len(), exe);
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[SymbolRange] {
        &self.ranges
    }

    pub fn other(&self) -> Value {
        self.ranges.len() as Value + 1
    }

    /// Label of the first range containing `address`, else the reserved
    /// "Other" label.
    pub fn resolve(&self, address: u64) -> Value {
        self.ranges
            .iter()
            .position(|r| r.start <= address && address < r.end)
            .map_or(self.other(), |pos| pos as Value + 1)
    }

    /// Label texts indexed by the values `resolve` returns.
    pub fn labels(&self) -> Vec<String> {
        let mut labels = Vec::with_capacity(self.ranges.len() + 2);
        labels.push(NONE_LABEL.to_owned());
        labels.extend(self.ranges.iter().map(|r| r.name.clone()));
        labels.push(OTHER_LABEL.to_owned());
        labels
    }
}
