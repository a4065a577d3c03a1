//! Symbol Table - Discovery format consumed by the host loader
//!
//! One record per line, tab separated:
//!
//! ```text
//! <name>\t<permission>\t0x<8 hex digit base address>\t0x<hex length>\n
//! ```
//!
//! The permission is written in decimal; the decoder also accepts `0x` hex.

use core::fmt;
use core::str::FromStr;

use crate::resource::validate_name;
use crate::{CsrError, Permission, Result};

/// One published symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolTableEntry {
    pub name: String,
    pub permission: Permission,
    pub base_address: u32,
    pub length_bytes: u32,
}

impl SymbolTableEntry {
    pub fn new(name: impl Into<String>, permission: Permission, base_address: u32, length_bytes: u32) -> Self {
        Self {
            name: name.into(),
            permission,
            base_address,
            length_bytes,
        }
    }

    pub fn contains(&self, address: u32) -> bool {
        let offset = address.wrapping_sub(self.base_address);
        address >= self.base_address && offset < self.length_bytes
    }
}

impl fmt::Display for SymbolTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t0x{:08x}\t0x{:x}",
            self.name,
            self.permission.bits(),
            self.base_address,
            self.length_bytes
        )
    }
}

/// Serialize entries in the given order
pub fn encode(entries: &[SymbolTableEntry]) -> Vec<u8> {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&entry.to_string());
        out.push('\n');
    }
    out.into_bytes()
}

/// Parse a symbol table back into its ordered entries
///
/// # Errors
/// Returns `MalformedSymtab` with the 1-based line of the first bad record
pub fn decode(bytes: &[u8]) -> Result<Vec<SymbolTableEntry>> {
    let text = core::str::from_utf8(bytes).map_err(|e| CsrError::MalformedSymtab {
        line: bytes[..e.valid_up_to()].iter().filter(|b| **b == b'\n').count() + 1,
        reason: "invalid UTF-8".into(),
    })?;

    let mut lines: Vec<&str> = text.split('\n').collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }

    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let line = line.strip_suffix('\r').unwrap_or(line);
            parse_line(line).map_err(|reason| CsrError::MalformedSymtab { line: i + 1, reason })
        })
        .collect()
}

fn parse_line(line: &str) -> core::result::Result<SymbolTableEntry, String> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 4 {
        return Err(format!("expected 4 tab-separated fields, found {}", fields.len()));
    }

    let name = fields[0];
    validate_name(name).map_err(|_| format!("invalid symbol name {name:?}"))?;

    let invalid_permission = || format!("invalid permission {:?}", fields[1]);
    let raw_permission = match fields[1].strip_prefix("0x") {
        Some(hex) if is_hex(hex) => u8::from_str_radix(hex, 16).map_err(|_| invalid_permission())?,
        Some(_) => return Err(invalid_permission()),
        None if is_decimal(fields[1]) => fields[1].parse::<u8>().map_err(|_| invalid_permission())?,
        None => return Err(invalid_permission()),
    };
    let permission = Permission::from_bits(raw_permission)
        .ok_or_else(|| format!("permission {raw_permission} out of range"))?;

    let base = fields[2]
        .strip_prefix("0x")
        .filter(|hex| hex.len() == 8 && is_hex(hex))
        .ok_or_else(|| format!("base address {:?} is not 0x + 8 hex digits", fields[2]))?;
    let base_address =
        u32::from_str_radix(base, 16).map_err(|_| format!("invalid base address {:?}", fields[2]))?;

    let length = fields[3]
        .strip_prefix("0x")
        .filter(|hex| hex.len() <= 8 && is_hex(hex))
        .ok_or_else(|| format!("length {:?} is not 0x-prefixed hex", fields[3]))?;
    let length_bytes =
        u32::from_str_radix(length, 16).map_err(|_| format!("invalid length {:?}", fields[3]))?;

    Ok(SymbolTableEntry {
        name: name.into(),
        permission,
        base_address,
        length_bytes,
    })
}

/// `from_str_radix` takes a leading sign, the file format does not
fn is_hex(digits: &str) -> bool {
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_hexdigit())
}

fn is_decimal(digits: &str) -> bool {
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Ordered symbol table, as the host loader sees it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    entries: Vec<SymbolTableEntry>,
}

impl SymbolTable {
    pub fn new(entries: Vec<SymbolTableEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[SymbolTableEntry] {
        &self.entries
    }

    pub fn iter(&self) -> core::slice::Iter<'_, SymbolTableEntry> {
        self.entries.iter()
    }

    pub fn lookup(&self, name: &str) -> Option<&SymbolTableEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Find the symbol covering `address` and the byte offset into it
    pub fn resolve(&self, address: u32) -> Option<(&SymbolTableEntry, u32)> {
        self.entries
            .iter()
            .find(|e| e.contains(address))
            .map(|e| (e, address - e.base_address))
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(&self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}

impl FromStr for SymbolTable {
    type Err = CsrError;

    fn from_str(s: &str) -> Result<Self> {
        decode(s.as_bytes()).map(SymbolTable::new)
    }
}

impl From<Vec<SymbolTableEntry>> for SymbolTable {
    fn from(entries: Vec<SymbolTableEntry>) -> Self {
        SymbolTable::new(entries)
    }
}

impl<'a> IntoIterator for &'a SymbolTable {
    type Item = &'a SymbolTableEntry;
    type IntoIter = core::slice::Iter<'a, SymbolTableEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rw() -> Permission {
        Permission::READ | Permission::WRITE
    }

    #[test]
    fn test_encode_format() {
        let entries = [
            SymbolTableEntry::new("ctrl", rw(), 0x0800_0000, 4),
            SymbolTableEntry::new("samples", Permission::READ, 0x1000_2000, 0x2000),
        ];
        let text = String::from_utf8(encode(&entries)).unwrap();
        assert_eq!(text, "ctrl\t3\t0x08000000\t0x4\nsamples\t1\t0x10002000\t0x2000\n");
    }

    #[test]
    fn test_round_trip() {
        let entries = vec![
            SymbolTableEntry::new("leds_magic", Permission::READ, 0x0800_0000, 8),
            SymbolTableEntry::new("leds_out", Permission::WRITE, 0x0800_0010, 2),
            SymbolTableEntry::new("none", Permission::empty(), 0xffff_fffe, 0xffff_ffff),
        ];
        assert_eq!(decode(&encode(&entries)).unwrap(), entries);
    }

    #[test]
    fn test_decode_accepts_hex_permission_and_crlf() {
        let entries = decode(b"a\t0x03\t0x08000000\t0x4\r\nb\t0x1\t0x08000400\t0x02\r\n\n").unwrap();
        assert_eq!(entries[0].permission, rw());
        assert_eq!(entries[1].length_bytes, 2);
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_decode_reports_line_numbers() {
        let cases: [(&[u8], usize); 6] = [
            (b"ok\t3\t0x08000000\t0x4\nbad\t3\t0x0800\t0x4\n", 2),
            (b"a\t4\t0x08000000\t0x4\n", 1),
            (b"a\t3\t0x08000000\n", 1),
            (b"a\t3\t0x08000000\t4\n", 1),
            (b"\n\na\t3\t0x08000000\t0x4\n", 1),
            (b"a\t3\t0x08000000\t0x4\nb\t3\t0x0800\xff000\t0x4\n", 2),
        ];
        for (input, expected) in cases {
            match decode(input) {
                Err(CsrError::MalformedSymtab { line, .. }) => assert_eq!(line, expected),
                other => panic!("{:?} decoded to {other:?}", String::from_utf8_lossy(input)),
            }
        }
    }

    #[test]
    fn test_decode_rejects_signed_numbers() {
        let inputs: [&[u8]; 4] = [
            b"a\t3\t0x+1234567\t0x4\n",
            b"a\t3\t0x08000000\t0x+4\n",
            b"a\t0x+3\t0x08000000\t0x4\n",
            b"a\t+3\t0x08000000\t0x4\n",
        ];
        for input in inputs {
            assert!(
                matches!(decode(input), Err(CsrError::MalformedSymtab { line: 1, .. })),
                "{:?} should be rejected",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn test_empty_input_decodes_to_nothing() {
        assert!(decode(b"").unwrap().is_empty());
        assert!(decode(b"\n").unwrap().is_empty());
    }

    #[test]
    fn test_lookup_and_resolve() {
        let table: SymbolTable = "ctrl\t3\t0x08000000\t0x4\nstatus\t3\t0x08000400\t0x2\n"
            .parse()
            .unwrap();

        assert_eq!(table.lookup("status").unwrap().base_address, 0x0800_0400);
        assert!(table.lookup("missing").is_none());

        let (entry, offset) = table.resolve(0x0800_0002).unwrap();
        assert_eq!((entry.name.as_str(), offset), ("ctrl", 2));
        assert!(table.resolve(0x0800_0004).is_none());
        assert!(table.resolve(0x07ff_ffff).is_none());
    }

    #[test]
    fn test_display_matches_encode() {
        let table = SymbolTable::new(vec![SymbolTableEntry::new("x", rw(), 0x10, 0x20)]);
        assert_eq!(table.to_string().into_bytes(), table.encode());
    }
}
