use super::AttributeType;
use crate::util::{le_u16, le_u32, le_u64, split_reference, utf16_lossy};
use serde::{Deserialize, Serialize};

/// One entry of an $ATTRIBUTE_LIST: tells which MFT record holds (part of)
/// an attribute of the base file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeListEntry {
    pub attr_type: AttributeType,
    pub length: u16,
    pub name_length: u8,
    pub name_offset: u8,
    pub starting_vcn: u64,
    pub record: u64,
    pub sequence: u16,
    pub attribute_id: u16,
    pub name: Option<String>,
}

impl AttributeListEntry {
    pub const HEADER_SIZE: usize = 24;

    /// Decode every entry of a (resident or fetched) attribute list.
    pub fn parse_all(raw: &[u8], notes: &mut Vec<String>) -> Vec<Self> {
        let mut out = Vec::new();
        let mut off = 0usize;
        while off < raw.len() {
            let slice = &raw[off..];
            if slice.len() < Self::HEADER_SIZE {
                notes.push(format!(
                    "attribute list entry at {} truncated to {} bytes",
                    off,
                    slice.len()
                ));
                break;
            }
            let Some(code) = le_u32(slice, 0) else { break };
            let length = le_u16(slice, 4).unwrap_or(0);
            if code == 0 && length == 0 {
                // zero padding after the last entry
                break;
            }
            if (length as usize) < Self::HEADER_SIZE {
                notes.push(format!(
                    "attribute list entry at {} declares length {}",
                    off, length
                ));
                break;
            }
            let name_length = slice[6];
            let name_offset = slice[7];
            let starting_vcn = le_u64(slice, 8).unwrap_or(0);
            let (record, sequence) = split_reference(le_u64(slice, 16).unwrap_or(0));
            let attribute_id = le_u16(slice, 24).unwrap_or(0);

            let name = if name_length > 0 {
                let start = name_offset as usize;
                let end = start + name_length as usize * 2;
                match slice.get(start..end) {
                    Some(bytes) => Some(utf16_lossy(bytes)),
                    None => {
                        notes.push(format!("attribute list entry at {} has a truncated name", off));
                        None
                    }
                }
            } else {
                None
            };

            out.push(Self {
                attr_type: AttributeType::from_code(code),
                length,
                name_length,
                name_offset,
                starting_vcn,
                record,
                sequence,
                attribute_id,
                name,
            });
            off += length as usize;
        }
        out
    }
}

#[cfg(test)]
pub(crate) fn build_entry(code: u32, record: u64, vcn: u64, name: Option<&str>) -> Vec<u8> {
    let units: Vec<u16> = name.map(|n| n.encode_utf16().collect()).unwrap_or_default();
    let len = (0x1A + units.len() * 2).next_multiple_of(8);
    let mut e = vec![0u8; len];
    e[0..4].copy_from_slice(&code.to_le_bytes());
    e[4..6].copy_from_slice(&(len as u16).to_le_bytes());
    e[6] = units.len() as u8;
    e[7] = 0x1A;
    e[8..16].copy_from_slice(&vcn.to_le_bytes());
    e[16..24].copy_from_slice(&(record | (1u64 << 48)).to_le_bytes());
    for (i, u) in units.iter().enumerate() {
        e[0x1A + 2 * i..0x1C + 2 * i].copy_from_slice(&u.to_le_bytes());
    }
    e
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entries_until_exhausted() {
        let mut raw = build_entry(0x10, 30, 0, None);
        raw.extend(build_entry(0x80, 31, 0, None));
        raw.extend(build_entry(0x80, 32, 0x100, Some("ads")));
        let mut notes = Vec::new();
        let entries = AttributeListEntry::parse_all(&raw, &mut notes);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].attr_type, AttributeType::Data);
        assert_eq!(entries[1].record, 31);
        assert_eq!(entries[1].sequence, 1);
        assert_eq!(entries[2].starting_vcn, 0x100);
        assert_eq!(entries[2].name.as_deref(), Some("ads"));
        assert!(notes.is_empty());
    }

    #[test]
    fn bad_length_stops_without_panic() {
        let mut raw = build_entry(0x80, 31, 0, None);
        raw.extend_from_slice(&[0x80, 0, 0, 0, 0x04, 0]);
        raw.resize(raw.len() + 24, 0xEE);
        let mut notes = Vec::new();
        let entries = AttributeListEntry::parse_all(&raw, &mut notes);
        assert_eq!(entries.len(), 1);
        assert_eq!(notes.len(), 1);
    }
}
