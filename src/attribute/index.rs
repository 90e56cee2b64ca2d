// Sources:
// - https://flatcap.org/linux-ntfs/ntfs/attributes/index_root.html
// - https://flatcap.org/linux-ntfs/ntfs/attributes/index_allocation.html

use super::filename::FileNameAttr;
use crate::util::{apply_fixups, le_u16, le_u32, le_u64, split_reference};
use serde::{Deserialize, Serialize};

pub const INDEX_ENTRY_HAS_SUBNODE: u32 = 0x01;
/// `indexed_type` of directory indexes ($I30), whose keys are $FILE_NAME.
pub const INDEXED_FILE_NAME: u32 = 0x30;
pub const FILE_NAME_INDEX: &str = "$I30";
pub const INDEX_ENTRY_LAST: u32 = 0x02;

/// Node header shared by $INDEX_ROOT and INDX blocks. Offsets are relative
/// to the start of the node header.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IndexNodeHeader {
    pub entries_offset: u32,
    pub index_length: u32,
    pub allocated_size: u32,
    pub flags: u8,
}

impl IndexNodeHeader {
    pub const SIZE: usize = 16;

    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        Some(Self {
            entries_offset: le_u32(raw, 0)?,
            index_length: le_u32(raw, 4)?,
            allocated_size: le_u32(raw, 8)?,
            flags: *raw.get(12)?,
        })
    }

    pub fn has_children(&self) -> bool {
        self.flags & 0x01 != 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// MFT record this entry points to.
    pub file_reference: u64,
    pub sequence: u16,
    pub length: u16,
    pub key_length: u16,
    pub flags: u32,
    pub file_name: Option<FileNameAttr>,
    pub subnode_vcn: Option<u64>,
}

impl IndexEntry {
    pub const HEADER_SIZE: usize = 16;

    pub fn is_last(&self) -> bool {
        self.flags & INDEX_ENTRY_LAST != 0
    }
}

/// Walk the entries described by the node header found at `node_pos`.
/// Stops at the end of the used area, at the LAST entry, or at the first
/// entry whose length is impossible. Keys are only decoded when
/// `file_name_keys` is set; view indexes ($SII, $SDH, $O, $Q, $R) carry
/// other key layouts.
fn parse_entries(
    buf: &[u8],
    node_pos: usize,
    file_name_keys: bool,
    notes: &mut Vec<String>,
) -> Vec<IndexEntry> {
    let mut out = Vec::new();
    let Some(node) = buf.get(node_pos..).and_then(IndexNodeHeader::from_bytes) else {
        notes.push("index node header truncated".into());
        return out;
    };

    let mut off = node_pos + node.entries_offset as usize;
    let mut end = node_pos + node.index_length as usize;
    if end > buf.len() {
        notes.push(format!(
            "index node claims {} used bytes, only {} available",
            node.index_length,
            buf.len().saturating_sub(node_pos)
        ));
        end = buf.len();
    }

    while off + IndexEntry::HEADER_SIZE <= end {
        let slice = &buf[off..end];
        let (file_reference, sequence) = split_reference(le_u64(slice, 0).unwrap_or(0));
        let length = le_u16(slice, 8).unwrap_or(0);
        let key_length = le_u16(slice, 10).unwrap_or(0);
        let flags = le_u32(slice, 12).unwrap_or(0);

        if (length as usize) < IndexEntry::HEADER_SIZE {
            notes.push(format!("index entry at {} declares length {}", off, length));
            break;
        }

        let file_name = if file_name_keys && key_length > 0 && flags & INDEX_ENTRY_LAST == 0 {
            let key_end = (IndexEntry::HEADER_SIZE + key_length as usize).min(slice.len());
            FileNameAttr::from_bytes(&slice[IndexEntry::HEADER_SIZE..key_end], notes)
        } else {
            None
        };

        let subnode_vcn = if flags & INDEX_ENTRY_HAS_SUBNODE != 0 {
            (length as usize)
                .checked_sub(8)
                .and_then(|pos| le_u64(slice, pos))
        } else {
            None
        };

        let entry = IndexEntry {
            file_reference,
            sequence,
            length,
            key_length,
            flags,
            file_name,
            subnode_vcn,
        };
        let last = entry.is_last();
        out.push(entry);
        if last {
            break;
        }
        off += length as usize;
    }
    out
}

/// Parsed $INDEX_ROOT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRoot {
    pub indexed_type: u32,
    pub collation_rule: u32,
    pub index_block_size: u32,
    pub clusters_per_block: u8,
    pub node: IndexNodeHeader,
    pub entries: Vec<IndexEntry>,
}

impl IndexRoot {
    pub const NODE_OFFSET: usize = 0x10;

    pub fn from_bytes(raw: &[u8], notes: &mut Vec<String>) -> Option<Self> {
        let Some(node) = raw.get(Self::NODE_OFFSET..).and_then(IndexNodeHeader::from_bytes) else {
            notes.push(format!("$INDEX_ROOT holds only {} bytes", raw.len()));
            return None;
        };
        let indexed_type = le_u32(raw, 0)?;
        Some(Self {
            indexed_type,
            collation_rule: le_u32(raw, 4)?,
            index_block_size: le_u32(raw, 8)?,
            clusters_per_block: raw[12],
            node,
            entries: parse_entries(
                raw,
                Self::NODE_OFFSET,
                indexed_type == INDEXED_FILE_NAME,
                notes,
            ),
        })
    }

    pub fn indexes_file_names(&self) -> bool {
        self.indexed_type == INDEXED_FILE_NAME
    }
}

/// Entries collected from $INDEX_ALLOCATION. A non-resident allocation
/// stays `loaded == false` until its INDX blocks are read from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexAllocation {
    pub loaded: bool,
    pub blocks: usize,
    pub entries: Vec<IndexEntry>,
}

impl IndexAllocation {
    pub const INDX_NODE_OFFSET: usize = 0x18;
    pub const DEFAULT_BLOCK_SIZE: usize = 4096;

    /// Decode allocation content. Content starting with `INDX` is a sequence
    /// of index blocks of `block_size` bytes; anything else is treated as a
    /// single bare node header followed by its entries. `file_name_keys`
    /// tells whether the index is a directory index.
    pub fn from_bytes(
        raw: &[u8],
        block_size: Option<u32>,
        file_name_keys: bool,
        notes: &mut Vec<String>,
    ) -> Self {
        let mut out = IndexAllocation {
            loaded: true,
            ..Default::default()
        };

        if !raw.starts_with(b"INDX") {
            out.blocks = 1;
            out.entries = parse_entries(raw, 0, file_name_keys, notes);
            return out;
        }

        let block_size = block_size
            .map(|b| b as usize)
            .filter(|b| *b >= 512 && b.is_power_of_two())
            .or_else(|| {
                // allocated size of the first node + INDX header
                le_u32(raw, Self::INDX_NODE_OFFSET + 8)
                    .map(|a| a as usize + Self::INDX_NODE_OFFSET)
                    .filter(|b| *b >= 512 && b.is_power_of_two())
            })
            .unwrap_or(Self::DEFAULT_BLOCK_SIZE);

        for (i, block) in raw.chunks(block_size).enumerate() {
            if !block.starts_with(b"INDX") {
                // unused blocks are left as they were
                continue;
            }
            let mut buf = block.to_vec();
            let usa_offset = le_u16(&buf, 4).unwrap_or(0) as usize;
            let usa_count = le_u16(&buf, 6).unwrap_or(0) as usize;
            if let Err(e) = apply_fixups(&mut buf, usa_offset, usa_count) {
                notes.push(format!("INDX block {}: {}", i, e));
                continue;
            }
            out.blocks += 1;
            out.entries
                .extend(parse_entries(&buf, Self::INDX_NODE_OFFSET, file_name_keys, notes));
        }
        out
    }
}

#[cfg(test)]
pub(crate) fn build_index_entry(target: u64, key: Option<&[u8]>, last: bool) -> Vec<u8> {
    let key_len = key.map_or(0, |k| k.len());
    let len = (IndexEntry::HEADER_SIZE + key_len).next_multiple_of(8);
    let mut e = vec![0u8; len];
    e[0..8].copy_from_slice(&(target | (1u64 << 48)).to_le_bytes());
    e[8..10].copy_from_slice(&(len as u16).to_le_bytes());
    e[10..12].copy_from_slice(&(key_len as u16).to_le_bytes());
    if last {
        e[12] = INDEX_ENTRY_LAST as u8;
    }
    if let Some(k) = key {
        e[16..16 + k.len()].copy_from_slice(k);
    }
    e
}

/// Node header followed by entries; the terminating LAST entry is appended.
#[cfg(test)]
pub(crate) fn build_node(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut body: Vec<u8> = entries.concat();
    body.extend(build_index_entry(0, None, true));
    let used = (IndexNodeHeader::SIZE + body.len()) as u32;
    let mut node = vec![0u8; IndexNodeHeader::SIZE];
    node[0..4].copy_from_slice(&(IndexNodeHeader::SIZE as u32).to_le_bytes());
    node[4..8].copy_from_slice(&used.to_le_bytes());
    node[8..12].copy_from_slice(&used.to_le_bytes());
    node.extend(body);
    node
}

#[cfg(test)]
pub(crate) fn build_index_root(entries: &[Vec<u8>]) -> Vec<u8> {
    build_view_root(INDEXED_FILE_NAME, entries)
}

#[cfg(test)]
pub(crate) fn build_view_root(indexed_type: u32, entries: &[Vec<u8>]) -> Vec<u8> {
    let mut raw = vec![0u8; IndexRoot::NODE_OFFSET];
    raw[0..4].copy_from_slice(&indexed_type.to_le_bytes());
    raw[4..8].copy_from_slice(&1u32.to_le_bytes());
    raw[8..12].copy_from_slice(&4096u32.to_le_bytes());
    raw[12] = 1;
    raw.extend(build_node(entries));
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::filename::build_file_name;

    #[test]
    fn index_root_entries_with_embedded_names() {
        let a = build_file_name(5, "a.txt", 1, 1234);
        let b = build_file_name(5, "b.bin", 1, 99);
        let raw = build_index_root(&[
            build_index_entry(40, Some(&a), false),
            build_index_entry(41, Some(&b), false),
        ]);
        let mut notes = Vec::new();
        let root = IndexRoot::from_bytes(&raw, &mut notes).unwrap();
        assert_eq!(root.index_block_size, 4096);
        assert_eq!(root.entries.len(), 3);
        assert_eq!(root.entries[0].file_reference, 40);
        assert_eq!(root.entries[1].file_name.as_ref().unwrap().real_size, 99);
        assert!(root.entries[2].is_last());
        assert!(root.entries[2].file_name.is_none());
        assert!(notes.is_empty());
    }

    #[test]
    fn used_length_past_buffer_is_clamped() {
        let a = build_file_name(5, "a", 1, 1);
        let mut raw = build_index_root(&[build_index_entry(40, Some(&a), false)]);
        let used_pos = IndexRoot::NODE_OFFSET + 4;
        raw[used_pos..used_pos + 4].copy_from_slice(&0xFFFF_u32.to_le_bytes());
        let mut notes = Vec::new();
        let root = IndexRoot::from_bytes(&raw, &mut notes).unwrap();
        assert_eq!(root.entries.len(), 2);
        assert_eq!(notes.len(), 1);
    }

    #[test]
    fn view_index_keys_are_not_file_names() {
        // $Secure:$SII, keyed by a 4-byte security id
        let raw = build_view_root(0, &[build_index_entry(9, Some(&0x100u32.to_le_bytes()[..]), false)]);
        let mut notes = Vec::new();
        let root = IndexRoot::from_bytes(&raw, &mut notes).unwrap();
        assert!(!root.indexes_file_names());
        assert_eq!(root.entries.len(), 2);
        assert_eq!(root.entries[0].key_length, 4);
        assert!(root.entries[0].file_name.is_none());
        assert!(notes.is_empty());

        let node = build_node(&[build_index_entry(9, Some(&[0u8; 12][..]), false)]);
        let alloc = IndexAllocation::from_bytes(&node, None, false, &mut notes);
        assert_eq!(alloc.entries.len(), 2);
        assert!(notes.is_empty());
    }

    #[test]
    fn indx_blocks() {
        let a = build_file_name(5, "deep.log", 1, 777);
        let node = build_node(&[build_index_entry(70, Some(&a), false)]);
        let mut block = vec![0u8; 4096];
        block[0..4].copy_from_slice(b"INDX");
        // usa at 0x28, 1 + 8 sectors
        block[4..6].copy_from_slice(&0x28u16.to_le_bytes());
        block[6..8].copy_from_slice(&9u16.to_le_bytes());
        block[0x28] = 0x01;
        for s in 1..=8 {
            block[s * 512 - 2] = 0x01;
        }
        let node_pos = IndexAllocation::INDX_NODE_OFFSET;
        // entries start after the usa (0x28 + 18 bytes), keep them 8-aligned
        let entries_at = 0x40usize;
        let mut hdr = node[..IndexNodeHeader::SIZE].to_vec();
        let rel = (entries_at - node_pos) as u32;
        let used = rel + (node.len() - IndexNodeHeader::SIZE) as u32;
        hdr[0..4].copy_from_slice(&rel.to_le_bytes());
        hdr[4..8].copy_from_slice(&used.to_le_bytes());
        hdr[8..12].copy_from_slice(&(4096 - node_pos as u32).to_le_bytes());
        block[node_pos..node_pos + IndexNodeHeader::SIZE].copy_from_slice(&hdr);
        let body = &node[IndexNodeHeader::SIZE..];
        block[entries_at..entries_at + body.len()].copy_from_slice(body);

        let mut raw = block.clone();
        raw.extend(vec![0u8; 4096]); // unused second block
        let mut notes = Vec::new();
        let alloc = IndexAllocation::from_bytes(&raw, Some(4096), true, &mut notes);
        assert!(alloc.loaded);
        assert_eq!(alloc.blocks, 1);
        assert_eq!(alloc.entries[0].file_reference, 70);
        assert_eq!(alloc.entries[0].file_name.as_ref().unwrap().real_size, 777);
        assert!(notes.is_empty());
    }
}
