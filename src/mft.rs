// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

use crate::attribute::{
    ATTRIBUTE_END, Attribute, AttributeBody, AttributeHeader, AttributeType, FileNameAttr,
    StandardInformation, filename, standard::si_flags_to_string,
};
use crate::error::Warning;
use crate::util::{apply_fixups, format_time, le_u16, le_u32, le_u64, split_reference};
use chrono::{DateTime, Utc};
use log::debug;
use prettytable::{Table, row};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

/// Every record of the table is exactly this long.
pub const MFT_RECORD_SIZE: usize = 1024;

pub const FLAG_IN_USE: u16 = 0x0001;
pub const FLAG_DIRECTORY: u16 = 0x0002;

/// Header found at the very beginning of every **FILE** record (offset 0).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FileRecordHeader {
    pub signature: [u8; 4],
    pub usa_offset: u16,
    pub usa_count: u16,
    pub lsn: u64,
    pub sequence_number: u16,
    pub hard_link_count: u16,
    pub attrs_offset: u16,
    pub flags: u16,
    pub bytes_in_use: u32,
    pub bytes_allocated: u32,
    pub base_record: u64,
    pub base_sequence: u16,
    pub next_attr_id: u16,
    pub entry_number: u32,
}

impl FileRecordHeader {
    pub const SIZE: usize = 0x30;

    /// Read the fixed fields. Missing bytes read as zero.
    fn from_bytes(buf: &[u8]) -> Self {
        let mut signature = [0u8; 4];
        if let Some(sig) = buf.get(0..4) {
            signature.copy_from_slice(sig);
        }
        let (base_record, base_sequence) = split_reference(le_u64(buf, 0x20).unwrap_or(0));
        Self {
            signature,
            usa_offset: le_u16(buf, 0x04).unwrap_or(0),
            usa_count: le_u16(buf, 0x06).unwrap_or(0),
            lsn: le_u64(buf, 0x08).unwrap_or(0),
            sequence_number: le_u16(buf, 0x10).unwrap_or(0),
            hard_link_count: le_u16(buf, 0x12).unwrap_or(0),
            attrs_offset: le_u16(buf, 0x14).unwrap_or(0),
            flags: le_u16(buf, 0x16).unwrap_or(0),
            bytes_in_use: le_u32(buf, 0x18).unwrap_or(0),
            bytes_allocated: le_u32(buf, 0x1C).unwrap_or(0),
            base_record,
            base_sequence,
            next_attr_id: le_u16(buf, 0x28).unwrap_or(0),
            entry_number: le_u32(buf, 0x2C).unwrap_or(0),
        }
    }
}

/// Allocation state and kind, from the header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    AllocatedFile,
    AllocatedDirectory,
    UnallocatedFile,
    UnallocatedDirectory,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordStatus::AllocatedFile => "file",
            RecordStatus::AllocatedDirectory => "directory",
            RecordStatus::UnallocatedFile => "deleted file",
            RecordStatus::UnallocatedDirectory => "deleted directory",
        };
        f.write_str(s)
    }
}

/// Represents an Alternate Data Stream (named $DATA attribute).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataStream {
    pub name: String,
    pub size: u64,
    pub resident: bool,
}

/// Both timestamp sets of a record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timestamps {
    pub si_created: Option<DateTime<Utc>>,
    pub si_modified: Option<DateTime<Utc>>,
    pub si_mft_modified: Option<DateTime<Utc>>,
    pub si_accessed: Option<DateTime<Utc>>,
    pub fn_created: Option<DateTime<Utc>>,
    pub fn_modified: Option<DateTime<Utc>>,
    pub fn_mft_modified: Option<DateTime<Utc>>,
    pub fn_accessed: Option<DateTime<Utc>>,
}

/// A parsed 1 KiB MFT record. `parent`, `linked_record` and
/// `derived_size` are filled by the table passes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MFTRecord {
    pub id: u64,
    pub header: FileRecordHeader,
    pub attributes: Vec<Attribute>,
    pub parent: Option<u64>,
    pub linked_record: Option<u64>,
    pub derived_size: Option<u64>,
    pub warnings: Vec<Warning>,
}

impl MFTRecord {
    /// Parse a raw record. Never fails: a record without the `FILE`
    /// signature comes back with no attributes and `is_valid() == false`,
    /// corrupted attributes are cut short and noted in `warnings`.
    pub fn from_bytes(raw: &[u8], id: u64) -> Self {
        let len = raw.len().min(MFT_RECORD_SIZE);
        let mut buf = raw[..len].to_vec();
        let header = FileRecordHeader::from_bytes(&buf);

        let mut record = MFTRecord {
            id,
            header,
            attributes: Vec::new(),
            parent: None,
            linked_record: None,
            derived_size: None,
            warnings: Vec::new(),
        };

        if !record.is_valid() {
            if buf.iter().any(|b| *b != 0) {
                debug!(
                    "Record {} signature is '{}', skipping.",
                    id,
                    String::from_utf8_lossy(&record.header.signature)
                );
            }
            return record;
        }

        if let Err(e) = apply_fixups(
            &mut buf,
            record.header.usa_offset as usize,
            record.header.usa_count as usize,
        ) {
            record.warnings.push(Warning::corruption(id, e));
        }

        let mut notes = Vec::new();
        let mut offset = record.header.attrs_offset as usize;
        while offset < len {
            let Some(code) = le_u32(&buf, offset) else {
                notes.push(format!("attribute stream ends inside the type field at {}", offset));
                break;
            };
            if code == ATTRIBUTE_END {
                break;
            }
            let declared = le_u32(&buf, offset + 4).unwrap_or(0) as usize;
            if declared < AttributeHeader::SIZE {
                notes.push(format!(
                    "attribute at {} declares length {}, stopping",
                    offset, declared
                ));
                break;
            }
            let end = match offset.checked_add(declared) {
                Some(end) if end <= len => end,
                _ => {
                    notes.push(format!(
                        "attribute at {} declares length {}, truncated to {}",
                        offset,
                        declared,
                        len - offset
                    ));
                    len
                }
            };

            match Attribute::parse(&buf[offset..end], &mut notes) {
                Some(attr) if attr.attr_type() == AttributeType::End => break,
                Some(attr) => record.attributes.push(attr),
                None => break,
            }
            // header-declared length, not what the decoder consumed
            offset = end;
        }

        record
            .warnings
            .extend(notes.into_iter().map(|n| Warning::corruption(id, n)));
        record
    }

    /// Signature is `FILE`; anything else ("BAAD", zeroed slack) carries no
    /// usable metadata.
    pub fn is_valid(&self) -> bool {
        &self.header.signature == b"FILE"
    }

    pub fn is_dir(&self) -> bool {
        self.header.flags & FLAG_DIRECTORY != 0
    }

    pub fn is_allocated(&self) -> bool {
        self.header.flags & FLAG_IN_USE != 0
    }

    pub fn status(&self) -> RecordStatus {
        match (self.is_allocated(), self.is_dir()) {
            (true, false) => RecordStatus::AllocatedFile,
            (true, true) => RecordStatus::AllocatedDirectory,
            (false, false) => RecordStatus::UnallocatedFile,
            (false, true) => RecordStatus::UnallocatedDirectory,
        }
    }

    /// An extension record belongs to another (base) record.
    pub fn is_extension(&self) -> bool {
        self.header.base_record != 0
    }

    pub fn find_attribute(&self, kind: AttributeType) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.attr_type() == kind)
    }

    pub fn has_attribute(&self, kind: AttributeType) -> bool {
        self.find_attribute(kind).is_some()
    }

    pub fn attributes_of(&self, kind: AttributeType) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(move |a| a.attr_type() == kind)
    }

    /// The $DATA attribute with the given stream name (`None` = unnamed).
    pub fn data_attribute(&self, stream: Option<&str>) -> Option<&Attribute> {
        self.attributes_of(AttributeType::Data)
            .find(|a| a.name() == stream)
    }

    /// List every $FILE_NAME attribute found (there may be 2 – long & DOS).
    pub fn file_names(&self) -> Vec<&FileNameAttr> {
        self.attributes
            .iter()
            .filter_map(|a| match &a.body {
                AttributeBody::FileName(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    /// The name a user would see: POSIX > Win32 > Win32 & DOS > DOS.
    pub fn preferred_file_name(&self) -> Option<&FileNameAttr> {
        filename::preferred(self.file_names())
    }

    pub fn primary_name(&self) -> Option<&str> {
        self.preferred_file_name().map(|f| f.name.as_str())
    }

    pub fn standard_information(&self) -> Option<&StandardInformation> {
        self.attributes.iter().find_map(|a| match &a.body {
            AttributeBody::StandardInformation(si) => Some(si),
            _ => None,
        })
    }

    /// Extract Alternate Data Streams (named $DATA attributes).
    pub fn alternate_data_streams(&self) -> Vec<DataStream> {
        self.attributes_of(AttributeType::Data)
            .filter_map(|a| {
                a.name().map(|name| DataStream {
                    name: name.to_string(),
                    size: a.content_size(),
                    resident: !a.is_non_resident(),
                })
            })
            .collect()
    }

    /// Logical size: unnamed $DATA when present in this record, otherwise
    /// the size recovered from the parent directory index.
    pub fn logical_size(&self) -> Option<u64> {
        self.data_attribute(None)
            .map(|a| a.content_size())
            .or(self.derived_size)
    }

    /// Bytes allocated on disk for the unnamed $DATA, falling back to the
    /// $FILE_NAME allocated size.
    pub fn physical_size(&self) -> Option<u64> {
        self.data_attribute(None)
            .map(|a| a.allocated_size())
            .or_else(|| self.preferred_file_name().map(|f| f.allocated_size))
    }

    pub fn timestamps(&self) -> Timestamps {
        let mut ts = Timestamps::default();
        if let Some(si) = self.standard_information() {
            ts.si_created = si.created;
            ts.si_modified = si.modified;
            ts.si_mft_modified = si.mft_modified;
            ts.si_accessed = si.accessed;
        }
        if let Some(f) = self.preferred_file_name() {
            ts.fn_created = f.created;
            ts.fn_modified = f.modified;
            ts.fn_mft_modified = f.mft_modified;
            ts.fn_accessed = f.accessed;
        }
        ts
    }

    /// Convert record to a human‑readable table string.
    pub fn to_string(&self) -> String {
        let mut out = String::new();

        //  Header
        let mut hdr = Table::new();
        hdr.add_row(row!["MFT Entry Header Values"]);
        hdr.add_row(row![b -> "Entry", self.id]);
        hdr.add_row(row![b -> "Signature", String::from_utf8_lossy(&self.header.signature)]);
        hdr.add_row(row![b -> "Sequence", self.header.sequence_number]);
        hdr.add_row(row![b -> "$LogFile Sequence Number", self.header.lsn]);
        hdr.add_row(row![b -> "Flags", record_flags_to_string(self.header.flags)]);
        hdr.add_row(row![b -> "Links", self.header.hard_link_count]);
        if self.is_extension() {
            hdr.add_row(row![b -> "Base record", self.header.base_record]);
        }
        if let Some(p) = self.parent {
            hdr.add_row(row![b -> "Parent", p]);
        }
        if let Some(l) = self.linked_record {
            hdr.add_row(row![b -> "Linked record", l]);
        }
        if let Some(size) = self.logical_size() {
            hdr.add_row(row![b -> "Logical size", size]);
        }
        out.push_str(&hdr.to_string());

        if !self.is_valid() {
            return out;
        }

        //  Attributes overview
        let mut attrs = Table::new();
        attrs.add_row(row!["Attributes", "Name", "Status", "Size"]);
        for a in &self.attributes {
            attrs.add_row(row![
                format!("{} (0x{:X}‑#{})", a.type_name(), a.attr_type().code(), a.header.id),
                a.name().unwrap_or("N/A"),
                if a.is_non_resident() { "Non‑resident" } else { "Resident" },
                a.content_size()
            ]);
        }
        out.push('\n');
        out.push_str(&attrs.to_string());

        //  $STANDARD_INFORMATION
        if let Some(std) = self.standard_information() {
            let mut t = Table::new();
            t.add_row(row!["$STANDARD_INFORMATION"]);
            t.add_row(row![b -> "Created", format_time(&std.created)]);
            t.add_row(row![b -> "File Modified", format_time(&std.modified)]);
            t.add_row(row![b -> "MFT Modified", format_time(&std.mft_modified)]);
            t.add_row(row![b -> "Accessed", format_time(&std.accessed)]);
            t.add_row(row![b -> "Flags", si_flags_to_string(std.file_attrs)]);
            t.add_row(row![b -> "Owner ID", std.owner_id.map_or("‑".into(), |v| v.to_string())]);
            t.add_row(
                row![b -> "Security ID", std.security_id.map_or("‑".into(), |v| v.to_string())],
            );
            if let Some(u) = std.usn {
                t.add_row(row![b -> "Last USN", u]);
            }
            out.push('\n');
            out.push_str(&t.to_string());
        }

        //  All FILE_NAME attributes
        let names = self.file_names();
        if !names.is_empty() {
            let mut t = Table::new();
            t.add_row(row!["$FILE_NAME Attributes"]);
            for fname in names {
                t.add_row(row![b -> "Name", fname.name.clone()]);
                t.add_row(row![b -> "Namespace", fname.namespace]);
                t.add_row(row![b -> "Parent MFT", format!("{} (seq {})", fname.parent_ref, fname.parent_seq)]);
                t.add_row(row![b -> "Allocated", fname.allocated_size]);
                t.add_row(row![b -> "Actual", fname.real_size]);
                t.add_row(row!["‑ Created", format_time(&fname.created)]);
                t.add_row(row!["‑ Modified", format_time(&fname.modified)]);
                t.add_row(row!["‑ MFT Mod", format_time(&fname.mft_modified)]);
                t.add_row(row!["‑ Accessed", format_time(&fname.accessed)]);
                t.add_row(row!["", ""]);
            }
            out.push('\n');
            out.push_str(&t.to_string());
        }

        //  Alternate Data Streams
        let ads = self.alternate_data_streams();
        if !ads.is_empty() {
            let mut t = Table::new();
            t.add_row(row!["Alternate Data Streams"]);
            t.add_row(row![b -> "Name", "Size", "Resident"]);
            for s in ads {
                t.add_row(row![s.name, s.size, if s.resident { "Yes" } else { "No" }]);
            }
            out.push('\n');
            out.push_str(&t.to_string());
        }

        out
    }

    /// Serialize to JSON (uses `serde`).
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "header": &self.header,
            "status": self.status(),
            "parent": self.parent,
            "linked_record": self.linked_record,
            "logical_size": self.logical_size(),
            "attributes": self.attributes.iter().map(|a| a.describe()).collect::<Vec<_>>(),
            "file_names": self.file_names().into_iter().map(|f| f.to_json()).collect::<Vec<_>>(),
            "ads": self.alternate_data_streams(),
            "timestamps": self.timestamps(),
        })
    }
}

/// Decode MFT record flags.
fn record_flags_to_string(flags: u16) -> String {
    let mut v = Vec::new();
    if flags & FLAG_IN_USE != 0 {
        v.push("Allocated")
    }
    if flags & FLAG_DIRECTORY != 0 {
        v.push("Directory")
    }
    if flags & 0x0004 != 0 {
        v.push("Extension")
    }
    if flags & 0x0008 != 0 {
        v.push("View Index")
    }
    if v.is_empty() {
        "None".into()
    } else {
        v.join(" | ")
    }
}

/// Assemble a FILE record from ready-made attributes.
#[cfg(test)]
pub(crate) fn build_record(flags: u16, attributes: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = vec![0u8; MFT_RECORD_SIZE];
    buf[0..4].copy_from_slice(b"FILE");
    buf[0x10..0x12].copy_from_slice(&1u16.to_le_bytes());
    buf[0x14..0x16].copy_from_slice(&56u16.to_le_bytes());
    buf[0x16..0x18].copy_from_slice(&flags.to_le_bytes());
    let mut off = 56;
    for a in attributes {
        buf[off..off + a.len()].copy_from_slice(a);
        off += a.len();
    }
    buf[off..off + 4].copy_from_slice(&ATTRIBUTE_END.to_le_bytes());
    let used = (off + 8) as u32;
    buf[0x18..0x1C].copy_from_slice(&used.to_le_bytes());
    buf[0x1C..0x20].copy_from_slice(&(MFT_RECORD_SIZE as u32).to_le_bytes());
    buf
}
