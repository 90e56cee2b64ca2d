// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

pub mod attribute_list;
pub mod filename;
pub mod index;
pub mod misc;
pub mod standard;

use crate::runlist::RunList;
use crate::util::{le_u16, le_u32, le_u64, utf16_lossy};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use attribute_list::AttributeListEntry;
pub use filename::{FileNameAttr, Namespace};
pub use index::{FILE_NAME_INDEX, IndexAllocation, IndexEntry, IndexNodeHeader, IndexRoot};
pub use misc::{Bitmap, ObjectId, ReparsePoint, VolumeInformation};
pub use standard::StandardInformation;

pub const ATTRIBUTE_END: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum AttributeType {
    StandardInformation,
    AttributeList,
    FileName,
    ObjectId,
    SecurityDescriptor,
    VolumeName,
    VolumeInformation,
    Data,
    IndexRoot,
    IndexAllocation,
    Bitmap,
    ReparsePoint,
    EaInformation,
    Ea,
    PropertySet,
    LoggedUtilityStream,
    End,
    Unknown(u32),
}

impl AttributeType {
    pub fn from_code(value: u32) -> Self {
        use AttributeType::*;
        match value {
            0x10 => StandardInformation,
            0x20 => AttributeList,
            0x30 => FileName,
            0x40 => ObjectId,
            0x50 => SecurityDescriptor,
            0x60 => VolumeName,
            0x70 => VolumeInformation,
            0x80 => Data,
            0x90 => IndexRoot,
            0xA0 => IndexAllocation,
            0xB0 => Bitmap,
            0xC0 => ReparsePoint,
            0xD0 => EaInformation,
            0xE0 => Ea,
            0xF0 => PropertySet,
            0x100 => LoggedUtilityStream,
            ATTRIBUTE_END => End,
            other => Unknown(other),
        }
    }

    pub fn code(&self) -> u32 {
        use AttributeType::*;
        match self {
            StandardInformation => 0x10,
            AttributeList => 0x20,
            FileName => 0x30,
            ObjectId => 0x40,
            SecurityDescriptor => 0x50,
            VolumeName => 0x60,
            VolumeInformation => 0x70,
            Data => 0x80,
            IndexRoot => 0x90,
            IndexAllocation => 0xA0,
            Bitmap => 0xB0,
            ReparsePoint => 0xC0,
            EaInformation => 0xD0,
            Ea => 0xE0,
            PropertySet => 0xF0,
            LoggedUtilityStream => 0x100,
            End => ATTRIBUTE_END,
            Unknown(v) => *v,
        }
    }

    pub fn name(&self) -> &'static str {
        use AttributeType::*;
        match self {
            StandardInformation => "Standard Information",
            AttributeList => "Attribute List",
            FileName => "FileName",
            ObjectId => "Object ID",
            SecurityDescriptor => "Security Descriptor",
            VolumeName => "Volume Name",
            VolumeInformation => "Volume Information",
            Data => "Data",
            IndexRoot => "Index Root",
            IndexAllocation => "Index Allocation",
            Bitmap => "BitMap",
            ReparsePoint => "Reparse Point",
            EaInformation => "EA Information",
            Ea => "EA",
            PropertySet => "Property Set",
            LoggedUtilityStream => "Logged Utility Stream",
            End => "Last",
            Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Common header part for resident & non-resident attributes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AttributeHeader {
    pub attr_type: AttributeType,
    pub length: u32,
    pub non_resident: bool,
    pub name_length: u8,
    pub name_offset: u16,
    pub flags: u16,
    pub id: u16,
    pub name: Option<String>,
}

impl AttributeHeader {
    pub const SIZE: usize = 16;
}

/// Additional 8-byte header present only when the attribute is resident.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResidentHeader {
    pub value_length: u32,
    pub value_offset: u16,
    pub indexed: u8,
}

impl ResidentHeader {
    pub const END: usize = 0x18;
}

/// Additional header present only when the attribute is non-resident.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NonResidentHeader {
    pub start_vcn: u64,
    pub last_vcn: u64,
    pub run_list_offset: u16,
    pub compression_unit: u16,
    pub allocated_length: u64,
    pub actual_length: u64,
    pub initialized_length: u64,
    pub run_list: RunList,
}

impl NonResidentHeader {
    pub const END: usize = 0x40;
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum Residency {
    Resident(ResidentHeader),
    NonResident(NonResidentHeader),
}

/// Decoded attribute content, one variant per attribute kind.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum AttributeBody {
    StandardInformation(StandardInformation),
    AttributeList(Vec<AttributeListEntry>),
    FileName(FileNameAttr),
    ObjectId(ObjectId),
    VolumeName(String),
    VolumeInformation(VolumeInformation),
    /// Resident content; empty for a non-resident stream.
    Data(Vec<u8>),
    IndexRoot(IndexRoot),
    IndexAllocation(IndexAllocation),
    Bitmap(Bitmap),
    ReparsePoint(ReparsePoint),
    /// Known kind without a decoder, raw resident value kept.
    Raw(Vec<u8>),
    /// Nothing could be decoded (unknown kind, or a decoder gave up).
    Undecoded,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Attribute {
    pub header: AttributeHeader,
    pub residency: Residency,
    pub body: AttributeBody,
}

impl Attribute {
    /// Decode one attribute. `raw` starts at the attribute header and ends at
    /// its declared length (already clamped to the record by the caller).
    /// Problems are appended to `notes`; `None` means not even the common
    /// header was readable.
    pub fn parse(raw: &[u8], notes: &mut Vec<String>) -> Option<Self> {
        if raw.len() < AttributeHeader::SIZE {
            notes.push(format!("attribute header truncated to {} bytes", raw.len()));
            return None;
        }
        let attr_type = AttributeType::from_code(le_u32(raw, 0)?);
        let name_length = raw[9];
        let name_offset = le_u16(raw, 10)?;

        let name = if name_length > 0 {
            let start = name_offset as usize;
            match raw.get(start..start + name_length as usize * 2) {
                Some(bytes) => Some(utf16_lossy(bytes)),
                None => {
                    notes.push(format!("{} attribute name outside the attribute", attr_type));
                    None
                }
            }
        } else {
            None
        };

        let header = AttributeHeader {
            attr_type,
            length: le_u32(raw, 4)?,
            non_resident: raw[8] != 0,
            name_length,
            name_offset,
            flags: le_u16(raw, 12)?,
            id: le_u16(raw, 14)?,
            name,
        };

        let attr = if header.non_resident {
            Self::parse_non_resident(raw, header, notes)
        } else {
            Self::parse_resident(raw, header, notes)
        };
        Some(attr)
    }

    fn parse_resident(raw: &[u8], header: AttributeHeader, notes: &mut Vec<String>) -> Self {
        let resident = ResidentHeader {
            value_length: le_u32(raw, 0x10).unwrap_or(0),
            value_offset: le_u16(raw, 0x14).unwrap_or(0),
            indexed: raw.get(0x16).copied().unwrap_or(0),
        };
        if raw.len() < ResidentHeader::END {
            notes.push(format!("resident {} header truncated", header.attr_type));
            return Self {
                header,
                residency: Residency::Resident(resident),
                body: AttributeBody::Undecoded,
            };
        }

        let start = (resident.value_offset as usize).min(raw.len());
        let wanted = start.saturating_add(resident.value_length as usize);
        if wanted > raw.len() {
            notes.push(format!(
                "{} content of {} bytes truncated to {}",
                header.attr_type,
                resident.value_length,
                raw.len() - start
            ));
        }
        let value = &raw[start..wanted.min(raw.len())];
        let body = decode_body(header.attr_type, header.name.as_deref(), value, notes);
        Self {
            header,
            residency: Residency::Resident(resident),
            body,
        }
    }

    fn parse_non_resident(raw: &[u8], header: AttributeHeader, notes: &mut Vec<String>) -> Self {
        let r = |off| le_u64(raw, off).unwrap_or(0);
        let run_list_offset = le_u16(raw, 0x20).unwrap_or(0);
        let mut nr = NonResidentHeader {
            start_vcn: r(0x10),
            last_vcn: r(0x18),
            run_list_offset,
            compression_unit: le_u16(raw, 0x22).unwrap_or(0),
            allocated_length: r(0x28),
            actual_length: r(0x30),
            initialized_length: r(0x38),
            run_list: RunList::default(),
        };
        if raw.len() < NonResidentHeader::END {
            notes.push(format!("non-resident {} header truncated", header.attr_type));
        }

        match raw.get(run_list_offset as usize..) {
            Some(bytes) if run_list_offset as usize >= NonResidentHeader::END => {
                nr.run_list = RunList::decode(bytes);
                if let Some(reason) = &nr.run_list.stop_reason {
                    notes.push(format!("{} run-list: {}", header.attr_type, reason));
                }
            }
            _ => notes.push(format!(
                "{} run-list offset {} outside the attribute",
                header.attr_type, run_list_offset
            )),
        }
        if nr.actual_length > nr.allocated_length {
            notes.push(format!(
                "{} actual length {} exceeds allocated length {}",
                header.attr_type, nr.actual_length, nr.allocated_length
            ));
        }

        // Content lives on disk; only placeholders here.
        let body = match header.attr_type {
            AttributeType::Data => AttributeBody::Data(Vec::new()),
            AttributeType::IndexAllocation => AttributeBody::IndexAllocation(IndexAllocation::default()),
            AttributeType::AttributeList => AttributeBody::AttributeList(Vec::new()),
            AttributeType::Bitmap => AttributeBody::Bitmap(Bitmap::default()),
            _ => AttributeBody::Undecoded,
        };
        Self {
            header,
            residency: Residency::NonResident(nr),
            body,
        }
    }

    pub fn attr_type(&self) -> AttributeType {
        self.header.attr_type
    }

    pub fn type_name(&self) -> &'static str {
        self.header.attr_type.name()
    }

    pub fn is_non_resident(&self) -> bool {
        matches!(self.residency, Residency::NonResident(_))
    }

    pub fn name(&self) -> Option<&str> {
        self.header.name.as_deref()
    }

    pub fn non_resident(&self) -> Option<&NonResidentHeader> {
        match &self.residency {
            Residency::NonResident(nr) => Some(nr),
            Residency::Resident(_) => None,
        }
    }

    /// Logical content size: value length when resident, actual length
    /// otherwise.
    pub fn content_size(&self) -> u64 {
        match &self.residency {
            Residency::Resident(r) => r.value_length as u64,
            Residency::NonResident(nr) => nr.actual_length,
        }
    }

    /// On-disk footprint: value length when resident, allocated length
    /// otherwise.
    pub fn allocated_size(&self) -> u64 {
        match &self.residency {
            Residency::Resident(r) => r.value_length as u64,
            Residency::NonResident(nr) => nr.allocated_length,
        }
    }

    /// One-line description for listings.
    pub fn describe(&self) -> String {
        let residency = if self.is_non_resident() {
            "Non‑resident"
        } else {
            "Resident"
        };
        let detail = match &self.body {
            AttributeBody::StandardInformation(si) => {
                format!("flags {}", standard::si_flags_to_string(si.file_attrs))
            }
            AttributeBody::AttributeList(entries) => format!("{} entries", entries.len()),
            AttributeBody::FileName(f) => format!("{} ({}) parent {}", f.name, f.namespace, f.parent_ref),
            AttributeBody::ObjectId(o) => o.object_id.clone(),
            AttributeBody::VolumeName(n) => n.clone(),
            AttributeBody::VolumeInformation(v) => {
                format!("NTFS {}.{} flags 0x{:04X}", v.major_version, v.minor_version, v.flags)
            }
            AttributeBody::Data(_) => match self.non_resident() {
                Some(nr) => format!("{} runs", nr.run_list.len()),
                None => String::new(),
            },
            AttributeBody::IndexRoot(r) => format!("{} entries", r.entries.len()),
            AttributeBody::IndexAllocation(a) if a.loaded => {
                format!("{} entries in {} blocks", a.entries.len(), a.blocks)
            }
            AttributeBody::IndexAllocation(_) => "not loaded".into(),
            AttributeBody::Bitmap(b) => format!("{} bits set", b.set_bits()),
            AttributeBody::ReparsePoint(rp) => match &rp.print_name {
                Some(target) => format!("{} -> {}", rp.tag_name(), target),
                None => format!("{} (0x{:08X})", rp.tag_name(), rp.tag),
            },
            AttributeBody::Raw(_) | AttributeBody::Undecoded => String::new(),
        };
        format!(
            "{} (0x{:X}-#{}) {} {} bytes {}",
            self.type_name(),
            self.header.attr_type.code(),
            self.header.id,
            residency,
            self.content_size(),
            detail
        )
        .trim_end()
        .to_string()
    }
}

/// Dispatch a resident value to the decoder of its kind.
fn decode_body(
    kind: AttributeType,
    name: Option<&str>,
    value: &[u8],
    notes: &mut Vec<String>,
) -> AttributeBody {
    let decoded = match kind {
        AttributeType::StandardInformation => {
            StandardInformation::from_bytes(value, notes).map(AttributeBody::StandardInformation)
        }
        AttributeType::AttributeList => Some(AttributeBody::AttributeList(
            AttributeListEntry::parse_all(value, notes),
        )),
        AttributeType::FileName => FileNameAttr::from_bytes(value, notes).map(AttributeBody::FileName),
        AttributeType::ObjectId => ObjectId::from_bytes(value, notes).map(AttributeBody::ObjectId),
        AttributeType::VolumeName => Some(AttributeBody::VolumeName(misc::volume_name(value))),
        AttributeType::VolumeInformation => {
            VolumeInformation::from_bytes(value, notes).map(AttributeBody::VolumeInformation)
        }
        AttributeType::Data => Some(AttributeBody::Data(value.to_vec())),
        AttributeType::IndexRoot => IndexRoot::from_bytes(value, notes).map(AttributeBody::IndexRoot),
        AttributeType::IndexAllocation => Some(AttributeBody::IndexAllocation(
            IndexAllocation::from_bytes(value, None, name == Some(FILE_NAME_INDEX), notes),
        )),
        AttributeType::Bitmap => Some(AttributeBody::Bitmap(Bitmap {
            bytes: value.to_vec(),
        })),
        AttributeType::ReparsePoint => {
            ReparsePoint::from_bytes(value, notes).map(AttributeBody::ReparsePoint)
        }
        AttributeType::SecurityDescriptor
        | AttributeType::EaInformation
        | AttributeType::Ea
        | AttributeType::PropertySet
        | AttributeType::LoggedUtilityStream => Some(AttributeBody::Raw(value.to_vec())),
        AttributeType::End | AttributeType::Unknown(_) => {
            notes.push(format!("unknown attribute type 0x{:X} skipped", kind.code()));
            None
        }
    };
    decoded.unwrap_or(AttributeBody::Undecoded)
}

/// Build a resident attribute (header + value), 8-byte aligned.
#[cfg(test)]
pub(crate) fn build_resident(code: u32, id: u16, name: Option<&str>, value: &[u8]) -> Vec<u8> {
    let units: Vec<u16> = name.map(|n| n.encode_utf16().collect()).unwrap_or_default();
    let name_off = ResidentHeader::END;
    let value_off = (name_off + units.len() * 2).next_multiple_of(8);
    let len = (value_off + value.len()).next_multiple_of(8);
    let mut a = vec![0u8; len];
    a[0..4].copy_from_slice(&code.to_le_bytes());
    a[4..8].copy_from_slice(&(len as u32).to_le_bytes());
    a[9] = units.len() as u8;
    a[10..12].copy_from_slice(&(name_off as u16).to_le_bytes());
    a[14..16].copy_from_slice(&id.to_le_bytes());
    a[0x10..0x14].copy_from_slice(&(value.len() as u32).to_le_bytes());
    a[0x14..0x16].copy_from_slice(&(value_off as u16).to_le_bytes());
    for (i, u) in units.iter().enumerate() {
        a[name_off + 2 * i..name_off + 2 * i + 2].copy_from_slice(&u.to_le_bytes());
    }
    a[value_off..value_off + value.len()].copy_from_slice(value);
    a
}

/// Build a non-resident attribute around an encoded run-list.
#[cfg(test)]
pub(crate) fn build_non_resident(
    code: u32,
    id: u16,
    start_vcn: u64,
    last_vcn: u64,
    runs: &[u8],
    allocated: u64,
    actual: u64,
) -> Vec<u8> {
    let len = (NonResidentHeader::END + runs.len()).next_multiple_of(8);
    let mut a = vec![0u8; len];
    a[0..4].copy_from_slice(&code.to_le_bytes());
    a[4..8].copy_from_slice(&(len as u32).to_le_bytes());
    a[8] = 1;
    a[10..12].copy_from_slice(&(NonResidentHeader::END as u16).to_le_bytes());
    a[14..16].copy_from_slice(&id.to_le_bytes());
    a[0x10..0x18].copy_from_slice(&start_vcn.to_le_bytes());
    a[0x18..0x20].copy_from_slice(&last_vcn.to_le_bytes());
    a[0x20..0x22].copy_from_slice(&(NonResidentHeader::END as u16).to_le_bytes());
    a[0x28..0x30].copy_from_slice(&allocated.to_le_bytes());
    a[0x30..0x38].copy_from_slice(&actual.to_le_bytes());
    a[0x38..0x40].copy_from_slice(&actual.to_le_bytes());
    a[NonResidentHeader::END..NonResidentHeader::END + runs.len()].copy_from_slice(runs);
    a
}
