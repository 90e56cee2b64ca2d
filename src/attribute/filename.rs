use crate::util::{filetime_to_datetime, le_u32, le_u64, split_reference, utf16_lossy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

/// $FILE_NAME namespace byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Namespace {
    Posix,
    Win32,
    Dos,
    Win32AndDos,
    Unknown(u8),
}

impl Namespace {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => Namespace::Posix,
            1 => Namespace::Win32,
            2 => Namespace::Dos,
            3 => Namespace::Win32AndDos,
            other => Namespace::Unknown(other),
        }
    }

    /// Lower is better when picking "the" name of a record.
    pub fn preference(&self) -> u8 {
        match self {
            Namespace::Posix => 0,
            Namespace::Win32 => 1,
            Namespace::Win32AndDos => 2,
            Namespace::Dos => 3,
            Namespace::Unknown(_) => 4,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Posix => f.write_str("POSIX"),
            Namespace::Win32 => f.write_str("Win32"),
            Namespace::Dos => f.write_str("DOS"),
            Namespace::Win32AndDos => f.write_str("Win32 & Dos"),
            Namespace::Unknown(b) => write!(f, "Unknown({})", b),
        }
    }
}

/// Parsed $FILE_NAME attribute: 66 fixed bytes followed by the UTF-16LE name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNameAttr {
    pub parent_ref: u64,
    pub parent_seq: u16,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub mft_modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub allocated_size: u64,
    pub real_size: u64,
    pub flags: u32,
    pub reparse_tag: u32,
    pub name_length: u8,
    pub namespace: Namespace,
    pub name: String,
}

impl FileNameAttr {
    pub const FIXED_SIZE: usize = 66;

    /// Decode a $FILE_NAME value. A name running past the buffer is cut to the
    /// available code units and noted.
    pub fn from_bytes(raw: &[u8], notes: &mut Vec<String>) -> Option<Self> {
        if raw.len() < Self::FIXED_SIZE {
            notes.push(format!(
                "$FILE_NAME holds {} bytes, need {}",
                raw.len(),
                Self::FIXED_SIZE
            ));
            return None;
        }
        let (parent_ref, parent_seq) = split_reference(le_u64(raw, 0x00)?);
        let time = |off| le_u64(raw, off).and_then(filetime_to_datetime);
        let name_length = raw[0x40];
        let namespace = Namespace::from_byte(raw[0x41]);

        let wanted = Self::FIXED_SIZE + name_length as usize * 2;
        let name_end = if wanted > raw.len() {
            notes.push(format!(
                "file name of {} units exceeds the {} available bytes",
                name_length,
                raw.len() - Self::FIXED_SIZE
            ));
            raw.len()
        } else {
            wanted
        };
        let name = utf16_lossy(&raw[Self::FIXED_SIZE..name_end]);

        Some(Self {
            parent_ref,
            parent_seq,
            created: time(0x08),
            modified: time(0x10),
            mft_modified: time(0x18),
            accessed: time(0x20),
            allocated_size: le_u64(raw, 0x28)?,
            real_size: le_u64(raw, 0x30)?,
            flags: le_u32(raw, 0x38)?,
            reparse_tag: le_u32(raw, 0x3C)?,
            name_length,
            namespace,
            name,
        })
    }

    /// Lowercased extension without the dot, if the name has one.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        (!stem.is_empty() && !ext.is_empty()).then(|| ext.to_lowercase())
    }

    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "namespace": self.namespace.to_string(),
            "parent": self.parent_ref,
            "parent_seq": self.parent_seq,
            "allocated": self.allocated_size,
            "size": self.real_size,
            "created": self.created,
            "modified": self.modified,
            "mft_modified": self.mft_modified,
            "accessed": self.accessed,
            "flags": self.flags,
        })
    }
}

/// Pick the preferred name among several $FILE_NAME attributes:
/// POSIX, then Win32, then Win32 & DOS, then DOS.
pub fn preferred<'a, I>(names: I) -> Option<&'a FileNameAttr>
where
    I: IntoIterator<Item = &'a FileNameAttr>,
{
    names.into_iter().min_by_key(|f| f.namespace.preference())
}

#[cfg(test)]
pub(crate) fn build_file_name(parent: u64, name: &str, namespace: u8, real_size: u64) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let mut raw = vec![0u8; FileNameAttr::FIXED_SIZE];
    raw[0..8].copy_from_slice(&(parent | (1u64 << 48)).to_le_bytes());
    raw[0x28..0x30].copy_from_slice(&real_size.next_multiple_of(4096).to_le_bytes());
    raw[0x30..0x38].copy_from_slice(&real_size.to_le_bytes());
    raw[0x40] = units.len() as u8;
    raw[0x41] = namespace;
    for u in units {
        raw.extend_from_slice(&u.to_le_bytes());
    }
    raw
}
