use crate::util::{filetime_to_datetime, le_u32, le_u64};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parsed $STANDARD_INFORMATION (NTFS 1.2 layout, optionally the 3.x tail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardInformation {
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub mft_modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub file_attrs: u32,
    pub max_versions: u32,
    pub version_number: u32,
    pub class_id: u32,
    pub owner_id: Option<u32>,
    pub security_id: Option<u32>,
    pub quota_charged: Option<u64>,
    pub usn: Option<u64>,
}

impl StandardInformation {
    pub const MIN_SIZE: usize = 0x30;

    pub fn from_bytes(raw: &[u8], notes: &mut Vec<String>) -> Option<Self> {
        if raw.len() < Self::MIN_SIZE {
            notes.push(format!(
                "$STANDARD_INFORMATION holds {} bytes, need {}",
                raw.len(),
                Self::MIN_SIZE
            ));
            return None;
        }
        let time = |off| le_u64(raw, off).and_then(filetime_to_datetime);
        Some(Self {
            created: time(0x00),
            modified: time(0x08),
            mft_modified: time(0x10),
            accessed: time(0x18),
            file_attrs: le_u32(raw, 0x20)?,
            max_versions: le_u32(raw, 0x24)?,
            version_number: le_u32(raw, 0x28)?,
            class_id: le_u32(raw, 0x2C)?,
            owner_id: le_u32(raw, 0x30),
            security_id: le_u32(raw, 0x34),
            quota_charged: le_u64(raw, 0x38),
            usn: le_u64(raw, 0x40),
        })
    }
}

/// Decode FILE attribute flags inside $STANDARD_INFORMATION.
pub fn si_flags_to_string(flags: u32) -> String {
    const NAMES: [(u32, &str); 13] = [
        (0x0001, "READONLY"),
        (0x0002, "HIDDEN"),
        (0x0004, "SYSTEM"),
        (0x0020, "ARCHIVE"),
        (0x0100, "TEMPORARY"),
        (0x0200, "SPARSE_FILE"),
        (0x0400, "REPARSE_POINT"),
        (0x0800, "COMPRESSED"),
        (0x1000, "OFFLINE"),
        (0x2000, "NOT_CONTENT_INDEXED"),
        (0x4000, "ENCRYPTED"),
        (0x1000_0000, "DIRECTORY"),
        (0x2000_0000, "INDEX_VIEW"),
    ];
    let v: Vec<&str> = NAMES
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, n)| *n)
        .collect();
    if v.is_empty() {
        "None".to_string()
    } else {
        v.join(" | ")
    }
}
