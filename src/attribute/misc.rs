use crate::util::{le_u16, le_u32, utf16_lossy};
use serde::{Deserialize, Serialize};

/// Format a 16-byte on-disk GUID (first three fields little-endian).
fn guid_string(b: &[u8]) -> Option<String> {
    let b = b.get(..16)?;
    Some(format!(
        "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        le_u32(b, 0)?,
        le_u16(b, 4)?,
        le_u16(b, 6)?,
        b[8],
        b[9],
        b[10],
        b[11],
        b[12],
        b[13],
        b[14],
        b[15]
    ))
}

/// $OBJECT_ID: the object GUID and, when present, the three birth GUIDs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectId {
    pub object_id: String,
    pub birth_volume_id: Option<String>,
    pub birth_object_id: Option<String>,
    pub domain_id: Option<String>,
}

impl ObjectId {
    pub fn from_bytes(raw: &[u8], notes: &mut Vec<String>) -> Option<Self> {
        let Some(object_id) = guid_string(raw) else {
            notes.push(format!("$OBJECT_ID holds only {} bytes", raw.len()));
            return None;
        };
        let tail = |off: usize| raw.get(off..).and_then(guid_string);
        Some(Self {
            object_id,
            birth_volume_id: tail(16),
            birth_object_id: tail(32),
            domain_id: tail(48),
        })
    }
}

/// $VOLUME_INFORMATION.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VolumeInformation {
    pub major_version: u8,
    pub minor_version: u8,
    pub flags: u16,
}

impl VolumeInformation {
    pub fn from_bytes(raw: &[u8], notes: &mut Vec<String>) -> Option<Self> {
        if raw.len() < 12 {
            notes.push(format!("$VOLUME_INFORMATION holds only {} bytes", raw.len()));
            return None;
        }
        Some(Self {
            major_version: raw[8],
            minor_version: raw[9],
            flags: le_u16(raw, 10)?,
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.flags & 0x0001 != 0
    }
}

/// $VOLUME_NAME is nothing but a UTF-16LE string.
pub fn volume_name(raw: &[u8]) -> String {
    utf16_lossy(raw)
}

/// $BITMAP (MFT record allocation bitmap, index block bitmap).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bitmap {
    pub bytes: Vec<u8>,
}

impl Bitmap {
    pub fn set_bits(&self) -> u64 {
        self.bytes.iter().map(|b| b.count_ones() as u64).sum()
    }

    pub fn is_set(&self, bit: u64) -> bool {
        self.bytes
            .get((bit / 8) as usize)
            .is_some_and(|b| b & (1 << (bit % 8)) != 0)
    }
}

pub const IO_REPARSE_TAG_MOUNT_POINT: u32 = 0xA000_0003;
pub const IO_REPARSE_TAG_SYMLINK: u32 = 0xA000_000C;

/// $REPARSE_POINT. Targets are decoded for mount points and symbolic links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReparsePoint {
    pub tag: u32,
    pub data_length: u16,
    pub substitute_name: Option<String>,
    pub print_name: Option<String>,
}

impl ReparsePoint {
    pub fn from_bytes(raw: &[u8], notes: &mut Vec<String>) -> Option<Self> {
        let (Some(tag), Some(data_length)) = (le_u32(raw, 0), le_u16(raw, 4)) else {
            notes.push(format!("$REPARSE_POINT holds only {} bytes", raw.len()));
            return None;
        };
        let mut rp = Self {
            tag,
            data_length,
            substitute_name: None,
            print_name: None,
        };

        let path_buffer = match tag {
            IO_REPARSE_TAG_MOUNT_POINT => Some(16),
            IO_REPARSE_TAG_SYMLINK => Some(20),
            _ => None,
        };
        if let Some(pb) = path_buffer {
            let name_at = |off_pos: usize, len_pos: usize| -> Option<String> {
                let off = le_u16(raw, off_pos)? as usize;
                let len = le_u16(raw, len_pos)? as usize;
                raw.get(pb + off..pb + off + len).map(utf16_lossy)
            };
            rp.substitute_name = name_at(8, 10);
            rp.print_name = name_at(12, 14);
            if rp.substitute_name.is_none() {
                notes.push("reparse target outside the attribute".into());
            }
        }
        Some(rp)
    }

    pub fn tag_name(&self) -> &'static str {
        match self.tag {
            IO_REPARSE_TAG_MOUNT_POINT => "Mount point",
            IO_REPARSE_TAG_SYMLINK => "Symbolic link",
            0x8000_0017 => "WOF",
            0x8000_0013 => "Dedup",
            0x8000_001B => "AppExecLink",
            _ => "Other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_guid_format() {
        let raw: Vec<u8> = (0u8..16).collect();
        let oid = ObjectId::from_bytes(&raw, &mut Vec::new()).unwrap();
        assert_eq!(oid.object_id, "03020100-0504-0706-0809-0a0b0c0d0e0f");
        assert!(oid.birth_volume_id.is_none());
    }

    #[test]
    fn volume_information() {
        let mut raw = vec![0u8; 12];
        raw[8] = 3;
        raw[9] = 1;
        raw[10] = 1;
        let vi = VolumeInformation::from_bytes(&raw, &mut Vec::new()).unwrap();
        assert_eq!((vi.major_version, vi.minor_version), (3, 1));
        assert!(vi.is_dirty());
    }

    #[test]
    fn bitmap_bits() {
        let bm = Bitmap {
            bytes: vec![0b0000_0101, 0xFF],
        };
        assert_eq!(bm.set_bits(), 10);
        assert!(bm.is_set(2));
        assert!(!bm.is_set(1));
        assert!(!bm.is_set(100));
    }

    #[test]
    fn symlink_target() {
        let sub: Vec<u8> = "\\??\\C:\\t".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        let print: Vec<u8> = "C:\\t".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        let mut raw = vec![0u8; 20];
        raw[0..4].copy_from_slice(&IO_REPARSE_TAG_SYMLINK.to_le_bytes());
        raw[8..10].copy_from_slice(&0u16.to_le_bytes());
        raw[10..12].copy_from_slice(&(sub.len() as u16).to_le_bytes());
        raw[12..14].copy_from_slice(&(sub.len() as u16).to_le_bytes());
        raw[14..16].copy_from_slice(&(print.len() as u16).to_le_bytes());
        raw.extend(&sub);
        raw.extend(&print);
        let rp = ReparsePoint::from_bytes(&raw, &mut Vec::new()).unwrap();
        assert_eq!(rp.tag_name(), "Symbolic link");
        assert_eq!(rp.substitute_name.as_deref(), Some("\\??\\C:\\t"));
        assert_eq!(rp.print_name.as_deref(), Some("C:\\t"));
    }
}
