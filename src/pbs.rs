// Sources:
// - https://en.wikipedia.org/wiki/NTFS

//! NTFS Partition Boot Sector: just enough of it to find the MFT.

use crate::error::{MftError, Result};
use crate::locator::Geometry;
use byteorder::{LittleEndian, ReadBytesExt};
use prettytable::{Table, row};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io::{Cursor, Seek, SeekFrom};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PartitionBootSector {
    pub oem_id: [u8; 8],              // 0x03 "NTFS    "
    pub bytes_per_sector: u16,        // 0x0B
    pub sectors_per_cluster: u8,      // 0x0D  (above 0x80: 2^(256 - n))
    pub total_sectors: u64,           // 0x28
    pub mft_cluster: u64,             // 0x30
    pub mft_mirror_cluster: u64,      // 0x38
    pub clusters_per_file_record: i8, // 0x40  (may be negative)
    pub clusters_per_index_buffer: i8, // 0x44
    pub volume_serial_number: u64,    // 0x48
    pub end_of_sector_marker: u16,    // 0x1FE (0xAA55)
}

impl PartitionBootSector {
    pub const NTFS_OEM_ID: [u8; 8] = *b"NTFS    ";
    pub const SIZE: usize = 512;

    /// Parse and validate the first sector of an NTFS volume.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(MftError::InvalidBootSector(format!(
                "need {} bytes, got {}",
                Self::SIZE,
                buf.len()
            )));
        }
        let mut c = Cursor::new(buf);

        let mut oem_id = [0u8; 8];
        oem_id.copy_from_slice(&buf[3..11]);
        c.seek(SeekFrom::Start(0x0B))?;
        let bytes_per_sector = c.read_u16::<LittleEndian>()?;
        let sectors_per_cluster = c.read_u8()?;
        c.seek(SeekFrom::Start(0x28))?;
        let total_sectors = c.read_u64::<LittleEndian>()?;
        let mft_cluster = c.read_u64::<LittleEndian>()?;
        let mft_mirror_cluster = c.read_u64::<LittleEndian>()?;
        let clusters_per_file_record = c.read_i8()?;
        c.seek(SeekFrom::Current(3))?;
        let clusters_per_index_buffer = c.read_i8()?;
        c.seek(SeekFrom::Current(3))?;
        let volume_serial_number = c.read_u64::<LittleEndian>()?;
        c.seek(SeekFrom::Start(0x1FE))?;
        let end_of_sector_marker = c.read_u16::<LittleEndian>()?;

        let pbs = Self {
            oem_id,
            bytes_per_sector,
            sectors_per_cluster,
            total_sectors,
            mft_cluster,
            mft_mirror_cluster,
            clusters_per_file_record,
            clusters_per_index_buffer,
            volume_serial_number,
            end_of_sector_marker,
        };
        if !pbs.oem_id_is_valid() {
            return Err(MftError::InvalidBootSector(format!(
                "OEM identifier is '{}'",
                String::from_utf8_lossy(&pbs.oem_id)
            )));
        }
        if pbs.bytes_per_sector == 0 || pbs.sectors_per_cluster == 0 {
            return Err(MftError::InvalidBootSector("zero sector or cluster size".into()));
        }
        if pbs.cluster_size() == 0 {
            return Err(MftError::InvalidBootSector(format!(
                "sectors per cluster 0x{:02X} is out of range",
                pbs.sectors_per_cluster
            )));
        }
        if pbs.file_record_size().is_none() {
            return Err(MftError::InvalidBootSector(format!(
                "clusters per file record {} is out of range",
                pbs.clusters_per_file_record
            )));
        }
        if pbs.mft_address().is_none() {
            return Err(MftError::InvalidBootSector(format!(
                "$MFT cluster {} is out of range",
                pbs.mft_cluster
            )));
        }
        Ok(pbs)
    }

    /// Check if the oem_id is valid
    pub fn oem_id_is_valid(&self) -> bool {
        self.oem_id == Self::NTFS_OEM_ID
    }

    /// Sectors per cluster. Large clusters store the exponent as a
    /// negative byte.
    pub fn cluster_sectors(&self) -> Option<u64> {
        match self.sectors_per_cluster {
            n @ 0..=0x80 => Some(n as u64),
            n => 1u64.checked_shl(256 - n as u32),
        }
    }

    pub fn cluster_size(&self) -> u64 {
        self.cluster_sectors()
            .and_then(|s| s.checked_mul(self.bytes_per_sector as u64))
            .unwrap_or(0)
    }

    /// Compute actual bytes per file-record segment
    pub fn file_record_size(&self) -> Option<u32> {
        let cpfr = self.clusters_per_file_record;
        if cpfr > 0 {
            u32::try_from(self.cluster_size())
                .ok()?
                .checked_mul(cpfr as u32)
        } else {
            1u32.checked_shl(cpfr.unsigned_abs() as u32)
        }
    }

    /// Byte offset of $MFT inside the partition.
    pub fn mft_address(&self) -> Option<u64> {
        self.mft_cluster.checked_mul(self.cluster_size())
    }

    pub fn geometry(&self, partition_offset: u64) -> Geometry {
        Geometry::new(
            partition_offset,
            self.cluster_sectors().unwrap_or(0),
            self.bytes_per_sector as u64,
        )
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }

    pub fn to_string(&self) -> String {
        let mut t = Table::new();
        t.add_row(row!["Partition Boot Sector"]);
        t.add_row(row![b -> "OEM ID", String::from_utf8_lossy(&self.oem_id)]);
        t.add_row(row![b -> "Bytes per sector", self.bytes_per_sector]);
        t.add_row(row![b -> "Sectors per cluster", self.cluster_sectors().unwrap_or(0)]);
        t.add_row(row![b -> "Total sectors", self.total_sectors]);
        t.add_row(row![b -> "$MFT cluster", self.mft_cluster]);
        t.add_row(row![b -> "$MFTMirr cluster", self.mft_mirror_cluster]);
        t.add_row(row![b -> "File record size", self.file_record_size().unwrap_or(0)]);
        t.add_row(row![b -> "Serial number", format!("{:016X}", self.volume_serial_number)]);
        t.to_string()
    }
}

#[cfg(test)]
pub(crate) fn build_boot_sector(sectors_per_cluster: u8, mft_cluster: u64, total_sectors: u64) -> Vec<u8> {
    let mut b = vec![0u8; 512];
    b[0..3].copy_from_slice(&[0xEB, 0x52, 0x90]);
    b[3..11].copy_from_slice(b"NTFS    ");
    b[0x0B..0x0D].copy_from_slice(&512u16.to_le_bytes());
    b[0x0D] = sectors_per_cluster;
    b[0x28..0x30].copy_from_slice(&total_sectors.to_le_bytes());
    b[0x30..0x38].copy_from_slice(&mft_cluster.to_le_bytes());
    b[0x40] = 0xF6; // -10 -> 1024 byte records
    b[0x44] = 1;
    b[0x1FE..0x200].copy_from_slice(&0xAA55u16.to_le_bytes());
    b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_geometry() {
        let pbs = PartitionBootSector::from_bytes(&build_boot_sector(8, 4, 1 << 20)).unwrap();
        assert_eq!(pbs.cluster_size(), 4096);
        assert_eq!(pbs.file_record_size(), Some(1024));
        assert_eq!(pbs.mft_address(), Some(4 * 4096));
        assert_eq!(pbs.geometry(1 << 20).cluster_offset(2), Some((1 << 20) + 8192));
    }

    #[test]
    fn rejects_other_filesystems() {
        let mut raw = build_boot_sector(8, 4, 1 << 20);
        raw[3..11].copy_from_slice(b"MSDOS5.0");
        assert!(matches!(
            PartitionBootSector::from_bytes(&raw),
            Err(MftError::InvalidBootSector(_))
        ));
        assert!(PartitionBootSector::from_bytes(&raw[..100]).is_err());
    }

    #[test]
    fn large_clusters_use_exponent_encoding() {
        // 0xF4: 2^12 sectors, 2 MiB clusters
        let pbs = PartitionBootSector::from_bytes(&build_boot_sector(0xF4, 3, 1 << 30)).unwrap();
        assert_eq!(pbs.cluster_sectors(), Some(4096));
        assert_eq!(pbs.cluster_size(), 2 * 1024 * 1024);
        assert_eq!(pbs.mft_address(), Some(3 * 2 * 1024 * 1024));
        assert_eq!(pbs.geometry(0).cluster_offset(1), Some(2 * 1024 * 1024));

        let mut raw = build_boot_sector(8, 4, 1 << 20);
        raw[0x0D] = 0x81;
        assert!(matches!(
            PartitionBootSector::from_bytes(&raw),
            Err(MftError::InvalidBootSector(_))
        ));
    }

    #[test]
    fn oversized_record_exponent_is_rejected() {
        for byte in [0x80u8, 0xE0, 0xDF] {
            let mut raw = build_boot_sector(8, 4, 1 << 20);
            raw[0x40] = byte;
            assert!(matches!(
                PartitionBootSector::from_bytes(&raw),
                Err(MftError::InvalidBootSector(_))
            ));
        }
        let mut raw = build_boot_sector(8, 4, 1 << 20);
        raw[0x40] = 0xE1; // -31
        assert_eq!(
            PartitionBootSector::from_bytes(&raw).unwrap().file_record_size(),
            Some(1 << 31)
        );
    }

    #[test]
    fn huge_mft_cluster_is_rejected() {
        let raw = build_boot_sector(8, u64::MAX / 2, 1 << 20);
        assert!(matches!(
            PartitionBootSector::from_bytes(&raw),
            Err(MftError::InvalidBootSector(_))
        ));
    }
}
