use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, TimeZone, Utc};

/// Bounds-checked little-endian reads. `None` when the field is not fully
/// inside `buf`.
pub(crate) fn le_u16(buf: &[u8], off: usize) -> Option<u16> {
    buf.get(off..off.checked_add(2)?).map(LittleEndian::read_u16)
}

pub(crate) fn le_u32(buf: &[u8], off: usize) -> Option<u32> {
    buf.get(off..off.checked_add(4)?).map(LittleEndian::read_u32)
}

pub(crate) fn le_u64(buf: &[u8], off: usize) -> Option<u64> {
    buf.get(off..off.checked_add(8)?).map(LittleEndian::read_u64)
}

/// Split a 64-bit file reference into (record number, sequence).
pub(crate) fn split_reference(raw: u64) -> (u64, u16) {
    (raw & 0x0000_FFFF_FFFF_FFFF, (raw >> 48) as u16)
}

/// Decode UTF-16LE, replacing invalid surrogates. A trailing odd byte is
/// ignored.
pub(crate) fn utf16_lossy(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

const FILETIME_UNIX_DELTA_MICROS: i64 = 11_644_473_600_000_000;

/// Windows FILETIME (100ns ticks since 1601) to UTC. Zero means "not set".
pub fn filetime_to_datetime(ft: u64) -> Option<DateTime<Utc>> {
    if ft == 0 {
        return None;
    }
    let micros_since_1601 = (ft / 10) as i64;
    let unix_micros = micros_since_1601 - FILETIME_UNIX_DELTA_MICROS;
    let secs = unix_micros.div_euclid(1_000_000);
    let nanos = (unix_micros.rem_euclid(1_000_000) * 1_000) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

pub(crate) fn format_time(t: &Option<DateTime<Utc>>) -> String {
    t.map(|dt| dt.to_rfc3339()).unwrap_or_else(|| "‑".into())
}

/// Apply the update sequence array of a multi-sector structure (FILE or INDX
/// record). At the end of every 512-byte sector NTFS stores the update
/// sequence number; the original two bytes live in the array. Nothing is
/// patched unless every sector carries the expected number.
pub(crate) fn apply_fixups(buf: &mut [u8], usa_offset: usize, usa_count: usize) -> Result<(), String> {
    if usa_count < 2 {
        return Ok(());
    }
    if usa_offset + 2 * usa_count > buf.len() {
        return Err("update sequence array outside the structure".into());
    }

    let usn = [buf[usa_offset], buf[usa_offset + 1]];
    // Short buffer: sectors past its end were not read.
    let sectors = 1..usa_count.min(buf.len() / 512 + 1);
    for i in sectors.clone() {
        let sector_end = i * 512 - 2;
        if buf[sector_end..sector_end + 2] != usn {
            return Err(format!("update sequence mismatch at sector {}", i));
        }
    }
    for i in sectors {
        let sector_end = i * 512 - 2;
        let fix_pos = usa_offset + 2 * i;
        buf[sector_end] = buf[fix_pos];
        buf[sector_end + 1] = buf[fix_pos + 1];
    }
    Ok(())
}
