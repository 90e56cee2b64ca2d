// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf (Data runs)

use serde::{Deserialize, Serialize};

/// One extent of a non-resident attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DataRun {
    /// Length in clusters, never zero.
    pub length: u64,
    /// Offset as stored on disk, relative to the previous run's LCN.
    pub delta: i64,
    /// Absolute logical cluster number. `None` for a sparse run.
    pub lcn: Option<u64>,
}

impl DataRun {
    pub fn is_sparse(&self) -> bool {
        self.lcn.is_none()
    }
}

/// Decoded mapping pairs, in run order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RunList {
    pub runs: Vec<DataRun>,
    /// False when decoding stopped on something other than the end marker.
    pub complete: bool,
    /// Human readable reason when `complete` is false.
    pub stop_reason: Option<String>,
}

impl RunList {
    /// Decode the mapping-pairs byte stream of a non-resident attribute.
    ///
    /// Each run starts with a control byte: the low nibble is the size of the
    /// little-endian length field, the high nibble the size of the signed
    /// little-endian LCN delta. A zero control byte ends the list; a zero
    /// offset size marks a sparse run.
    pub fn decode(raw: &[u8]) -> Self {
        let mut out = RunList::default();
        let mut pos = 0usize;
        let mut cur_lcn: i64 = 0;

        loop {
            let Some(&hdr) = raw.get(pos) else {
                out.stop_reason = Some("run-list ended without terminator".into());
                break;
            };
            if hdr == 0 {
                out.complete = true;
                break;
            }
            pos += 1;

            let len_sz = (hdr & 0x0F) as usize;
            let ofs_sz = (hdr >> 4) as usize;
            if len_sz == 0 || len_sz > 8 || ofs_sz > 8 {
                out.stop_reason = Some(format!("invalid control byte 0x{:02X}", hdr));
                break;
            }

            let Some(len_bytes) = raw.get(pos..pos + len_sz) else {
                out.stop_reason = Some("length field truncated".into());
                break;
            };
            let length = read_unsigned(len_bytes);
            pos += len_sz;
            if length == 0 {
                out.stop_reason = Some("zero-length run".into());
                break;
            }

            if ofs_sz == 0 {
                out.runs.push(DataRun {
                    length,
                    delta: 0,
                    lcn: None,
                });
                continue;
            }

            let Some(ofs_bytes) = raw.get(pos..pos + ofs_sz) else {
                out.stop_reason = Some("offset field truncated".into());
                break;
            };
            let delta = read_signed(ofs_bytes);
            pos += ofs_sz;

            cur_lcn = match cur_lcn.checked_add(delta) {
                Some(v) if v >= 0 => v,
                _ => {
                    out.stop_reason = Some(format!("LCN underflow with delta {}", delta));
                    break;
                }
            };
            out.runs.push(DataRun {
                length,
                delta,
                lcn: Some(cur_lcn as u64),
            });
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataRun> {
        self.runs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Clusters covered by all runs, saturating at `u64::MAX`.
    pub fn total_clusters(&self) -> u64 {
        self.runs
            .iter()
            .fold(0u64, |acc, r| acc.saturating_add(r.length))
    }

    /// Map a virtual cluster number to its LCN, if it is allocated.
    /// Runs past the end of the 64-bit cluster space map to nothing.
    pub fn lcn_for_vcn(&self, vcn: u64) -> Option<u64> {
        let mut base = 0u64;
        for run in &self.runs {
            let end = base.checked_add(run.length)?;
            if vcn < end {
                return run.lcn.and_then(|lcn| lcn.checked_add(vcn - base));
            }
            base = end;
        }
        None
    }
}

fn read_unsigned(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc | (*b as u64) << (8 * i))
}

fn read_signed(bytes: &[u8]) -> i64 {
    let mut v = read_unsigned(bytes) as i64;
    let bits = bytes.len() * 8;
    // sign-extend
    if bits < 64 && bytes.last().is_some_and(|b| b & 0x80 != 0) {
        v |= !0i64 << bits;
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_run() {
        let rl = RunList::decode(&[0x11, 0x18, 0x34]);
        assert_eq!(rl.len(), 1);
        assert_eq!(rl.runs[0].length, 24);
        assert_eq!(rl.runs[0].lcn, Some(0x34));
        // no terminator: exhausted input
        assert!(!rl.complete);
    }

    #[test]
    fn cumulative_offsets_and_negative_delta() {
        let raw = [
            0x22, 0x0A, 0x00, 0xE8, 0x03, // 10 clusters at 1000
            0x11, 0x05, 0x9C, // 5 clusters at 1000 - 100
            0x00,
        ];
        let rl = RunList::decode(&raw);
        assert!(rl.complete);
        assert_eq!(rl.runs[0].lcn, Some(1000));
        assert_eq!(rl.runs[1].lcn, Some(900));
        assert_eq!(rl.runs[1].delta, -100);
        assert_eq!(rl.total_clusters(), 15);
    }

    #[test]
    fn sparse_run_keeps_previous_lcn() {
        let raw = [0x11, 0x04, 0x10, 0x01, 0x08, 0x11, 0x02, 0x10, 0x00];
        let rl = RunList::decode(&raw);
        assert_eq!(rl.len(), 3);
        assert!(rl.runs[1].is_sparse());
        assert_eq!(rl.runs[2].lcn, Some(0x20));
        assert_eq!(rl.lcn_for_vcn(1), Some(0x11));
        assert_eq!(rl.lcn_for_vcn(5), None);
        assert_eq!(rl.lcn_for_vcn(13), Some(0x21));
    }

    #[test]
    fn zero_length_stops_decoding() {
        let raw = [0x11, 0x00, 0x10, 0x11, 0x04, 0x10, 0x00];
        let rl = RunList::decode(&raw);
        assert!(rl.is_empty());
        assert!(!rl.complete);
    }

    #[test]
    fn truncated_tail_is_not_fatal() {
        let rl = RunList::decode(&[0x11, 0x04, 0x10, 0x32, 0x01]);
        assert_eq!(rl.len(), 1);
        assert!(rl.stop_reason.is_some());
    }

    #[test]
    fn decode_is_deterministic() {
        let raw = [0x31, 0x40, 0x00, 0x10, 0x02, 0x21, 0x08, 0x00, 0xF0, 0x00];
        assert_eq!(RunList::decode(&raw), RunList::decode(&raw));
    }

    #[test]
    fn oversized_runs_do_not_overflow() {
        let mut raw = vec![0x08];
        raw.extend([0xFF; 8]);
        raw.extend([0x11, 0x02, 0x10, 0x00]);
        let rl = RunList::decode(&raw);
        assert_eq!(rl.len(), 2);
        assert!(rl.runs[0].is_sparse());
        assert_eq!(rl.total_clusters(), u64::MAX);
        assert_eq!(rl.lcn_for_vcn(7), None);
        assert_eq!(rl.lcn_for_vcn(u64::MAX), None);

        // allocated run ending at the top of the cluster space
        let raw = [0x81, 0x02, 0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F, 0x00];
        let rl = RunList::decode(&raw);
        assert_eq!(rl.lcn_for_vcn(1), Some(i64::MAX as u64));
    }
}
