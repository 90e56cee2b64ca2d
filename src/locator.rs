//! Fetch the content of non-resident attributes by walking their run-lists
//! against a [`DiskReader`].

use crate::attribute::{Attribute, AttributeBody, AttributeType, Residency};
use crate::disk::DiskReader;
use crate::error::{MftError, Result, Warning, WarningSink};
use crate::mft::MFTRecord;
use crate::table::Table;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::sync_channel;

/// Largest single read issued to the disk.
const MAX_READ: u64 = 1 << 20;

/// Where the volume lives and how big its clusters are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub partition_offset: u64,
    pub sectors_per_cluster: u64,
    pub bytes_per_sector: u64,
}

impl Geometry {
    pub fn new(partition_offset: u64, sectors_per_cluster: u64, bytes_per_sector: u64) -> Self {
        Self {
            partition_offset,
            sectors_per_cluster,
            bytes_per_sector,
        }
    }

    pub fn cluster_size(&self) -> u64 {
        self.sectors_per_cluster.saturating_mul(self.bytes_per_sector)
    }

    /// Absolute byte offset of a cluster, `None` on overflow.
    pub fn cluster_offset(&self, lcn: u64) -> Option<u64> {
        lcn.checked_mul(self.cluster_size())?
            .checked_add(self.partition_offset)
    }
}

/// Which attribute of a record to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selector<'s> {
    pub kind: AttributeType,
    pub stream: Option<&'s str>,
}

impl Selector<'static> {
    /// The unnamed $DATA stream.
    pub const DATA: Selector<'static> = Selector {
        kind: AttributeType::Data,
        stream: None,
    };
}

impl<'s> Selector<'s> {
    pub fn stream(name: &'s str) -> Self {
        Selector {
            kind: AttributeType::Data,
            stream: Some(name),
        }
    }

    fn matches(&self, attr: &Attribute) -> bool {
        attr.attr_type() == self.kind && attr.name() == self.stream
    }
}

pub struct Locator<'a, D: DiskReader + ?Sized> {
    disk: &'a mut D,
    geometry: Geometry,
    sink: &'a dyn WarningSink,
}

impl<'a, D: DiskReader + ?Sized> Locator<'a, D> {
    pub fn new(disk: &'a mut D, geometry: Geometry, sink: &'a dyn WarningSink) -> Self {
        Self {
            disk,
            geometry,
            sink,
        }
    }

    /// Content of the selected attribute of `id`, following its linked
    /// record chain, truncated to the logical length.
    pub fn locate(&mut self, table: &Table, id: u64, selector: Selector<'_>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.for_each_chunk(table, id, selector, |chunk| out.extend_from_slice(chunk))?;
        Ok(out)
    }

    /// Same as [`Locator::locate`] but hands the bytes over chunk by chunk.
    /// Returns the number of bytes produced.
    pub fn for_each_chunk<F>(
        &mut self,
        table: &Table,
        id: u64,
        selector: Selector<'_>,
        mut f: F,
    ) -> Result<u64>
    where
        F: FnMut(&[u8]),
    {
        table.get(id).ok_or(MftError::RecordOutOfRange(id))?;

        let pieces: Vec<(&MFTRecord, &Attribute)> = table
            .chain(id)
            .into_iter()
            .filter_map(|r| table.get(r))
            .flat_map(move |rec| {
                rec.attributes
                    .iter()
                    .filter(move |a| selector.matches(a))
                    .map(move |a| (rec, a))
            })
            .collect();
        if pieces.is_empty() {
            return Err(MftError::MissingAttribute {
                record: id,
                what: selector.kind.name().to_string(),
            });
        }

        // Only the first extent of a stream carries meaningful sizes.
        let logical = pieces.iter().find_map(|(_, a)| match &a.residency {
            Residency::Resident(r) => Some(r.value_length as u64),
            Residency::NonResident(nr) if nr.start_vcn == 0 => Some(nr.actual_length),
            Residency::NonResident(_) => None,
        });

        let mut remaining = logical.unwrap_or(u64::MAX);
        let mut produced = 0u64;
        for (rec, attr) in pieces {
            if remaining == 0 {
                break;
            }
            let n = self.walk(rec.id, attr, remaining, &mut f)?;
            remaining = remaining.saturating_sub(n);
            produced += n;
        }
        Ok(produced)
    }

    /// Content of one attribute of one record (no chain), truncated to its
    /// own logical length.
    pub fn read_attribute(&mut self, record: &MFTRecord, attr: &Attribute) -> Result<Vec<u8>> {
        let limit = attr.content_size();
        let mut out = Vec::new();
        self.walk(record.id, attr, limit, &mut |chunk: &[u8]| out.extend_from_slice(chunk))?;
        Ok(out)
    }

    fn walk<F>(&mut self, record: u64, attr: &Attribute, limit: u64, f: &mut F) -> Result<u64>
    where
        F: FnMut(&[u8]),
    {
        let nr = match &attr.residency {
            Residency::Resident(_) => {
                let bytes = match &attr.body {
                    AttributeBody::Data(b) | AttributeBody::Raw(b) => b.as_slice(),
                    AttributeBody::Bitmap(bm) => bm.bytes.as_slice(),
                    _ => {
                        return Err(MftError::MissingAttribute {
                            record,
                            what: format!("resident {} content", attr.type_name()),
                        });
                    }
                };
                let n = (bytes.len() as u64).min(limit) as usize;
                f(&bytes[..n]);
                return Ok(n as u64);
            }
            Residency::NonResident(nr) => nr,
        };

        let cluster_size = self.geometry.cluster_size();
        let disk_size = self.disk.disk_size();
        let mut remaining = limit;
        let mut produced = 0u64;

        for run in nr.run_list.iter() {
            if remaining == 0 {
                break;
            }
            let run_bytes = run.length.saturating_mul(cluster_size).min(remaining);

            let Some(lcn) = run.lcn else {
                // sparse: zeros, emitted in bounded pieces
                let mut left = run_bytes;
                while left > 0 {
                    let n = left.min(MAX_READ);
                    f(&vec![0u8; n as usize]);
                    left -= n;
                }
                remaining -= run_bytes;
                produced += run_bytes;
                continue;
            };

            let Some(start) = self.geometry.cluster_offset(lcn) else {
                self.sink.warn(Warning::IoOutOfRange {
                    record,
                    offset: u64::MAX,
                    message: format!("cluster {} overflows the address space", lcn),
                });
                break;
            };
            if start >= disk_size {
                self.sink.warn(Warning::IoOutOfRange {
                    record,
                    offset: start,
                    message: format!("cluster {} starts past the disk end 0x{:X}", lcn, disk_size),
                });
                break;
            }
            let in_range = run_bytes.min(disk_size - start);

            let mut done = 0u64;
            while done < in_range {
                let n = (in_range - done).min(MAX_READ);
                let buf = self.disk.read_at(start + done, n as usize)?;
                if buf.is_empty() {
                    break;
                }
                f(&buf);
                done += buf.len() as u64;
            }
            remaining -= done;
            produced += done;

            if done < run_bytes {
                self.sink.warn(Warning::IoOutOfRange {
                    record,
                    offset: start + done,
                    message: format!(
                        "run of {} bytes cut to {} at the disk end",
                        run_bytes, done
                    ),
                });
                break;
            }
        }
        debug!(
            "Record {}: {} bytes read from {} runs of {}",
            record,
            produced,
            nr.run_list.len(),
            attr.type_name()
        );
        Ok(produced)
    }
}

/// Messages produced by [`stream_contents`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentChunk {
    Data { record: u64, bytes: Vec<u8> },
    Done { record: u64, size: u64 },
    Failed { record: u64, error: String },
}

/// Read the selected stream of many records. A producer thread issues the
/// disk reads and pushes chunks into a bounded channel of `capacity`
/// messages; `consumer` runs on the calling thread. A failing record is
/// reported with [`ContentChunk::Failed`] and the next one is processed.
pub fn stream_contents<D, C>(
    disk: &mut D,
    geometry: Geometry,
    table: &Table,
    records: &[u64],
    selector: Selector<'_>,
    capacity: usize,
    sink: &dyn WarningSink,
    mut consumer: C,
) where
    D: DiskReader + Send + ?Sized,
    C: FnMut(ContentChunk),
{
    let (tx, rx) = sync_channel::<ContentChunk>(capacity.max(1));

    std::thread::scope(|s| {
        let _producer = s.spawn(move || {
            let mut locator = Locator::new(disk, geometry, sink);
            for &record in records {
                let res = locator.for_each_chunk(table, record, selector, |chunk| {
                    // a closed channel means the consumer is gone
                    let _ = tx.send(ContentChunk::Data {
                        record,
                        bytes: chunk.to_vec(),
                    });
                });
                let msg = match res {
                    Ok(size) => ContentChunk::Done { record, size },
                    Err(e) => ContentChunk::Failed {
                        record,
                        error: e.to_string(),
                    },
                };
                if tx.send(msg).is_err() {
                    break;
                }
            }
            // dropping tx closes the channel
        });

        for msg in rx {
            consumer(msg);
        }
    });
}
