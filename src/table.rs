//! Whole-table view of the MFT: parse every record, then resolve the
//! cross-record references (attribute-list chains, parent directories,
//! sizes recovered from directory indexes).

use crate::attribute::{
    Attribute, AttributeBody, AttributeListEntry, AttributeType, FILE_NAME_INDEX, IndexAllocation,
    IndexEntry,
};
use crate::disk::DiskReader;
use crate::error::{MftError, Result, Warning, WarningSink};
use crate::locator::{Geometry, Locator};
use crate::mft::{MFT_RECORD_SIZE, MFTRecord, Timestamps};
use log::{debug, info};
use rayon::prelude::*;
use std::collections::HashSet;
use std::ops::Range;

/// Root directory record number.
pub const ROOT_RECORD: u64 = 5;

/// Run configuration for building a [`Table`].
pub struct TableBuilder<'a> {
    sink: &'a dyn WarningSink,
    range: Option<Range<u64>>,
    parallel: bool,
    disk: Option<(&'a mut dyn DiskReader, Geometry)>,
}

impl<'a> TableBuilder<'a> {
    pub fn new(sink: &'a dyn WarningSink) -> Self {
        Self {
            sink,
            range: None,
            parallel: true,
            disk: None,
        }
    }

    /// Only parse records `range.start..range.end`. The range must fit in the
    /// buffer, otherwise `build` fails before parsing anything.
    pub fn range(mut self, range: Range<u64>) -> Self {
        self.range = Some(range);
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Disk used to read non-resident attribute lists and index allocations.
    pub fn disk(mut self, disk: &'a mut dyn DiskReader, geometry: Geometry) -> Self {
        self.disk = Some((disk, geometry));
        self
    }

    pub fn build(self, mft: &[u8]) -> Result<Table> {
        let total = (mft.len() / MFT_RECORD_SIZE) as u64;
        if mft.len() % MFT_RECORD_SIZE != 0 {
            debug!(
                "Ignoring {} trailing bytes after the last full record.",
                mft.len() % MFT_RECORD_SIZE
            );
        }
        let range = match self.range.clone() {
            Some(r) if r.start >= r.end || r.end > total => {
                return Err(MftError::Configuration(format!(
                    "entry range {}..{} is outside the {} records of the MFT",
                    r.start, r.end, total
                )));
            }
            Some(r) => r,
            None => 0..total,
        };

        let parse = |(i, chunk): (usize, &[u8])| {
            let id = i as u64;
            if range.contains(&id) {
                MFTRecord::from_bytes(chunk, id)
            } else {
                MFTRecord::from_bytes(&[], id)
            }
        };
        // Each worker only writes its own slot.
        let records: Vec<MFTRecord> = if self.parallel {
            mft.par_chunks_exact(MFT_RECORD_SIZE)
                .enumerate()
                .map(parse)
                .collect()
        } else {
            mft.chunks_exact(MFT_RECORD_SIZE)
                .enumerate()
                .map(parse)
                .collect()
        };

        for rec in &records {
            for w in &rec.warnings {
                self.sink.warn(w.clone());
            }
        }
        info!(
            "Parsed {} records ({} in use).",
            records.len(),
            records.iter().filter(|r| r.is_valid()).count()
        );

        let mut table = Table { records };
        if let Some((disk, geometry)) = self.disk {
            table.load_non_resident(disk, geometry, self.sink);
        }
        table.link_records(self.sink);
        table.build_tree(self.sink);
        table.backfill_sizes(self.sink);
        Ok(table)
    }
}

/// All records of the MFT, indexed by record number. Parent and linked
/// record references are indexes into this table.
#[derive(Debug, Clone, Default)]
pub struct Table {
    records: Vec<MFTRecord>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&MFTRecord> {
        usize::try_from(id).ok().and_then(|i| self.records.get(i))
    }

    pub fn records(&self) -> impl Iterator<Item = &MFTRecord> {
        self.records.iter()
    }

    /// Records carrying metadata (signature `FILE`).
    pub fn valid_records(&self) -> impl Iterator<Item = &MFTRecord> {
        self.records.iter().filter(|r| r.is_valid())
    }

    fn contains(&self, id: u64) -> bool {
        id < self.records.len() as u64
    }

    /// Read attribute lists and index allocations stored outside the MFT.
    fn load_non_resident(&mut self, disk: &mut dyn DiskReader, geometry: Geometry, sink: &dyn WarningSink) {
        let mut locator = Locator::new(disk, geometry, sink);
        for i in 0..self.records.len() {
            for j in 0..self.records[i].attributes.len() {
                let rec = &self.records[i];
                let attr = &rec.attributes[j];
                // the allocation shares its name with the $INDEX_ROOT it extends
                let root = rec.attributes.iter().find_map(|a| match &a.body {
                    AttributeBody::IndexRoot(r) if a.name() == attr.name() => Some(r),
                    _ => None,
                });
                let block_size = root.map(|r| r.index_block_size);
                let file_name_keys = attr.name() == Some(FILE_NAME_INDEX)
                    || root.is_some_and(|r| r.indexes_file_names());
                if !attr.is_non_resident()
                    || !matches!(
                        attr.attr_type(),
                        AttributeType::AttributeList | AttributeType::IndexAllocation
                    )
                {
                    continue;
                }
                let kind = attr.attr_type();
                let bytes = match locator.read_attribute(rec, attr) {
                    Ok(b) => b,
                    Err(e) => {
                        sink.warn(Warning::corruption(
                            rec.id,
                            format!("cannot read non-resident {}: {}", kind, e),
                        ));
                        continue;
                    }
                };

                let mut notes = Vec::new();
                let body = match kind {
                    AttributeType::AttributeList => AttributeBody::AttributeList(
                        AttributeListEntry::parse_all(&bytes, &mut notes),
                    ),
                    _ => AttributeBody::IndexAllocation(IndexAllocation::from_bytes(
                        &bytes,
                        block_size,
                        file_name_keys,
                        &mut notes,
                    )),
                };
                let id = rec.id;
                for n in notes {
                    sink.warn(Warning::corruption(id, n));
                }
                self.records[i].attributes[j].body = body;
            }
        }
    }

    /// Chain base records to the extension records named in their
    /// attribute lists: base -> first extension -> second extension ...
    /// A link, once set, is never overwritten; a conflicting one is reported.
    fn link_records(&mut self, sink: &dyn WarningSink) {
        let mut links = 0usize;
        for i in 0..self.records.len() {
            let id = i as u64;
            let mut targets: Vec<u64> = Vec::new();
            for attr in &self.records[i].attributes {
                if let AttributeBody::AttributeList(entries) = &attr.body {
                    for e in entries {
                        if e.record != id && !targets.contains(&e.record) {
                            targets.push(e.record);
                        }
                    }
                }
            }

            let mut prev = id;
            for t in targets {
                if !self.contains(t) {
                    sink.warn(Warning::DanglingReference {
                        record: id,
                        target: t,
                        message: "attribute list target outside the table".into(),
                    });
                    continue;
                }
                let slot = &mut self.records[prev as usize].linked_record;
                match *slot {
                    None => {
                        *slot = Some(t);
                        links += 1;
                    }
                    Some(existing) if existing != t => sink.warn(Warning::corruption(
                        prev,
                        format!(
                            "already linked to {}, link to {} from base {} dropped",
                            existing, t, id
                        ),
                    )),
                    Some(_) => {}
                }
                prev = t;
            }
        }
        debug!("Linked {} extension records.", links);
    }

    /// Set every record's parent from its preferred $FILE_NAME.
    fn build_tree(&mut self, sink: &dyn WarningSink) {
        let n = self.records.len() as u64;
        for rec in self.records.iter_mut() {
            let Some(parent) = rec.preferred_file_name().map(|f| f.parent_ref) else {
                continue;
            };
            if parent < n {
                rec.parent = Some(parent);
            } else {
                sink.warn(Warning::DanglingReference {
                    record: rec.id,
                    target: parent,
                    message: "parent directory outside the table".into(),
                });
            }
        }
    }

    /// Give every record referenced by a directory index the size stored in
    /// the index entry. Index allocation entries are applied after all index
    /// root entries, so they win.
    fn backfill_sizes(&mut self, sink: &dyn WarningSink) {
        let mut updates: Vec<(u64, u64, u64)> = Vec::new();
        let mut collect = |dir: u64, entries: &[IndexEntry]| {
            for e in entries {
                if let Some(f) = &e.file_name {
                    updates.push((dir, e.file_reference, f.real_size));
                }
            }
        };
        for rec in &self.records {
            for a in &rec.attributes {
                if let AttributeBody::IndexRoot(root) = &a.body {
                    collect(rec.id, &root.entries);
                }
            }
        }
        for rec in &self.records {
            for a in &rec.attributes {
                if let AttributeBody::IndexAllocation(alloc) = &a.body {
                    collect(rec.id, &alloc.entries);
                }
            }
        }

        for (dir, target, size) in updates {
            match usize::try_from(target).ok().and_then(|t| self.records.get_mut(t)) {
                Some(rec) => rec.derived_size = Some(size),
                None => sink.warn(Warning::DanglingReference {
                    record: dir,
                    target,
                    message: "index entry points outside the table".into(),
                }),
            }
        }
    }

    /// Every record contributing to `id`, in chain order, starting with `id`.
    /// Cycles are cut at the first repeated record.
    pub fn chain(&self, id: u64) -> Vec<u64> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            if !self.contains(c) || !seen.insert(c) {
                break;
            }
            out.push(c);
            cur = self.records[c as usize].linked_record;
        }
        out
    }

    /// Records whose $FILE_NAME (any namespace) equals `name`, ignoring case.
    pub fn find_by_name(&self, name: &str) -> Vec<&MFTRecord> {
        let wanted = name.to_lowercase();
        self.valid_records()
            .filter(|r| r.file_names().iter().any(|f| f.name.to_lowercase() == wanted))
            .collect()
    }

    /// Records whose preferred name ends with `.ext`, ignoring case.
    pub fn find_by_extension(&self, ext: &str) -> Vec<&MFTRecord> {
        let wanted = ext.trim_start_matches('.').to_lowercase();
        self.valid_records()
            .filter(|r| {
                r.preferred_file_name()
                    .and_then(|f| f.extension())
                    .is_some_and(|e| e == wanted)
            })
            .collect()
    }

    /// First attribute of `kind` across the record's chain.
    pub fn find_attribute(&self, id: u64, kind: AttributeType) -> Option<&Attribute> {
        self.chain(id)
            .into_iter()
            .filter_map(|c| self.get(c))
            .find_map(|r| r.find_attribute(kind))
    }

    pub fn has_attribute(&self, id: u64, kind: AttributeType) -> bool {
        self.find_attribute(id, kind).is_some()
    }

    /// Unnamed $DATA size, looked up across the chain, else the size
    /// recovered from a directory index.
    pub fn logical_size(&self, id: u64) -> Option<u64> {
        self.first_data_extent(id)
            .map(|a| a.content_size())
            .or_else(|| self.get(id).and_then(|r| r.derived_size))
    }

    pub fn physical_size(&self, id: u64) -> Option<u64> {
        self.first_data_extent(id)
            .map(|a| a.allocated_size())
            .or_else(|| self.get(id).and_then(|r| r.physical_size()))
    }

    fn first_data_extent(&self, id: u64) -> Option<&Attribute> {
        self.chain(id)
            .into_iter()
            .filter_map(|c| self.get(c))
            .flat_map(|r| r.data_attribute(None))
            .find(|a| a.non_resident().is_none_or(|nr| nr.start_vcn == 0))
    }

    pub fn timestamps(&self, id: u64) -> Option<Timestamps> {
        self.get(id).map(|r| r.timestamps())
    }

    /// Absolute path of `id`, built by walking parents up to the root.
    /// Returns `None` for records without a name.
    pub fn full_path(&self, id: u64) -> Option<String> {
        let rec = self.get(id)?;
        let name = rec.primary_name()?;
        if id == ROOT_RECORD || rec.parent == Some(id) {
            // the root directory is its own parent
            return Some("/".into());
        }

        let mut parts = vec![name.to_string()];
        let mut seen = HashSet::from([id]);
        let mut cur = rec.parent;
        while let Some(p) = cur {
            if !seen.insert(p) {
                debug!("Parent loop while building the path of record {}.", id);
                break;
            }
            let Some(parent) = self.get(p) else { break };
            if p == ROOT_RECORD || parent.parent == Some(p) {
                break;
            }
            match parent.primary_name() {
                Some(n) if !n.is_empty() => parts.push(n.to_string()),
                _ => {}
            }
            cur = parent.parent;
        }
        parts.reverse();
        Some(format!("/{}", parts.join("/")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{
        attribute_list::build_entry, build_resident, filename::build_file_name,
        index::{build_index_entry, build_index_root},
    };
    use crate::error::CollectSink;
    use crate::mft::{FLAG_DIRECTORY, FLAG_IN_USE, build_record};

    fn image(records: &[Vec<u8>]) -> Vec<u8> {
        records.concat()
    }

    fn named(parent: u64, name: &str, dir: bool) -> Vec<u8> {
        let flags = FLAG_IN_USE | if dir { FLAG_DIRECTORY } else { 0 };
        build_record(
            flags,
            &[
                build_resident(0x10, 0, None, &[0u8; 72]),
                build_resident(0x30, 1, None, &build_file_name(parent, name, 1, 0)),
            ],
        )
    }

    fn empty() -> Vec<u8> {
        vec![0u8; MFT_RECORD_SIZE]
    }

    #[test]
    fn range_outside_table_is_a_configuration_error() {
        let mft = image(&[empty(), empty()]);
        let sink = CollectSink::new();
        let err = TableBuilder::new(&sink).range(1..5).build(&mft).unwrap_err();
        assert!(matches!(err, MftError::Configuration(_)));
        let err = TableBuilder::new(&sink).range(1..1).build(&mft).unwrap_err();
        assert!(matches!(err, MftError::Configuration(_)));
    }

    #[test]
    fn range_keeps_indexes_aligned() {
        let mft = image(&[named(0, "a", false), named(0, "b", false), named(0, "c", false)]);
        let sink = CollectSink::new();
        let t = TableBuilder::new(&sink).range(1..2).build(&mft).unwrap();
        assert_eq!(t.len(), 3);
        assert!(!t.get(0).unwrap().is_valid());
        assert_eq!(t.get(1).unwrap().primary_name(), Some("b"));
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let mft = image(&[named(0, "x", true), named(0, "y.txt", false), empty()]);
        let sink = CollectSink::new();
        let a = TableBuilder::new(&sink).build(&mft).unwrap();
        let b = TableBuilder::new(&sink).parallel(false).build(&mft).unwrap();
        let names = |t: &Table| t.records().map(|r| r.primary_name().map(str::to_string)).collect::<Vec<_>>();
        assert_eq!(names(&a), names(&b));
    }

    #[test]
    fn chains_follow_attribute_lists_and_break_cycles() {
        let mut list = build_entry(0x10, 0, 0, None);
        list.extend(build_entry(0x80, 1, 0, None));
        list.extend(build_entry(0x80, 2, 0x40, None));
        list.extend(build_entry(0x80, 99, 0x80, None));
        let base = build_record(FLAG_IN_USE, &[build_resident(0x20, 0, None, &list)]);
        // record 2 points back at record 0
        let back = build_record(
            FLAG_IN_USE,
            &[build_resident(0x20, 0, None, &build_entry(0x80, 0, 0, None))],
        );
        let mft = image(&[base, build_record(FLAG_IN_USE, &[]), back]);
        let sink = CollectSink::new();
        let t = TableBuilder::new(&sink).build(&mft).unwrap();

        assert_eq!(t.get(0).unwrap().linked_record, Some(1));
        assert_eq!(t.get(1).unwrap().linked_record, Some(2));
        assert_eq!(t.get(2).unwrap().linked_record, Some(0));
        assert_eq!(t.chain(0), vec![0, 1, 2]);
        assert_eq!(t.chain(2), vec![2, 0, 1]);
        assert!(sink.warnings().iter().any(|w| matches!(
            w,
            Warning::DanglingReference { record: 0, target: 99, .. }
        )));
    }

    #[test]
    fn conflicting_link_is_reported_not_overwritten() {
        let list = |targets: &[u64]| {
            targets
                .iter()
                .flat_map(|t| build_entry(0x80, *t, 0, None))
                .collect::<Vec<u8>>()
        };
        // both bases claim record 2, each with a different successor
        let first = build_record(FLAG_IN_USE, &[build_resident(0x20, 0, None, &list(&[2, 3]))]);
        let second = build_record(FLAG_IN_USE, &[build_resident(0x20, 0, None, &list(&[2, 4]))]);
        let ext = || build_record(FLAG_IN_USE, &[]);
        let mft = image(&[first, second, ext(), ext(), ext()]);
        let sink = CollectSink::new();
        let t = TableBuilder::new(&sink).build(&mft).unwrap();

        assert_eq!(t.get(0).unwrap().linked_record, Some(2));
        assert_eq!(t.get(1).unwrap().linked_record, Some(2));
        assert_eq!(t.get(2).unwrap().linked_record, Some(3));
        assert_eq!(t.get(3).unwrap().linked_record, None);
        let warnings = sink.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            &warnings[0],
            Warning::StructuralCorruption { record: 2, message } if message.contains("from base 1")
        ));
    }

    #[test]
    fn tree_and_paths() {
        let mut recs: Vec<Vec<u8>> = (0..8).map(|_| empty()).collect();
        recs[5] = named(5, ".", true);
        recs[6] = named(5, "Users", true);
        recs[7] = named(6, "notes.TXT", false);
        let mut orphan = named(500, "lost.bin", false);
        orphan[0x10] = 2;
        recs.push(orphan);
        let sink = CollectSink::new();
        let t = TableBuilder::new(&sink).build(&image(&recs)).unwrap();

        assert_eq!(t.get(7).unwrap().parent, Some(6));
        assert_eq!(t.full_path(5).as_deref(), Some("/"));
        assert_eq!(t.full_path(6).as_deref(), Some("/Users"));
        assert_eq!(t.full_path(7).as_deref(), Some("/Users/notes.TXT"));
        assert_eq!(t.get(8).unwrap().parent, None);
        assert_eq!(t.full_path(8).as_deref(), Some("/lost.bin"));
        assert_eq!(t.full_path(0), None);
        assert!(sink.warnings().iter().any(|w| matches!(
            w,
            Warning::DanglingReference { record: 8, target: 500, .. }
        )));

        assert_eq!(t.find_by_name("NOTES.txt").len(), 1);
        assert_eq!(t.find_by_extension(".txt")[0].id, 7);
        assert!(t.find_by_extension("bin").iter().any(|r| r.id == 8));
    }

    #[test]
    fn parent_loop_terminates() {
        let mut recs: Vec<Vec<u8>> = (0..3).map(|_| empty()).collect();
        recs[1] = named(2, "a", true);
        recs[2] = named(1, "b", true);
        let sink = CollectSink::new();
        let t = TableBuilder::new(&sink).build(&image(&recs)).unwrap();
        assert_eq!(t.full_path(1).as_deref(), Some("/b/a"));
    }

    #[test]
    fn sizes_recovered_from_index_root() {
        let deleted_fn = build_file_name(5, "gone.doc", 1, 4321);
        let live_fn = build_file_name(5, "kept.txt", 1, 11);
        let root = build_index_root(&[
            build_index_entry(6, Some(&deleted_fn), false),
            build_index_entry(7, Some(&live_fn), false),
            build_index_entry(4000, Some(&live_fn), false),
        ]);
        let mut recs: Vec<Vec<u8>> = (0..8).map(|_| empty()).collect();
        recs[5] = build_record(
            FLAG_IN_USE | FLAG_DIRECTORY,
            &[
                build_resident(0x30, 1, None, &build_file_name(5, ".", 3, 0)),
                build_resident(0x90, 2, Some("$I30"), &root),
            ],
        );
        // deleted file: record no longer in use, no $DATA
        recs[6] = build_record(
            0,
            &[build_resident(0x30, 1, None, &build_file_name(5, "gone.doc", 1, 0))],
        );
        recs[7] = build_record(
            FLAG_IN_USE,
            &[
                build_resident(0x30, 1, None, &build_file_name(5, "kept.txt", 1, 0)),
                build_resident(0x80, 2, None, b"0123456789abc"),
            ],
        );
        let sink = CollectSink::new();
        let t = TableBuilder::new(&sink).build(&image(&recs)).unwrap();
        assert_eq!(t.logical_size(6), Some(4321));
        assert_eq!(t.get(6).unwrap().derived_size, Some(4321));
        // an explicit $DATA wins over the index
        assert_eq!(t.logical_size(7), Some(13));
        assert!(sink.warnings().iter().any(|w| matches!(
            w,
            Warning::DanglingReference { record: 5, target: 4000, .. }
        )));
    }

    #[test]
    fn index_allocation_overrides_index_root() {
        let small = build_file_name(5, "f", 1, 10);
        let big = build_file_name(5, "f", 1, 20);
        let root = build_index_root(&[build_index_entry(6, Some(&small), false)]);
        let alloc = crate::attribute::index::build_node(&[build_index_entry(6, Some(&big), false)]);
        let mut recs: Vec<Vec<u8>> = (0..7).map(|_| empty()).collect();
        // allocation on a lower record number than the root must still win
        recs[4] = build_record(
            FLAG_IN_USE | FLAG_DIRECTORY,
            &[build_resident(0xA0, 1, Some("$I30"), &alloc)],
        );
        recs[5] = build_record(
            FLAG_IN_USE | FLAG_DIRECTORY,
            &[build_resident(0x90, 1, Some("$I30"), &root)],
        );
        let sink = CollectSink::new();
        let t = TableBuilder::new(&sink).build(&image(&recs)).unwrap();
        assert_eq!(t.logical_size(6), Some(20));
    }
}
