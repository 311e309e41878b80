// S-57 Record Index
// Lazily sorted key -> record cache with a per-entry client payload

use crate::iso8211::Record;

/// One indexed record and its optional client payload
#[derive(Debug, Clone)]
pub struct IndexedRecord<C> {
    pub key: i32,
    pub record: Record,
    pub client: Option<C>,
}

/// Records keyed by record id (RCID).
///
/// Insertion marks the index unsorted; keyed and positional access sort it
/// first. Duplicate keys are allowed and lookups return the first match in
/// sorted order. Records are owned by the index and released together by
/// `clear()` or on drop.
#[derive(Debug, Clone)]
pub struct RecordIndex<C = ()> {
    entries: Vec<IndexedRecord<C>>,
    sorted: bool,
    // Resume point for runs of same-class lookups
    last_objl: Option<i32>,
    last_objl_pos: usize,
}

impl<C> Default for RecordIndex<C> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            sorted: true,
            last_objl: None,
            last_objl_pos: 0,
        }
    }
}

impl<C> RecordIndex<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Add a record, taking ownership of it
    pub fn add_record(&mut self, key: i32, record: Record) {
        self.entries.push(IndexedRecord {
            key,
            record,
            client: None,
        });
        self.sorted = false;
    }

    /// Sort by key if anything was added since the last sort
    pub fn sort(&mut self) {
        if !self.sorted {
            self.entries.sort_by_key(|e| e.key);
            self.sorted = true;
        }
    }

    fn position(&self, key: i32) -> Option<usize> {
        let pos = self.entries.partition_point(|e| e.key < key);
        match self.entries.get(pos) {
            Some(entry) if entry.key == key => Some(pos),
            _ => None,
        }
    }

    pub fn find_record(&mut self, key: i32) -> Option<&Record> {
        self.sort();
        let pos = self.position(key)?;
        Some(&self.entries[pos].record)
    }

    pub fn find_record_mut(&mut self, key: i32) -> Option<&mut Record> {
        self.sort();
        let pos = self.position(key)?;
        Some(&mut self.entries[pos].record)
    }

    /// Lookup without sorting: binary search once sorted, linear scan before that
    pub fn get(&self, key: i32) -> Option<&Record> {
        if self.sorted {
            self.position(key).map(|pos| &self.entries[pos].record)
        } else {
            self.entries.iter().find(|e| e.key == key).map(|e| &e.record)
        }
    }

    /// Remove and drop the record with `key`, false if there is none
    pub fn remove_record(&mut self, key: i32) -> bool {
        self.sort();
        match self.position(key) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Position of the next record whose FRID.OBJL equals `objl`.
    ///
    /// Consecutive calls with the same class resume after the previous
    /// match; a different class restarts from the beginning.
    pub fn find_record_by_objl_position(&mut self, objl: i32) -> Option<usize> {
        self.sort();
        if self.last_objl != Some(objl) {
            self.last_objl_pos = 0;
        }

        for i in self.last_objl_pos..self.entries.len() {
            let record_objl = self.entries[i].record.int_subfield("FRID", 0, "OBJL", 0);
            if record_objl == Some(objl as i64) {
                self.last_objl_pos = i + 1;
                self.last_objl = Some(objl);
                return Some(i);
            }
        }

        self.last_objl_pos = 0;
        self.last_objl = None;
        None
    }

    pub fn find_record_by_objl(&mut self, objl: i32) -> Option<&Record> {
        let pos = self.find_record_by_objl_position(objl)?;
        Some(&self.entries[pos].record)
    }

    pub fn get_by_index(&mut self, index: usize) -> Option<&Record> {
        self.sort();
        self.entries.get(index).map(|e| &e.record)
    }

    pub fn client_info_by_index(&mut self, index: usize) -> Option<&C> {
        self.sort();
        self.entries.get(index).and_then(|e| e.client.as_ref())
    }

    pub fn set_client_info_by_index(&mut self, index: usize, client: C) -> bool {
        self.sort();
        match self.entries.get_mut(index) {
            Some(entry) => {
                entry.client = Some(client);
                true
            }
            None => false,
        }
    }

    /// Drop every cached client payload
    pub fn clear_client_info(&mut self) {
        for entry in &mut self.entries {
            entry.client = None;
        }
    }

    /// All entries in storage order
    pub fn entries(&self) -> &[IndexedRecord<C>] {
        &self.entries
    }

    /// Release every record
    pub fn clear(&mut self) {
        self.entries.clear();
        self.sorted = true;
        self.last_objl = None;
        self.last_objl_pos = 0;
    }
}
