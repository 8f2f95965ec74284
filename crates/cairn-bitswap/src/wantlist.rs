use std::collections::HashMap;
use std::sync::Mutex;

use cairn_types::Cid;

/// One wantlist entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entry {
    pub cid: Cid,
    pub priority: i32,
    seq: u64,
}

/// The local node's ordered declaration of CIDs it seeks.
///
/// Thread-safe; iteration works on a snapshot, so removal during iteration
/// is permitted. Entries sort by priority descending, then insertion order
/// ascending, so priority ties resolve deterministically.
pub struct Wantlist {
    inner: Mutex<Inner>,
}

struct Inner {
    entries: HashMap<Cid, Entry>,
    next_seq: u64,
}

impl Wantlist {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Add a want. Re-adding an existing CID updates its priority but keeps
    /// its insertion position.
    pub fn add(&self, cid: Cid, priority: i32) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let seq = inner.next_seq;
        match inner.entries.get_mut(&cid) {
            Some(entry) => entry.priority = priority,
            None => {
                inner.entries.insert(
                    cid,
                    Entry {
                        cid,
                        priority,
                        seq,
                    },
                );
                inner.next_seq += 1;
            }
        }
    }

    /// Remove a want; returns whether it was present.
    pub fn remove(&self, cid: &Cid) -> bool {
        self.inner
            .lock()
            .expect("lock poisoned")
            .entries
            .remove(cid)
            .is_some()
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.inner
            .lock()
            .expect("lock poisoned")
            .entries
            .contains_key(cid)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all entries, priority descending then insertion ascending.
    pub fn entries(&self) -> Vec<Entry> {
        let inner = self.inner.lock().expect("lock poisoned");
        let mut entries: Vec<Entry> = inner.entries.values().copied().collect();
        entries.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        entries
    }

    /// The highest-ranked want, if any.
    pub fn first(&self) -> Option<Cid> {
        self.entries().first().map(|e| e.cid)
    }
}

impl Default for Wantlist {
    fn default() -> Self {
        Self::new()
    }
}
