//! C6: FileIndex. The tracker's authoritative map of every known file to
//! its current `FileInfo` and the set of peers known to hold exactly that
//! version. Backed by a `BTreeMap` keyed by filepath so iteration is
//! always filepath-lexicographic, which the directory-prefix recursive
//! delete depends on (spec §4.3, §9's linked-list-vs-map note).

use std::collections::{BTreeMap, HashSet};

use crate::event::{FileAction, FileEvent};
use crate::fileinfo::{is_hidden_path, FileInfo, PeerEndpoint};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum IndexError {
    #[error("no index entry for {0:?}")]
    NotFound(String),
}

/// One key-value pair in the index: a file and the peers known to hold it.
///
/// Invariant (not enforced by the type, maintained by `FileIndex`): the
/// peer set is non-empty at every moment an entry is broadcast. It may be
/// transiently empty between a `remove_peer_everywhere` and any reseat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub file: FileInfo,
    pub peers: HashSet<PeerEndpoint>,
}

impl IndexEntry {
    fn new(file: FileInfo, reporter: PeerEndpoint) -> Self {
        let mut peers = HashSet::new();
        peers.insert(reporter);
        Self { file, peers }
    }
}

/// The tracker's merged view of every peer's directory.
#[derive(Debug, Default)]
pub struct FileIndex {
    entries: BTreeMap<String, IndexEntry>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, filepath: &str) -> Option<&IndexEntry> {
        self.entries.get(filepath)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Full-table iteration in filepath-lexicographic order, for
    /// broadcasting a TABLE_UPDATE.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndexEntry)> {
        self.entries.iter()
    }

    /// Resets the table to empty. Used by the sweeper when the peer table
    /// drains to zero (spec §4.4).
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Inserts `file` reported by `reporter`. Hidden paths are a silent
    /// no-op. An existing entry for the same filepath is routed through
    /// `update_modified` rather than overwritten wholesale.
    pub fn insert(&mut self, mut file: FileInfo, reporter: PeerEndpoint) {
        if is_hidden_path(file.filepath()) {
            return;
        }
        if file.is_dir() && file.size() != 0 {
            file = FileInfo::new(file.filepath(), 0, file.last_modified(), true);
        }
        if self.entries.contains_key(file.filepath()) {
            // update_modified cannot fail here: we just checked presence.
            let _ = self.update_modified(file, reporter);
            return;
        }
        let key = file.filepath().to_string();
        self.entries.insert(key, IndexEntry::new(file, reporter));
    }

    /// Removes the entry for `filepath`. If it names a directory, every
    /// entry whose filepath is a (raw, not path-component-aligned) string
    /// prefix of `filepath` is removed first, so the directory vanishes
    /// along with its contents in one call (spec §4.3, scenario
    /// "Directory recursion"). Spec.md §4.3 states the rule unqualified —
    /// "Prefix is a string prefix of the stored relative path" — and
    /// `original_source/filetable/filetable.c`'s `strncmp(dirname, ...,
    /// dirlen)` matches the same way: deleting `"d"` also removes a
    /// sibling entry named `"dd"`. That's preserved here rather than
    /// tightened to a component boundary.
    pub fn remove(&mut self, filepath: &str) -> Result<(), IndexError> {
        let is_dir = self
            .entries
            .get(filepath)
            .ok_or_else(|| IndexError::NotFound(filepath.to_string()))?
            .file
            .is_dir();

        if is_dir {
            let children: Vec<String> = self
                .entries
                .keys()
                .filter(|k| k.len() > filepath.len() && k.starts_with(filepath))
                .cloned()
                .collect();
            for child in children {
                self.entries.remove(&child);
            }
        }

        self.entries.remove(filepath);
        Ok(())
    }

    /// Overwrites `last_modified`/`size`, discards the existing peer set,
    /// and reseats it to `{reporter}` — the single-writer/newest-wins rule.
    pub fn update_modified(&mut self, file: FileInfo, reporter: PeerEndpoint) -> Result<(), IndexError> {
        let entry = self
            .entries
            .get_mut(file.filepath())
            .ok_or_else(|| IndexError::NotFound(file.filepath().to_string()))?;
        entry.file = file;
        entry.peers.clear();
        entry.peers.insert(reporter);
        Ok(())
    }

    /// Adds `endpoint` as a holder of `filepath`, provided its reported
    /// size matches the entry's current size. A size mismatch is a silent
    /// no-op in terms of index state (spec §9 "size-mismatch silent drop"
    /// open question), but it's logged here — the one place a slow
    /// writer's DOWNLOAD_COMPLETE is quietly dropped, and the spec's own
    /// resolution of that open question asks for it to be observable.
    pub fn add_peer(&mut self, filepath: &str, endpoint: PeerEndpoint, reported_size: u64) -> Result<(), IndexError> {
        let entry = self
            .entries
            .get_mut(filepath)
            .ok_or_else(|| IndexError::NotFound(filepath.to_string()))?;
        if entry.file.size() != reported_size {
            tracing::debug!(
                %filepath,
                %endpoint,
                reported_size,
                expected_size = entry.file.size(),
                "dropping add_peer: reported size does not match the indexed size"
            );
            return Ok(());
        }
        entry.peers.insert(endpoint);
        Ok(())
    }

    /// Strips `endpoint` from every entry's peer set. Entries that become
    /// empty stay in the table; they are still known to exist.
    pub fn remove_peer_everywhere(&mut self, endpoint: PeerEndpoint) {
        for entry in self.entries.values_mut() {
            entry.peers.remove(&endpoint);
        }
    }

    /// Computes the events that would bring this index up to date with a
    /// peer's reported file list, without mutating anything.
    pub fn diff(&self, files: &[FileInfo]) -> Vec<FileEvent> {
        files
            .iter()
            .filter_map(|file| match self.entries.get(file.filepath()) {
                None => Some(FileEvent::created(file.clone())),
                Some(entry) if entry.file.last_modified() < file.last_modified() => {
                    Some(FileEvent::modified(file.clone()))
                }
                Some(entry) if entry.file.last_modified() == file.last_modified() => {
                    Some(FileEvent::download_complete(file.clone()))
                }
                Some(_) => None,
            })
            .collect()
    }

    /// Computes `diff(files)` and applies each resulting event with
    /// `reporter` as originator. Returns the events actually applied.
    pub fn merge(&mut self, files: &[FileInfo], reporter: PeerEndpoint) -> Vec<FileEvent> {
        let events = self.diff(files);
        for event in &events {
            // Events from diff() always reference an index state consistent
            // with their own branch, so application cannot fail here.
            let _ = self.apply_event(event, reporter);
        }
        events
    }

    /// Applies one already-decided `FileEvent` against the index, using
    /// `reporter` as originator. This is the entry point FILE_UPDATE
    /// dispatch uses directly (spec §4.4), bypassing `diff`.
    pub fn apply_event(&mut self, event: &FileEvent, reporter: PeerEndpoint) -> Result<(), IndexError> {
        match event.action {
            FileAction::Created => {
                self.insert(event.file.clone(), reporter);
                Ok(())
            }
            FileAction::Modified => self.update_modified(event.file.clone(), reporter),
            FileAction::Deleted => self.remove(event.file.filepath()),
            FileAction::DownloadComplete => {
                self.add_peer(event.file.filepath(), reporter, event.file.size())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> PeerEndpoint {
        PeerEndpoint::new("10.0.0.1", port)
    }

    fn file(path: &str, size: u64, mtime: i64) -> FileInfo {
        FileInfo::new(path, size, mtime, false)
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let mut idx = FileIndex::new();
        idx.insert(file("a.txt", 10, 100), peer(1));
        let e = idx.get("a.txt").unwrap();
        assert_eq!(e.file.size(), 10);
        assert!(e.peers.contains(&peer(1)));
    }

    #[test]
    fn insert_of_hidden_path_is_a_noop() {
        let mut idx = FileIndex::new();
        idx.insert(file(".git/HEAD", 1, 1), peer(1));
        assert!(idx.is_empty());
    }

    #[test]
    fn insert_routes_existing_filepath_through_update_modified() {
        let mut idx = FileIndex::new();
        idx.insert(file("a.txt", 10, 100), peer(1));
        idx.insert(file("a.txt", 20, 200), peer(2));
        let e = idx.get("a.txt").unwrap();
        assert_eq!(e.file.size(), 20);
        assert_eq!(e.peers, HashSet::from([peer(2)]));
    }

    #[test]
    fn update_modified_reseats_peer_set_to_reporter_only() {
        let mut idx = FileIndex::new();
        idx.insert(file("a.txt", 10, 100), peer(1));
        idx.add_peer("a.txt", peer(2), 10).unwrap();
        assert_eq!(idx.get("a.txt").unwrap().peers.len(), 2);

        idx.update_modified(file("a.txt", 20, 200), peer(2)).unwrap();
        let e = idx.get("a.txt").unwrap();
        assert_eq!(e.peers, HashSet::from([peer(2)]));
        assert_eq!(e.file.size(), 20);
    }

    #[test]
    fn update_modified_on_missing_entry_fails() {
        let mut idx = FileIndex::new();
        assert_eq!(
            idx.update_modified(file("a.txt", 1, 1), peer(1)),
            Err(IndexError::NotFound("a.txt".into()))
        );
    }

    #[test]
    fn add_peer_ignores_size_mismatch() {
        let mut idx = FileIndex::new();
        idx.insert(file("a.txt", 10, 100), peer(1));
        idx.add_peer("a.txt", peer(2), 999).unwrap();
        assert!(!idx.get("a.txt").unwrap().peers.contains(&peer(2)));
    }

    #[test]
    fn add_peer_is_idempotent() {
        let mut idx = FileIndex::new();
        idx.insert(file("a.txt", 10, 100), peer(1));
        idx.add_peer("a.txt", peer(1), 10).unwrap();
        assert_eq!(idx.get("a.txt").unwrap().peers.len(), 1);
    }

    #[test]
    fn remove_peer_everywhere_can_empty_a_peer_set_but_keeps_the_entry() {
        let mut idx = FileIndex::new();
        idx.insert(file("a.txt", 10, 100), peer(1));
        idx.remove_peer_everywhere(peer(1));
        assert!(idx.get("a.txt").unwrap().peers.is_empty());
    }

    #[test]
    fn directory_removal_recursively_drops_path_prefix_children() {
        let mut idx = FileIndex::new();
        idx.insert(FileInfo::new("d", 0, 1, true), peer(1));
        idx.insert(file("d/x", 1, 1), peer(1));
        idx.insert(file("d/y", 2, 1), peer(1));
        idx.insert(file("other", 3, 1), peer(1));

        idx.remove("d").unwrap();

        assert!(idx.get("d").is_none());
        assert!(idx.get("d/x").is_none());
        assert!(idx.get("d/y").is_none());
        assert!(idx.get("other").is_some());
    }

    #[test]
    fn directory_removal_is_a_raw_string_prefix_not_component_aligned() {
        // spec.md §4.3's recursive delete is "a string prefix of the stored
        // relative path," unqualified, matching
        // `original_source/filetable/filetable.c`'s `strncmp`-based child
        // scan: deleting "d" also removes a sibling entry named "dd",
        // which a path-component-aligned prefix check would have spared.
        let mut idx = FileIndex::new();
        idx.insert(FileInfo::new("d", 0, 1, true), peer(1));
        idx.insert(file("dd", 1, 1), peer(1));
        idx.insert(file("dd/x", 1, 1), peer(1));

        idx.remove("d").unwrap();

        assert!(idx.get("d").is_none());
        assert!(idx.get("dd").is_none());
        assert!(idx.get("dd/x").is_none());
    }

    #[test]
    fn remove_of_missing_entry_fails() {
        let mut idx = FileIndex::new();
        assert!(idx.remove("nope").is_err());
    }

    #[test]
    fn diff_classifies_absent_newer_equal_and_stale() {
        let mut idx = FileIndex::new();
        idx.insert(file("equal.txt", 10, 100), peer(1));
        idx.insert(file("stale.txt", 10, 200), peer(1));

        let reported = vec![
            file("new.txt", 5, 50),
            file("equal.txt", 10, 100),
            file("stale.txt", 10, 50),
        ];
        let events = idx.diff(&reported);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, FileAction::Created);
        assert_eq!(events[0].file.filepath(), "new.txt");
        assert_eq!(events[1].action, FileAction::DownloadComplete);
        assert_eq!(events[1].file.filepath(), "equal.txt");
    }

    #[test]
    fn merge_create_and_converge_scenario() {
        // Spec §8 "Create-and-converge": P2 registers a.txt, tracker index
        // gains the entry with P2 as sole peer.
        let mut idx = FileIndex::new();
        let p2 = peer(2);
        let events = idx.merge(&[file("a.txt", 10, 100)], p2);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, FileAction::Created);

        let e = idx.get("a.txt").unwrap();
        assert_eq!(e.file.size(), 10);
        assert_eq!(e.file.last_modified(), 100);
        assert_eq!(e.peers, HashSet::from([p2]));
    }

    #[test]
    fn apply_event_modify_overwrites_peers_scenario() {
        // Spec §8 "Modify-overwrites-peers".
        let mut idx = FileIndex::new();
        let (p1, p2) = (peer(1), peer(2));
        idx.insert(file("a.txt", 10, 100), p2);
        idx.add_peer("a.txt", p1, 10).unwrap();

        idx.apply_event(&FileEvent::modified(file("a.txt", 20, 200)), p2)
            .unwrap();

        let e = idx.get("a.txt").unwrap();
        assert_eq!(e.file.size(), 20);
        assert_eq!(e.file.last_modified(), 200);
        assert_eq!(e.peers, HashSet::from([p2]));
    }

    #[test]
    fn apply_event_delete_propagation_scenario() {
        let mut idx = FileIndex::new();
        let p2 = peer(2);
        idx.insert(file("a.txt", 10, 100), p2);
        idx.apply_event(&FileEvent::deleted(FileInfo::now_deleted("a.txt")), p2)
            .unwrap();
        assert!(idx.get("a.txt").is_none());
    }
}
