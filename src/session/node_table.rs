//! Bounded table of remote nodes, keyed by address.
//!
//! Fixed capacity with linear scan; at the table's size a scan beats a hash
//! map and keeps the eviction semantics exact. Entries are created on first
//! observation and go offline only through the timeout sweep. When the
//! table is full a new node replaces the stalest offline entry, or is
//! dropped if every slot is online.

use std::sync::Arc;

use crate::hal::Clock;
use crate::types::NodeInfo;

#[derive(Debug, Clone, Copy)]
struct NodeEntry {
    addr: u16,
    last_seen_ms: u64,
    rssi: i8,
    online: bool,
    object_count: u8,
}

impl NodeEntry {
    fn info(&self) -> NodeInfo {
        NodeInfo {
            addr: self.addr,
            last_seen_ms: self.last_seen_ms,
            rssi: self.rssi,
            online: self.online,
            object_count: self.object_count,
        }
    }
}

pub struct NodeTable {
    entries: Vec<NodeEntry>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl NodeTable {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            clock,
        }
    }

    /// Record a reception from `addr` at the current time.
    ///
    /// Returns `true` when the node is newly seen or transitions back
    /// online, which is the signal to fire the node-status upcall.
    pub fn touch(&mut self, addr: u16, rssi: i8) -> bool {
        let now = self.clock.now_ms();

        if let Some(entry) = self.entries.iter_mut().find(|e| e.addr == addr) {
            entry.last_seen_ms = now;
            entry.rssi = rssi;
            if !entry.online {
                entry.online = true;
                return true;
            }
            return false;
        }

        let entry = NodeEntry {
            addr,
            last_seen_ms: now,
            rssi,
            online: true,
            object_count: 0,
        };

        if self.entries.len() < self.capacity {
            self.entries.push(entry);
            return true;
        }

        // Full: reuse the stalest offline slot, or drop the newcomer.
        let victim = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.online)
            .min_by_key(|(_, e)| e.last_seen_ms)
            .map(|(i, _)| i);

        match victim {
            Some(i) => {
                self.entries[i] = entry;
                true
            }
            None => false,
        }
    }

    /// Sweep online entries, flipping any whose last reception is older
    /// than `timeout_ms` to offline. The callback fires exactly once per
    /// transition, with `online = false`.
    pub fn check_timeouts(&mut self, timeout_ms: u64, mut on_offline: impl FnMut(u16, bool)) {
        let now = self.clock.now_ms();
        for entry in &mut self.entries {
            if entry.online && now.saturating_sub(entry.last_seen_ms) > timeout_ms {
                entry.online = false;
                on_offline(entry.addr, false);
            }
        }
    }

    /// Record how many objects `addr` carried in its last report.
    pub fn set_object_count(&mut self, addr: u16, count: u8) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.addr == addr) {
            entry.object_count = count;
        }
    }

    pub fn get(&self, addr: u16) -> Option<NodeInfo> {
        self.entries.iter().find(|e| e.addr == addr).map(NodeEntry::info)
    }

    pub fn is_online(&self, addr: u16) -> bool {
        self.entries.iter().any(|e| e.addr == addr && e.online)
    }

    /// Snapshot of all entries in observation order.
    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.entries.iter().map(NodeEntry::info).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn online_count(&self) -> usize {
        self.entries.iter().filter(|e| e.online).count()
    }

    /// Explicitly drop an entry. Returns whether it existed.
    pub fn remove(&mut self, addr: u16) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.addr != addr);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
