// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Reference-counted interning pools.
//!
//! Generation-2 hardware has far fewer L3/L4 match registers and
//! action tags than there are rules that could use them, so rules
//! with identical match fields (or identical actions) share one
//! entry. An entry is live while its usage is non-zero, and no two
//! live entries of a pool ever hold equal keys.

use crate::api::PoolDump;
use crate::api::PoolEntryDump;
use crate::api::RxfError;
use alloc::string::String;
use alloc::string::ToString;
use alloc::vec::Vec;
use core::fmt::Display;

#[derive(Clone, Debug)]
struct PoolEntry<K> {
    usage: u32,
    key: Option<K>,
}

/// The result of looking a key up in a pool.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Probe {
    pub idx: u8,
    /// No live entry holds the key; `idx` is the first free entry.
    pub is_new: bool,
}

#[derive(Clone, Debug)]
pub struct RefPool<K> {
    name: &'static str,
    entries: Vec<PoolEntry<K>>,
}

impl<K: Clone + Eq> RefPool<K> {
    pub fn new(name: &'static str, size: u8) -> Self {
        let entries =
            (0..size).map(|_| PoolEntry { usage: 0, key: None }).collect();
        Self { name, entries }
    }

    /// Find the entry `key` would use, without taking a reference.
    ///
    /// A live entry holding an equal key wins over a free one.
    pub fn probe(&self, key: &K) -> Result<Probe, RxfError> {
        if let Some(idx) = self.find(key) {
            return Ok(Probe { idx, is_new: false });
        }

        self.entries
            .iter()
            .position(|e| e.usage == 0)
            .map(|i| Probe { idx: i as u8, is_new: true })
            .ok_or_else(|| RxfError::PoolExhausted(self.name.to_string()))
    }

    /// Take a reference on entry `idx` for `key`, as returned by
    /// [`Self::probe`].
    pub fn acquire(&mut self, idx: u8, key: &K) {
        let entry = &mut self.entries[idx as usize];
        debug_assert!(entry.usage == 0 || entry.key.as_ref() == Some(key));
        entry.usage += 1;
        entry.key = Some(key.clone());
    }

    #[cfg(test)]
    pub fn find_or_insert(&mut self, key: &K) -> Result<Probe, RxfError> {
        let probe = self.probe(key)?;
        self.acquire(probe.idx, key);
        Ok(probe)
    }

    /// Drop a reference on entry `idx`. Returns true when that was
    /// the last one and the entry is now free.
    pub fn release(&mut self, idx: u8) -> bool {
        let Some(entry) = self.entries.get_mut(idx as usize) else {
            return false;
        };

        if entry.usage == 0 {
            return false;
        }

        entry.usage -= 1;
        if entry.usage == 0 {
            entry.key = None;
            return true;
        }

        false
    }

    /// The live entry holding `key`.
    pub fn find(&self, key: &K) -> Option<u8> {
        self.entries
            .iter()
            .position(|e| e.usage > 0 && e.key.as_ref() == Some(key))
            .map(|i| i as u8)
    }

    pub fn key(&self, idx: u8) -> Option<&K> {
        self.entries.get(idx as usize).and_then(|e| e.key.as_ref())
    }

    pub fn usage(&self, idx: u8) -> u32 {
        self.entries.get(idx as usize).map(|e| e.usage).unwrap_or(0)
    }

    /// Live entries as `(index, usage, key)`.
    pub fn live(&self) -> impl Iterator<Item = (u8, u32, &K)> {
        self.entries.iter().enumerate().filter_map(|(i, e)| {
            e.key.as_ref().filter(|_| e.usage > 0).map(|k| (i as u8, e.usage, k))
        })
    }
}

impl<K: Clone + Eq + Display> RefPool<K> {
    pub fn dump(&self) -> PoolDump {
        PoolDump {
            name: String::from(self.name),
            size: self.entries.len() as u32,
            entries: self
                .live()
                .map(|(index, usage, key)| PoolEntryDump {
                    index: index as u32,
                    usage,
                    key: key.to_string(),
                })
                .collect(),
        }
    }
}
