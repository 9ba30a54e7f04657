// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Session-indexed least recently used list.
//!
//! Nodes live in a slot map and are chained front (most recent) to back
//! (least recent). A lookup vector indexed by [`SessionId`] maps each session
//! to its node key, so touch and erase are O(1). Every cache sharing a
//! session space must be [`prepare`](LeastRecentlyUsedCache::prepare)d once
//! per minted session to keep the lookup vectors the same length.

use super::SessionId;
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    struct NodeKey;
}

struct Node<T> {
    session: SessionId,
    value: T,
    prev: Option<NodeKey>,
    next: Option<NodeKey>,
}

pub struct LeastRecentlyUsedCache<T> {
    nodes: SlotMap<NodeKey, Node<T>>,
    lookup: Vec<Option<NodeKey>>,
    head: Option<NodeKey>,
    tail: Option<NodeKey>,
}

impl<T> Default for LeastRecentlyUsedCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LeastRecentlyUsedCache<T> {
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            lookup: Vec::new(),
            head: None,
            tail: None,
        }
    }

    /// Reserve the lookup slot for the next minted session
    pub fn prepare(&mut self) {
        self.lookup.push(None);
    }

    /// Number of sessions this cache has a slot for
    pub fn prepared_len(&self) -> usize {
        self.lookup.len()
    }

    /// Insert `value` as the most recently used entry, replacing any entry for `session`
    pub fn put(&mut self, session: SessionId, value: T) {
        self.erase(session);

        let key = self.nodes.insert(Node {
            session,
            value,
            prev: None,
            next: self.head,
        });
        if let Some(old_head) = self.head {
            self.nodes[old_head].prev = Some(key);
        }
        self.head = Some(key);
        if self.tail.is_none() {
            self.tail = Some(key);
        }

        let index = session.index();
        if index >= self.lookup.len() {
            tracing::warn!("LRU put for unprepared session {session}");
            self.lookup.resize(index + 1, None);
        }
        self.lookup[index] = Some(key);
    }

    /// Remove and return the least recently used entry
    pub fn pop(&mut self) -> Option<(SessionId, T)> {
        let key = self.tail?;
        let node = self.unlink(key)?;
        Some((node.session, node.value))
    }

    /// Remove the entry for `session`, if any
    pub fn erase(&mut self, session: SessionId) -> Option<T> {
        let key = self.lookup.get(session.index()).copied().flatten()?;
        self.unlink(key).map(|node| node.value)
    }

    pub fn contains(&self, session: SessionId) -> bool {
        matches!(self.lookup.get(session.index()), Some(Some(_)))
    }

    pub fn get(&self, session: SessionId) -> Option<&T> {
        let key = self.lookup.get(session.index()).copied().flatten()?;
        self.nodes.get(key).map(|node| &node.value)
    }

    /// Entries from most to least recently used
    pub fn elements(&self) -> Elements<'_, T> {
        Elements {
            cache: self,
            cursor: self.head,
        }
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop every entry, keeping the prepared slots
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.lookup.iter_mut().for_each(|slot| *slot = None);
        self.head = None;
        self.tail = None;
    }

    /// Drop every entry and every prepared slot
    pub fn reset(&mut self) {
        self.clear();
        self.lookup.clear();
    }

    fn unlink(&mut self, key: NodeKey) -> Option<Node<T>> {
        let node = self.nodes.remove(key)?;
        match node.prev {
            Some(prev) => self.nodes[prev].next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.nodes[next].prev = node.prev,
            None => self.tail = node.prev,
        }
        self.lookup[node.session.index()] = None;
        Some(node)
    }
}

/// Front to back iterator over a [`LeastRecentlyUsedCache`]
pub struct Elements<'a, T> {
    cache: &'a LeastRecentlyUsedCache<T>,
    cursor: Option<NodeKey>,
}

impl<'a, T> Iterator for Elements<'a, T> {
    type Item = (SessionId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cache.nodes.get(self.cursor?)?;
        self.cursor = node.next;
        Some((node.session, &node.value))
    }
}
