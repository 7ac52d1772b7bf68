//! Recency tiers of cached items and the eviction policy over them.
//!
//! Items live in a generational slot arena. Each slot is also a node of an
//! index-linked doubly linked list, one list per [`Tier`], so moving an item
//! between tiers and pushing or popping at either end are all `O(1)`.
//!
//! Within every tier the front holds the most recently used item and the
//! back the oldest one.

use crate::types::BufferKind;

use super::{CacheItem, CacheItemHandle};
use crate::resources::BufferId;

/// Lifecycle list a cache item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Allocated or used in the current frame.
    ThisFrame,
    /// Used in the previous frame.
    PrevFrame,
    /// Older items; the primary eviction source.
    LruTail,
    /// Evicted, but the GPU may still read the memory.
    PendingFree,
}

impl Tier {
    /// All tiers, newest first.
    pub const ALL: [Tier; 4] = [
        Tier::ThisFrame,
        Tier::PrevFrame,
        Tier::LruTail,
        Tier::PendingFree,
    ];

    fn index(self) -> usize {
        match self {
            Self::ThisFrame => 0,
            Self::PrevFrame => 1,
            Self::LruTail => 2,
            Self::PendingFree => 3,
        }
    }
}

/// Backing-memory side of eviction, implemented by the mesh cache.
pub(crate) trait ItemReclaimer {
    /// Whether the GPU may still read the item's memory.
    fn is_pending(&self, item: &CacheItem) -> bool;

    /// Block until the GPU is done with the item's memory.
    fn wait(&self, item: &CacheItem);

    /// Free the item's ranges.
    ///
    /// Returns the size of the free block produced in the `target` buffer
    /// kind, or the sum over both kinds when `target` is `None`.
    fn release(&mut self, item: &CacheItem, target: Option<BufferKind>) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
struct TierList {
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
    size: u64,
}

#[derive(Debug)]
struct Node {
    item: CacheItem,
    prev: Option<u32>,
    next: Option<u32>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Every live cache item, sorted into tiers.
#[derive(Debug, Default)]
pub struct CacheListSet {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    lists: [TierList; 4],
}

impl CacheListSet {
    /// Create an empty list set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item at the front of its tier.
    pub(crate) fn insert(&mut self, item: CacheItem) -> CacheItemHandle {
        let tier = item.tier;
        let node = Node {
            item,
            prev: None,
            next: None,
        };

        let index = match self.free_slots.pop() {
            Some(index) => {
                self.slots[index as usize].node = Some(node);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                (self.slots.len() - 1) as u32
            }
        };

        self.link_front(index, tier);
        CacheItemHandle {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    /// Remove an item from all bookkeeping.
    pub(crate) fn remove(&mut self, handle: CacheItemHandle) -> Option<CacheItem> {
        self.get(handle)?;
        self.unlink(handle.index);
        let slot = &mut self.slots[handle.index as usize];
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(handle.index);
        Some(node.item)
    }

    /// Whether the handle refers to a live item.
    pub fn contains(&self, handle: CacheItemHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Get an item by handle.
    pub fn get(&self, handle: CacheItemHandle) -> Option<&CacheItem> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_ref())
            .map(|node| &node.item)
    }

    pub(crate) fn get_mut(&mut self, handle: CacheItemHandle) -> Option<&mut CacheItem> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_mut())
            .map(|node| &mut node.item)
    }

    /// Move an item to the front of a tier.
    pub(crate) fn move_to_front(&mut self, handle: CacheItemHandle, tier: Tier) -> bool {
        if !self.contains(handle) {
            return false;
        }
        self.unlink(handle.index);
        self.link_front(handle.index, tier);
        true
    }

    /// Most recent item of a tier.
    pub fn front(&self, tier: Tier) -> Option<CacheItemHandle> {
        self.lists[tier.index()].head.map(|index| self.handle_at(index))
    }

    /// Oldest item of a tier.
    pub fn back(&self, tier: Tier) -> Option<CacheItemHandle> {
        self.lists[tier.index()].tail.map(|index| self.handle_at(index))
    }

    /// The next older item in the same tier.
    pub fn next(&self, handle: CacheItemHandle) -> Option<CacheItemHandle> {
        self.get(handle)?;
        self.node(handle.index)
            .next
            .map(|index| self.handle_at(index))
    }

    /// Handles of a tier, newest first.
    pub fn handles(&self, tier: Tier) -> Vec<CacheItemHandle> {
        let mut handles = Vec::with_capacity(self.tier_len(tier));
        let mut cursor = self.lists[tier.index()].head;
        while let Some(index) = cursor {
            handles.push(self.handle_at(index));
            cursor = self.node(index).next;
        }
        handles
    }

    /// Iterate over every live item in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (CacheItemHandle, &CacheItem)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.node.as_ref().map(|node| {
                (
                    CacheItemHandle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    &node.item,
                )
            })
        })
    }

    /// Number of items in a tier.
    pub fn tier_len(&self, tier: Tier) -> usize {
        self.lists[tier.index()].len
    }

    /// Bytes held by the items of a tier.
    pub fn tier_size(&self, tier: Tier) -> u64 {
        self.lists[tier.index()].size
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.lists.iter().map(|list| list.len).sum()
    }

    /// Whether there are no live items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age every item by one frame.
    ///
    /// `PrevFrame` items become the most recent part of `LruTail`, and
    /// `ThisFrame` becomes the new `PrevFrame`. Nothing ever moves towards
    /// `ThisFrame` here.
    pub(crate) fn end_frame(&mut self) {
        self.retag(Tier::PrevFrame, Tier::LruTail);
        let prev = std::mem::take(&mut self.lists[Tier::PrevFrame.index()]);
        let lru = self.lists[Tier::LruTail.index()];

        if let (Some(prev_head), Some(prev_tail)) = (prev.head, prev.tail) {
            let merged = match lru.head {
                Some(lru_head) => {
                    self.node_mut(prev_tail).next = Some(lru_head);
                    self.node_mut(lru_head).prev = Some(prev_tail);
                    TierList {
                        head: Some(prev_head),
                        tail: lru.tail,
                        len: prev.len + lru.len,
                        size: prev.size + lru.size,
                    }
                }
                None => prev,
            };
            self.lists[Tier::LruTail.index()] = merged;
        }

        self.retag(Tier::ThisFrame, Tier::PrevFrame);
        self.lists[Tier::PrevFrame.index()] =
            std::mem::take(&mut self.lists[Tier::ThisFrame.index()]);
    }

    /// Evict one item.
    ///
    /// A pending item is marked destroyed and parked at the front of
    /// `PendingFree`; 0 is returned. Otherwise its memory is released and the
    /// freed block size (see [`ItemReclaimer::release`]) is returned.
    pub(crate) fn evict<R: ItemReclaimer>(
        &mut self,
        handle: CacheItemHandle,
        reclaimer: &mut R,
        target: Option<BufferKind>,
    ) -> u64 {
        let Some(item) = self.get(handle) else {
            return 0;
        };

        if reclaimer.is_pending(item) {
            if item.tier != Tier::PendingFree {
                if let Some(item) = self.get_mut(handle) {
                    item.destroyed = true;
                }
                self.move_to_front(handle, Tier::PendingFree);
            }
            return 0;
        }

        let freed = reclaimer.release(item, target);
        self.remove(handle);
        freed
    }

    /// Evict every item. Returns the bytes released right away.
    pub(crate) fn evict_all<R: ItemReclaimer>(&mut self, reclaimer: &mut R) -> u64 {
        let mut freed = 0;
        for tier in Tier::ALL {
            for handle in self.handles(tier) {
                freed += self.evict(handle, reclaimer, None);
            }
        }
        freed
    }

    /// Release `PendingFree` items whose fence has cleared, oldest first.
    ///
    /// With `wait` set, blocks on every fence instead of skipping. Returns
    /// `true` if a free block of at least `request` bytes was produced.
    pub(crate) fn evict_pending_free<R: ItemReclaimer>(
        &mut self,
        reclaimer: &mut R,
        target: Option<BufferKind>,
        request: u64,
        wait: bool,
    ) -> bool {
        let mut satisfied = false;
        for handle in self.handles(Tier::PendingFree).into_iter().rev() {
            let Some(item) = self.get(handle) else {
                continue;
            };
            if reclaimer.is_pending(item) {
                if !wait {
                    continue;
                }
                reclaimer.wait(item);
            }
            let freed = reclaimer.release(item, target);
            self.remove(handle);
            if freed > 0 && freed >= request {
                satisfied = true;
            }
        }
        satisfied
    }

    /// Evict the oldest `LruTail` items while the tier is larger than
    /// `limit` bytes, stopping early once a block of `size` bytes is free.
    pub(crate) fn evict_lru_till_limit<R: ItemReclaimer>(
        &mut self,
        reclaimer: &mut R,
        target: Option<BufferKind>,
        size: u64,
        limit: u64,
    ) -> bool {
        while self.tier_size(Tier::LruTail) > limit {
            let Some(handle) = self.back(Tier::LruTail) else {
                break;
            };
            if self.evict(handle, reclaimer, target) >= size {
                return true;
            }
        }
        false
    }

    /// Evict the oldest `LruTail` items until a block of `size` bytes is free.
    pub(crate) fn evict_lru<R: ItemReclaimer>(
        &mut self,
        reclaimer: &mut R,
        target: Option<BufferKind>,
        size: u64,
    ) -> bool {
        while let Some(handle) = self.back(Tier::LruTail) {
            if self.evict(handle, reclaimer, target) >= size {
                return true;
            }
        }
        false
    }

    /// Walk a tier from its most recent end, evicting items until a block of
    /// `size` bytes is free.
    ///
    /// Pending items are skipped, or waited on when `wait` is set.
    pub(crate) fn evict_mru<R: ItemReclaimer>(
        &mut self,
        reclaimer: &mut R,
        tier: Tier,
        target: Option<BufferKind>,
        size: u64,
        wait: bool,
    ) -> bool {
        let mut cursor = self.front(tier);
        while let Some(handle) = cursor {
            cursor = self.next(handle);
            let Some(item) = self.get(handle) else {
                continue;
            };
            if reclaimer.is_pending(item) {
                if !wait {
                    continue;
                }
                reclaimer.wait(item);
            }
            if self.evict(handle, reclaimer, target) >= size {
                return true;
            }
        }
        false
    }

    /// Evict every item with a range in the given buffer.
    ///
    /// Returns the items that still reference it because their fence is
    /// pending.
    pub(crate) fn evict_in_buffer<R: ItemReclaimer>(
        &mut self,
        reclaimer: &mut R,
        kind: BufferKind,
        buffer: BufferId,
    ) -> Vec<CacheItemHandle> {
        for handle in self.items_in_buffer(kind, buffer) {
            self.evict(handle, reclaimer, Some(kind));
        }
        self.items_in_buffer(kind, buffer)
    }

    /// Items with a range in the given buffer.
    pub fn items_in_buffer(&self, kind: BufferKind, buffer: BufferId) -> Vec<CacheItemHandle> {
        self.iter()
            .filter(|(_, item)| item.uses_buffer(kind, buffer))
            .map(|(handle, _)| handle)
            .collect()
    }

    fn handle_at(&self, index: u32) -> CacheItemHandle {
        CacheItemHandle {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn node(&self, index: u32) -> &Node {
        match self.slots[index as usize].node.as_ref() {
            Some(node) => node,
            None => unreachable!("linked slot {index} is empty"),
        }
    }

    fn node_mut(&mut self, index: u32) -> &mut Node {
        match self.slots[index as usize].node.as_mut() {
            Some(node) => node,
            None => unreachable!("linked slot {index} is empty"),
        }
    }

    fn link_front(&mut self, index: u32, tier: Tier) {
        let list = self.lists[tier.index()];
        let node = self.node_mut(index);
        node.item.tier = tier;
        node.prev = None;
        node.next = list.head;
        let size = node.item.allocated_size();

        match list.head {
            Some(head) => self.node_mut(head).prev = Some(index),
            None => self.lists[tier.index()].tail = Some(index),
        }
        let list = &mut self.lists[tier.index()];
        list.head = Some(index);
        list.len += 1;
        list.size += size;
    }

    fn unlink(&mut self, index: u32) {
        let node = self.node(index);
        let (prev, next, tier) = (node.prev, node.next, node.item.tier);
        let size = node.item.allocated_size();

        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            None => self.lists[tier.index()].head = next,
        }
        match next {
            Some(next) => self.node_mut(next).prev = prev,
            None => self.lists[tier.index()].tail = prev,
        }

        let node = self.node_mut(index);
        node.prev = None;
        node.next = None;

        let list = &mut self.lists[tier.index()];
        debug_assert!(list.len > 0, "unlink from empty tier {tier:?}");
        list.len -= 1;
        list.size -= size;
    }

    fn retag(&mut self, from: Tier, to: Tier) {
        let mut cursor = self.lists[from.index()].head;
        while let Some(index) = cursor {
            let node = self.node_mut(index);
            node.item.tier = to;
            cursor = node.next;
        }
    }
}
