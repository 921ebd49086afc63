// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory grant table for host-first tests.
//!
//! Slots are handed out lowest reference first so tests can predict which
//! reference a fresh grant receives. Faults can be injected one call at a time.

use std::collections::BTreeSet;

use log::warn;
use parking_lot::Mutex;

use crate::grant::{DomainId, EntryKind, GrantError, GrantRef, GrantTable, Pfn};

/// Slot owner handed out by [`HostGrantTable`].
#[derive(Debug, PartialEq, Eq)]
pub struct HostDescriptor {
    slot: u32,
}

/// Active foreign-access entry as observed by the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntrySnapshot {
    /// Domain allowed to map the page.
    pub domain: DomainId,
    /// Shared frame.
    pub pfn: Pfn,
    /// Entry granularity.
    pub kind: EntryKind,
    /// Whether the peer may only read the page.
    pub read_only: bool,
}

/// Fixed-size grant table backed by host memory.
pub struct HostGrantTable {
    state: Mutex<State>,
}

struct State {
    acquired: usize,
    free: BTreeSet<u32>,
    entries: Vec<Option<EntrySnapshot>>,
    fail_next_permit: bool,
    fail_next_revoke: bool,
}

impl HostGrantTable {
    /// Creates a table with `slots` usable entries, all free.
    pub fn new(slots: u32) -> Self {
        Self {
            state: Mutex::new(State {
                acquired: 0,
                free: (0..slots).collect(),
                entries: (0..slots).map(|_| None).collect(),
                fail_next_permit: false,
                fail_next_revoke: false,
            }),
        }
    }

    /// Total number of usable slots.
    pub fn capacity(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Slots currently in the free pool.
    pub fn free_slots(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Slots handed out and not yet returned.
    pub fn in_use(&self) -> usize {
        let state = self.state.lock();
        state.entries.len() - state.free.len()
    }

    /// Whether any acquire is outstanding.
    pub fn is_acquired(&self) -> bool {
        self.state.lock().acquired > 0
    }

    /// Active entry behind `gref`, if the peer could map it right now.
    pub fn entry(&self, gref: GrantRef) -> Option<EntrySnapshot> {
        let slot = gref.raw().checked_sub(GrantRef::FIRST_USABLE.raw())?;
        let state = self.state.lock();
        state.entries.get(slot as usize).copied().flatten()
    }

    /// Makes the next `permit_foreign_access` fail with [`GrantError::PermitFailed`].
    pub fn fail_next_permit(&self) {
        self.state.lock().fail_next_permit = true;
    }

    /// Makes the next `revoke_foreign_access` fail with [`GrantError::RevokeBusy`].
    pub fn fail_next_revoke(&self) {
        self.state.lock().fail_next_revoke = true;
    }
}

impl GrantTable for HostGrantTable {
    type Descriptor = HostDescriptor;

    fn acquire(&self) {
        self.state.lock().acquired += 1;
    }

    fn release(&self) {
        let mut state = self.state.lock();
        assert!(state.acquired > 0, "gnttab: release without acquire");
        state.acquired -= 1;
    }

    fn get(&self) -> Option<HostDescriptor> {
        let mut state = self.state.lock();
        if state.acquired == 0 {
            warn!("gnttab: get while not acquired");
            return None;
        }
        let slot = state.free.pop_first()?;
        Some(HostDescriptor { slot })
    }

    fn put(&self, descriptor: HostDescriptor) {
        let mut state = self.state.lock();
        let slot = descriptor.slot;
        assert!(
            state.entries[slot as usize].is_none(),
            "gnttab: put of slot {slot} with an active entry"
        );
        assert!(state.free.insert(slot), "gnttab: slot {slot} returned twice");
    }

    fn permit_foreign_access(
        &self,
        descriptor: &HostDescriptor,
        domain: DomainId,
        kind: EntryKind,
        pfn: Pfn,
        read_only: bool,
    ) -> Result<(), GrantError> {
        let mut state = self.state.lock();
        if state.acquired == 0 {
            return Err(GrantError::NotAcquired);
        }
        if core::mem::take(&mut state.fail_next_permit) {
            return Err(GrantError::PermitFailed);
        }
        if domain == DomainId::SELF {
            return Err(GrantError::PermitFailed);
        }
        let entry = &mut state.entries[descriptor.slot as usize];
        if entry.is_some() {
            return Err(GrantError::PermitFailed);
        }
        *entry = Some(EntrySnapshot { domain, pfn, kind, read_only });
        Ok(())
    }

    fn revoke_foreign_access(&self, descriptor: &HostDescriptor) -> Result<(), GrantError> {
        let mut state = self.state.lock();
        if state.acquired == 0 {
            return Err(GrantError::NotAcquired);
        }
        if core::mem::take(&mut state.fail_next_revoke) {
            return Err(GrantError::RevokeBusy);
        }
        if state.entries[descriptor.slot as usize].take().is_none() {
            warn!("gnttab: revoke of inactive slot {}", descriptor.slot);
        }
        Ok(())
    }

    fn reference(&self, descriptor: &HostDescriptor) -> GrantRef {
        GrantRef::new(GrantRef::FIRST_USABLE.raw() + descriptor.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACKEND: DomainId = DomainId::new(1);

    fn acquired(slots: u32) -> HostGrantTable {
        let table = HostGrantTable::new(slots);
        table.acquire();
        table
    }

    #[test]
    fn get_hands_out_lowest_reference_first() {
        let table = acquired(4);
        let a = table.get().expect("slot");
        let b = table.get().expect("slot");
        assert_eq!(table.reference(&a), GrantRef::FIRST_USABLE);
        assert_eq!(table.reference(&b).raw(), GrantRef::FIRST_USABLE.raw() + 1);
        table.put(a);
        let c = table.get().expect("slot");
        assert_eq!(table.reference(&c), GrantRef::FIRST_USABLE);
    }

    #[test]
    fn get_returns_none_when_exhausted() {
        let table = acquired(1);
        let _held = table.get().expect("slot");
        assert!(table.get().is_none());
        assert_eq!(table.free_slots(), 0);
        assert_eq!(table.in_use(), 1);
    }

    #[test]
    fn get_requires_acquire() {
        let table = HostGrantTable::new(2);
        assert!(table.get().is_none());
        table.acquire();
        assert!(table.is_acquired());
        assert!(table.get().is_some());
    }

    #[test]
    fn permit_records_entry_until_revoked() {
        let table = acquired(2);
        let d = table.get().expect("slot");
        table
            .permit_foreign_access(&d, BACKEND, EntryKind::FullPage, Pfn::new(0x42), true)
            .expect("permit");
        let gref = table.reference(&d);
        let entry = table.entry(gref).expect("active entry");
        assert_eq!(entry.domain, BACKEND);
        assert_eq!(entry.pfn, Pfn::new(0x42));
        assert!(entry.read_only);

        table.revoke_foreign_access(&d).expect("revoke");
        assert_eq!(table.entry(gref), None);
        table.put(d);
        assert_eq!(table.free_slots(), 2);
    }

    #[test]
    fn injected_faults_fire_once() {
        let table = acquired(1);
        let d = table.get().expect("slot");
        table.fail_next_permit();
        assert_eq!(
            table.permit_foreign_access(&d, BACKEND, EntryKind::FullPage, Pfn::new(1), false),
            Err(GrantError::PermitFailed)
        );
        table
            .permit_foreign_access(&d, BACKEND, EntryKind::FullPage, Pfn::new(1), false)
            .expect("second permit succeeds");

        table.fail_next_revoke();
        assert_eq!(table.revoke_foreign_access(&d), Err(GrantError::RevokeBusy));
        assert!(table.entry(table.reference(&d)).is_some());
        table.revoke_foreign_access(&d).expect("second revoke succeeds");
    }

    #[test]
    fn permit_to_self_is_refused() {
        let table = acquired(1);
        let d = table.get().expect("slot");
        assert_eq!(
            table.permit_foreign_access(&d, DomainId::SELF, EntryKind::FullPage, Pfn::new(1), true),
            Err(GrantError::PermitFailed)
        );
    }

    #[test]
    fn entry_below_first_usable_is_none() {
        let table = acquired(1);
        assert_eq!(table.entry(GrantRef::new(0)), None);
    }

    #[test]
    #[should_panic(expected = "active entry")]
    fn put_with_active_entry_panics() {
        let table = acquired(1);
        let d = table.get().expect("slot");
        table
            .permit_foreign_access(&d, BACKEND, EntryKind::FullPage, Pfn::new(1), true)
            .expect("permit");
        table.put(d);
    }
}
