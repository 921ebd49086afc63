//! CONTEXT: Integration tests for the grant-table contract and host backend
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 3 integration tests
//!
//! TEST_SCOPE:
//!   - GrantTable blanket impls (&T, Arc<T>)
//!   - Acquire/release bracketing
//!   - Slot exclusivity under concurrent use
//!
//! TEST_SCENARIOS:
//!   - shared_handles_see_one_table(): Arc and & handles drive the same pool
//!   - release_balances_acquire(): nested acquires keep the service alive
//!   - concurrent_grants_get_distinct_slots(): threads never share a slot
//!
//! DEPENDENCIES:
//!   - nexus_hal::HostGrantTable: in-memory backend (feature `host`)
#![cfg(feature = "host")]

use std::collections::HashSet;
use std::sync::Arc;

use nexus_hal::{DomainId, EntryKind, GrantTable, HostGrantTable, Pfn};

const BACKEND: DomainId = DomainId::new(1);

fn share<G: GrantTable>(table: &G, pfn: u64) -> G::Descriptor {
    let d = table.get().expect("free slot");
    table
        .permit_foreign_access(&d, BACKEND, EntryKind::FullPage, Pfn::new(pfn), false)
        .expect("permit");
    d
}

fn unshare<G: GrantTable>(table: &G, d: G::Descriptor) {
    table.revoke_foreign_access(&d).expect("revoke");
    table.put(d);
}

#[test]
fn shared_handles_see_one_table() {
    let table = Arc::new(HostGrantTable::new(4));
    table.acquire();

    let via_arc = share(&Arc::clone(&table), 0x100);
    let borrowed: &HostGrantTable = &table;
    let via_ref = share(&borrowed, 0x200);
    assert_eq!(table.in_use(), 2);
    assert_ne!(table.reference(&via_arc), table.reference(&via_ref));

    unshare(&table, via_arc);
    unshare(&borrowed, via_ref);
    assert_eq!(table.free_slots(), 4);
    table.release();
    assert!(!table.is_acquired());
}

#[test]
fn release_balances_acquire() {
    let table = HostGrantTable::new(1);
    table.acquire();
    table.acquire();
    table.release();
    assert!(table.is_acquired());
    table.release();
    assert!(!table.is_acquired());
    assert!(table.get().is_none());
}

#[test]
fn concurrent_grants_get_distinct_slots() {
    const THREADS: u64 = 4;
    const PER_THREAD: u64 = 8;

    let table = HostGrantTable::new((THREADS * PER_THREAD) as u32);
    table.acquire();

    let refs: Vec<_> = std::thread::scope(|s| {
        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let table = &table;
                s.spawn(move || {
                    (0..PER_THREAD)
                        .map(|i| share(table, t * PER_THREAD + i))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers.into_iter().flat_map(|w| w.join().expect("worker")).collect()
    });

    let unique: HashSet<_> = refs.iter().map(|d| table.reference(d)).collect();
    assert_eq!(unique.len(), refs.len());
    assert_eq!(table.free_slots(), 0);

    for d in refs {
        unshare(&table, d);
    }
    assert_eq!(table.free_slots(), table.capacity());
}
