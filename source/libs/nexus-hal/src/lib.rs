// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(any(test, feature = "host")), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Hypervisor abstraction layer shared by paravirtual drivers
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable (bring-up)
//! TEST_COVERAGE: unit tests (host backend) + integration tests
//!
//! PUBLIC API:
//!   - GrantTable: grant-table service contract (slots + foreign access)
//!   - DomainId, Pfn, GrantRef, EntryKind: grant vocabulary
//!   - GrantError: service-level failures
//!   - HostGrantTable (feature `host`): in-memory grant table
//!
//! NOTE:
//! - Drivers depend on this crate with `default-features = false`; only tests
//!   enable the `host` backend.

#[cfg(feature = "alloc")]
extern crate alloc;

mod grant;
pub use grant::*;

#[cfg(feature = "host")]
mod host;
#[cfg(feature = "host")]
pub use host::{EntrySnapshot, HostDescriptor, HostGrantTable};
