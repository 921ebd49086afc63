// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Xen paravirtual network frontend (netfront) components
//! OWNERS: @runtime
//! STATUS: In Progress
//! API_STABILITY: Unstable (bring-up)
//! TEST_COVERAGE: granter unit tests + lifecycle/property integration tests (host)
//!
//! PUBLIC API:
//!   - Frontend: what the netfront device supplies to its sub-components
//!   - Granter: page grant lifecycle (permit/revoke foreign access)
//!   - GrantHandle: move-only token for one outstanding grant
//!   - GranterError: failures surfaced by `Granter::permit_access`
//!
//! DEPENDENCIES:
//!   - nexus-hal::GrantTable: grant-table service contract
//!
//! NOTE:
//! - Ring setup, event channels and backend discovery live in the frontend;
//!   this crate only wraps the grant lifecycle the packet paths rely on.

mod frontend;
mod granter;

pub use frontend::Frontend;
pub use granter::{GrantHandle, Granter, GranterError, Result};
