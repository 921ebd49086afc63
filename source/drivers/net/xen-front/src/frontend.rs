// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use nexus_hal::{DomainId, GrantTable};

/// Netfront device state consumed by its sub-components.
///
/// The frontend drives every sub-component through the same
/// initialize/connect/enable/disable/disconnect/teardown sequence and
/// serializes those transitions against packet I/O.
pub trait Frontend {
    /// Handle to the grant-table service exposed by the transport.
    type GrantTable: GrantTable;

    /// Resolves the grant-table service. Called once per connect.
    fn grant_table(&self) -> Self::GrantTable;

    /// Domain running the backend half of the device.
    fn backend_domain(&self) -> DomainId;
}
