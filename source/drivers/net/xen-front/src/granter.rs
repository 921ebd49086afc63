// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page grant lifecycle for the netfront packet paths.
//!
//! A [`Granter`] turns a physical page into a grant the backend can map and
//! tears that sharing down again. Grants are only valid inside the
//! connect/disconnect window; each one is represented by a [`GrantHandle`]
//! that borrows the granter, so a handle cannot be revoked twice, used after
//! revocation, or kept across a disconnect. Handles also record the granter
//! that issued them; presenting one to another granter is a contract
//! violation and panics.

use core::fmt;
use core::marker::PhantomData;

use log::{debug, error, trace};
use nexus_hal::{EntryKind, GrantError, GrantRef, GrantTable, Pfn};

use crate::frontend::Frontend;

/// Result alias for granter operations.
pub type Result<T> = core::result::Result<T, GranterError>;

type Descriptor<F> = <<F as Frontend>::GrantTable as GrantTable>::Descriptor;

/// Errors surfaced by [`Granter::permit_access`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GranterError {
    /// Called outside the connect/disconnect window.
    #[error("granter not connected")]
    NotConnected,
    /// No free grant-table slot; the page cannot be shared right now.
    #[error("insufficient grant-table resources")]
    InsufficientResources,
    /// The slot was obtained but foreign access was refused. The slot has
    /// already been returned to the pool.
    #[error("permit foreign access failed: {0}")]
    Permit(GrantError),
}

/// One outstanding grant: a slot plus the foreign access bound to it.
#[must_use = "grants must be revoked with Granter::revoke_access"]
pub struct GrantHandle<'g, D> {
    // `None` once the grant has been revoked (or withheld after a failed revoke).
    descriptor: Option<D>,
    reference: GrantRef,
    issuer: usize,
    _granter: PhantomData<&'g ()>,
}

impl<D> GrantHandle<'_, D> {
    /// Backend-visible reference for this grant.
    pub fn reference(&self) -> GrantRef {
        self.reference
    }
}

impl<D> Drop for GrantHandle<'_, D> {
    fn drop(&mut self) {
        if self.descriptor.is_some() {
            error!("granter: {} dropped without revoke; slot leaked with access active", self.reference);
        }
    }
}

impl<D> fmt::Debug for GrantHandle<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrantHandle").field("reference", &self.reference).finish()
    }
}

/// Grants backend access to individual pages on behalf of a frontend.
pub struct Granter<'f, F: Frontend> {
    frontend: &'f F,
    gnttab: Option<F::GrantTable>,
}

impl<'f, F: Frontend> Granter<'f, F> {
    /// Creates a granter bound to `frontend`. No service is held yet.
    pub fn initialize(frontend: &'f F) -> Self {
        Self { frontend, gnttab: None }
    }

    /// Resolves and acquires the frontend's grant-table service.
    ///
    /// # Panics
    ///
    /// If the granter is already connected.
    pub fn connect(&mut self) {
        assert!(self.gnttab.is_none(), "granter: connect while connected");
        let gnttab = self.frontend.grant_table();
        gnttab.acquire();
        self.gnttab = Some(gnttab);
        debug!("granter: connected");
    }

    /// No-op; present so the frontend can drive all sub-components uniformly.
    pub fn enable(&mut self) {}

    /// No-op counterpart of [`Granter::enable`].
    pub fn disable(&mut self) {}

    /// Whether the grant-table service is held.
    pub fn is_connected(&self) -> bool {
        self.gnttab.is_some()
    }

    /// Allows the backend to map `pfn` (whole page), read-only if requested.
    ///
    /// On failure no slot is kept: either none was obtained, or the one that
    /// was has been returned to the pool.
    pub fn permit_access(&self, pfn: Pfn, read_only: bool) -> Result<GrantHandle<'_, Descriptor<F>>> {
        let gnttab = self.gnttab.as_ref().ok_or(GranterError::NotConnected)?;

        let Some(descriptor) = gnttab.get() else {
            error!("granter: {pfn}: no free grant-table slot");
            return Err(GranterError::InsufficientResources);
        };

        let domain = self.frontend.backend_domain();
        if let Err(err) =
            gnttab.permit_foreign_access(&descriptor, domain, EntryKind::FullPage, pfn, read_only)
        {
            error!("granter: {pfn} -> {domain}: {err}");
            gnttab.put(descriptor);
            return Err(GranterError::Permit(err));
        }

        let reference = gnttab.reference(&descriptor);
        trace!("granter: {pfn} -> {domain} as {reference} (ro={read_only})");
        Ok(GrantHandle {
            descriptor: Some(descriptor),
            reference,
            issuer: self.id(),
            _granter: PhantomData,
        })
    }

    /// Withdraws the backend's access and recycles the slot.
    ///
    /// If the service refuses the revoke, the failure is logged and the slot
    /// is never returned to the pool, since the backend may still map it.
    ///
    /// # Panics
    ///
    /// If `handle` was issued by a different granter.
    pub fn revoke_access(&self, mut handle: GrantHandle<'_, Descriptor<F>>) {
        self.check_issuer(&handle);
        let reference = handle.reference;
        let Some(descriptor) = handle.descriptor.take() else {
            return;
        };

        let Some(gnttab) = self.gnttab.as_ref() else {
            error!("granter: {reference}: revoke while not connected");
            return;
        };

        match gnttab.revoke_foreign_access(&descriptor) {
            Ok(()) => {
                gnttab.put(descriptor);
                trace!("granter: {reference} revoked");
            }
            Err(err) => {
                // Slot leaks on purpose: a live foreign mapping must never be recycled.
                error!("granter: {reference}: revoke failed: {err}; slot withheld");
            }
        }
    }

    /// Backend-visible reference for `handle`.
    ///
    /// # Panics
    ///
    /// If `handle` was issued by a different granter.
    pub fn reference(&self, handle: &GrantHandle<'_, Descriptor<F>>) -> GrantRef {
        self.check_issuer(handle);
        handle.reference()
    }

    // Stable while any handle is outstanding: handles borrow the granter, so it cannot move.
    fn id(&self) -> usize {
        self as *const Self as usize
    }

    fn check_issuer(&self, handle: &GrantHandle<'_, Descriptor<F>>) {
        assert_eq!(
            handle.issuer,
            self.id(),
            "granter: {} was issued by another granter",
            handle.reference
        );
    }

    /// Releases the grant-table service taken by [`Granter::connect`].
    ///
    /// Every handle issued since connect must already be revoked; the borrow
    /// checker enforces this for handles obtained from this granter.
    ///
    /// # Panics
    ///
    /// If the granter is not connected.
    pub fn disconnect(&mut self) {
        match self.gnttab.take() {
            Some(gnttab) => {
                gnttab.release();
                debug!("granter: disconnected");
            }
            None => panic!("granter: disconnect without connect"),
        }
    }

    /// Destroys the granter. Must be the last call.
    ///
    /// # Panics
    ///
    /// If the grant-table service is still held.
    pub fn teardown(self) {
        assert!(self.gnttab.is_none(), "granter: teardown while connected");
        debug!("granter: torn down");
    }
}

impl<F: Frontend> fmt::Debug for Granter<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Granter").field("connected", &self.is_connected()).finish()
    }
}
