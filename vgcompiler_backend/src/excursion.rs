//! Scoped excursions: temporary, automatically-reverted virtual-gate
//! changes.
//!
//! [`GateContext::excursion`] snapshots the named gates' current values and
//! returns a guard that dereferences to the context, so the excursion body
//! drives gates through the usual checked paths. Restoration happens exactly
//! once, on every exit path:
//!
//! - [`Excursion::end`] consumes the guard and propagates restore errors;
//! - dropping the guard (early return, `?`, panic unwinding) restores too,
//!   logging instead of propagating since `Drop` cannot fail.
//!
//! Nested excursions borrow through the outer guard and therefore restore in
//! reverse order of entry. Restoration writes pass through the boundary
//! guard like any other write.

use std::ops::{Deref, DerefMut};

use crate::error::Result;
use crate::matrix::GateContext;

/// Guard holding the snapshot of an excursion's gates.
pub struct Excursion<'a> {
    ctx: &'a mut GateContext,
    /// Captured (gate, value) pairs in capture order.
    saved: Vec<(String, f64)>,
    restored: bool,
}

impl GateContext {
    /// Starts an excursion over `gates`, snapshotting their current derived
    /// values. Unknown gates fail before anything is captured.
    pub fn excursion(&mut self, gates: &[&str]) -> Result<Excursion<'_>> {
        let mut saved = Vec::with_capacity(gates.len());
        for gate in gates {
            let value = self.virtual_value(gate)?;
            saved.push((gate.to_string(), value));
        }
        log::debug!("excursion enter: {:?}", saved);
        Ok(Excursion {
            ctx: self,
            saved,
            restored: false,
        })
    }
}

impl<'a> Excursion<'a> {
    /// The captured (gate, value) snapshot.
    pub fn snapshot(&self) -> &[(String, f64)] {
        &self.saved
    }

    /// Ends the excursion, restoring every captured gate in reverse capture
    /// order. Returns the first restore error after attempting all gates.
    pub fn end(mut self) -> Result<()> {
        self.restore()
    }

    fn restore(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        let mut first_err = None;
        for (gate, value) in self.saved.iter().rev() {
            if let Err(e) = self.ctx.set_virtual(gate, *value) {
                log::error!("excursion restore of {} to {} failed: {}", gate, value, e);
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        log::debug!("excursion exit: restored {} gates", self.saved.len());
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

impl<'a> Drop for Excursion<'a> {
    fn drop(&mut self) {
        // Errors were already logged in restore(); Drop cannot propagate.
        let _ = self.restore();
    }
}

impl<'a> Deref for Excursion<'a> {
    type Target = GateContext;
    fn deref(&self) -> &GateContext {
        self.ctx
    }
}

impl<'a> DerefMut for Excursion<'a> {
    fn deref_mut(&mut self) -> &mut GateContext {
        self.ctx
    }
}
