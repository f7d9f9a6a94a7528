//! Per-connection "change your password first" restrictions.

use std::sync::{Mutex, MutexGuard};

use crate::dn;

/// Kinds of requests a connection can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Bind,
    Unbind,
    Abandon,
    StartTls,
    /// The password modify extended operation.
    PasswordModify,
    Modify,
    Add,
    Delete,
    ModRdn,
    Search,
    Compare,
    Extended,
}

impl OperationKind {
    /// Operations a restricted connection may still perform. A plain modify
    /// may too, when it only touches the password; the engine decides that.
    pub fn is_exempt(self) -> bool {
        matches!(
            self,
            OperationKind::Bind
                | OperationKind::Unbind
                | OperationKind::Abandon
                | OperationKind::StartTls
                | OperationKind::PasswordModify
        )
    }
}

/// Restricted identity per connection slot.
///
/// Slots are indexed by connection number and the table grows on demand.
#[derive(Debug, Default)]
pub struct SessionRestrictor {
    slots: Mutex<Vec<Option<String>>>,
}

impl SessionRestrictor {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Option<String>>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Restricts `conn` to password changes for `identity`.
    pub fn restrict(&self, conn: usize, identity: &str) {
        let mut slots = self.slots();
        if slots.len() <= conn {
            slots.resize(conn + 1, None);
        }
        slots[conn] = Some(dn::normalize_lossy(identity));
        #[cfg(feature = "tracing")]
        tracing::debug!("connection {} restricted to password change for {}", conn, identity);
    }

    /// Lifts any restriction on `conn`.
    pub fn clear(&self, conn: usize) {
        if let Some(slot) = self.slots().get_mut(conn) {
            *slot = None;
        }
    }

    /// The identity `conn` is restricted for, if any.
    pub fn restricted(&self, conn: usize) -> Option<String> {
        self.slots().get(conn).cloned().flatten()
    }

    /// Whether `conn` may run `op` as `bound`.
    ///
    /// A restriction recorded for another identity no longer applies and is
    /// dropped here. Returns `false` only when the connection stays
    /// restricted and `op` is not exempt.
    pub fn check(&self, conn: usize, bound: &str, op: OperationKind) -> bool {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(conn) else {
            return true;
        };
        let Some(identity) = slot.as_deref() else {
            return true;
        };
        if identity != dn::normalize_lossy(bound) {
            *slot = None;
            return true;
        }
        op.is_exempt()
    }
}
