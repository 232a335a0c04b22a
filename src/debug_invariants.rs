//! Structural self-checks for the arena-backed containers.
//!
//! Stores, graphs and trees keep redundant links (id index and slots, up and
//! down lists). Mutating passes call [`debug_invariants!`] once they finish;
//! the check is compiled in for debug builds and the `check-invariants`
//! feature only.

use crate::topo_error::TopoError;

/// Trait for validating data structure invariants.
pub trait DebugInvariants {
    /// Panic with the first violation found when checks are enabled.
    fn debug_assert_invariants(&self) {
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        if let Err(e) = self.validate_invariants() {
            panic!("[invariants] {}: {e}", std::any::type_name::<Self>());
        }
    }

    /// Validate invariants and return the first error encountered.
    fn validate_invariants(&self) -> Result<(), TopoError>;
}

/// Run [`DebugInvariants::debug_assert_invariants`] on a container when
/// invariant checking is compiled in.
#[macro_export]
macro_rules! debug_invariants {
    ($target:expr) => {
        if cfg!(any(debug_assertions, feature = "check-invariants")) {
            $crate::debug_invariants::DebugInvariants::debug_assert_invariants($target);
        }
    };
}
