//! Built-in reference operators.
//!
//! These carry no numerical semantics; they exist to exercise the full
//! engine surface. `delete` drops an existing cube, `duplicate` copies one
//! into a new output cube and is the canonical producer path (output record
//! creation, rollback ledger, leader commit).

pub mod delete;
pub mod duplicate;

use std::sync::Arc;

pub use delete::DeleteOperator;
pub use duplicate::DuplicateOperator;

use crate::registry::{FnOperatorFactory, OperatorRegistry};

/// Register the built-in operators into `registry`.
pub fn register_builtin_operators(registry: &OperatorRegistry) {
    registry.register(Arc::new(FnOperatorFactory::new("delete", || {
        Ok(Box::new(DeleteOperator::new()))
    })));
    registry.register(Arc::new(FnOperatorFactory::new("duplicate", || {
        Ok(Box::new(DuplicateOperator::new()))
    })));
}
