//! Identifier utilities

use uuid::Uuid;

/// Generate a fresh transport session identifier
pub fn new_transport_id() -> String {
    Uuid::new_v4().simple().to_string()
}
