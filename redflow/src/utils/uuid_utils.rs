//! Document uid generation.

use uuid::Uuid;

/// Generates a new random uid for a document.
#[must_use]
pub fn generate_uid() -> String {
    Uuid::new_v4().to_string()
}
