//! Page template record.

use serde::{Deserialize, Serialize};

/// Reusable markdown skeleton offered when creating pages.
///
/// Name uniqueness is checked by the session on write; the stored list
/// itself carries no such guarantee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    #[serde(default)]
    pub markdown: String,
}
