#![allow(clippy::module_name_repetitions)]
use crate::stored_object;

stored_object!(QueryRecord, "query", {
    text: String
});

impl QueryRecord {
    /// Ids are generated by the caller so hops can reference them before insertion.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            text: text.into(),
        }
    }
}
