//! Bookkeeping timestamps embedded in every document

use bson::DateTime;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,
}

impl Metadata {
    /// Stamp both timestamps with `at`
    pub fn touch_new(&mut self, at: DateTime) {
        self.created_at = Some(at);
        self.updated_at = Some(at);
    }
}
