//! User document, as far as the chat channel needs it

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{partial_unique_index, unique_index, IntoIndexes};
use crate::db::schemas::Metadata;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserDoc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub user_id: String,
    pub name: String,
    pub email: String,
    /// Last ten digits of the phone number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            unique_index(doc! { "userId": 1 }, "user_id_unique"),
            unique_index(doc! { "email": 1 }, "email_unique"),
            // Users created outside chat carry no phone
            partial_unique_index(
                doc! { "phoneNumber": 1 },
                doc! { "phoneNumber": { "$exists": true } },
                "phone_number_unique",
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_number_unique_when_present() {
        let indexes = UserDoc::into_indices();
        let (_, options) = indexes
            .iter()
            .find(|(keys, _)| keys.contains_key("phoneNumber"))
            .unwrap();
        let options = options.as_ref().unwrap();
        assert_eq!(options.unique, Some(true));
        assert_eq!(
            options.partial_filter_expression,
            Some(doc! { "phoneNumber": { "$exists": true } })
        );
    }

    #[test]
    fn test_missing_phone_not_serialized() {
        let user = UserDoc {
            user_id: "u1".into(),
            name: "Asha".into(),
            email: "asha@example.com".into(),
            ..Default::default()
        };
        let doc = bson::to_document(&user).unwrap();
        assert!(!doc.contains_key("phoneNumber"));
    }
}
