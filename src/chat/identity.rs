//! Chat users, looked up by phone number.

use async_trait::async_trait;
use bson::doc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::schemas::{UserDoc, USER_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::types::{ExamdeskError, Result};

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserDoc>>;

    /// Create a user. An email or phone number already taken is a
    /// `DuplicateSubmission`.
    async fn register(&self, name: &str, email: &str, phone: &str) -> Result<UserDoc>;
}

const MSG_PHONE_TAKEN: &str = "Phone number already registered";
const MSG_EMAIL_TAKEN: &str = "Email already registered";

fn new_user(name: &str, email: &str, phone: &str) -> UserDoc {
    UserDoc {
        user_id: Uuid::new_v4().to_string(),
        name: name.trim().to_string(),
        email: email.trim().to_lowercase(),
        phone_number: Some(phone.to_string()),
        ..Default::default()
    }
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<Vec<UserDoc>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: UserDoc) {
        self.users.write().await.push(user);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserDoc>> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|u| u.phone_number.as_deref() == Some(phone))
            .cloned())
    }

    async fn register(&self, name: &str, email: &str, phone: &str) -> Result<UserDoc> {
        let user = new_user(name, email, phone);
        let mut users = self.users.write().await;
        if users.iter().any(|u| u.phone_number == user.phone_number) {
            return Err(ExamdeskError::DuplicateSubmission(MSG_PHONE_TAKEN.into()));
        }
        if users.iter().any(|u| u.email == user.email) {
            return Err(ExamdeskError::DuplicateSubmission(MSG_EMAIL_TAKEN.into()));
        }
        users.push(user.clone());
        Ok(user)
    }
}

pub struct MongoUserDirectory {
    collection: MongoCollection<UserDoc>,
}

impl MongoUserDirectory {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: mongo.collection::<UserDoc>(USER_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl UserDirectory for MongoUserDirectory {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserDoc>> {
        self.collection.find_one(doc! { "phoneNumber": phone }).await
    }

    async fn register(&self, name: &str, email: &str, phone: &str) -> Result<UserDoc> {
        let user = new_user(name, email, phone);
        match self.collection.insert_one(user.clone()).await {
            Ok(()) => Ok(user),
            // The unique index does not say which key clashed
            Err(e) if e.is_duplicate() => {
                let message = if self.find_by_phone(phone).await?.is_some() {
                    MSG_PHONE_TAKEN
                } else {
                    MSG_EMAIL_TAKEN
                };
                Err(ExamdeskError::DuplicateSubmission(message.into()))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_find() {
        let directory = InMemoryUserDirectory::new();
        let user = directory
            .register(" Asha ", "Asha@Example.com", "9876543210")
            .await
            .unwrap();
        assert_eq!(user.name, "Asha");
        assert_eq!(user.email, "asha@example.com");

        let found = directory.find_by_phone("9876543210").await.unwrap().unwrap();
        assert_eq!(found.user_id, user.user_id);
        assert!(directory.find_by_phone("0000000000").await.unwrap().is_none());

        let err = directory
            .register("Other", "asha@example.com", "1111111111")
            .await
            .unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn test_one_user_per_phone() {
        let directory = InMemoryUserDirectory::new();
        directory
            .register("A", "a@example.com", "9876543210")
            .await
            .unwrap();

        let err = directory
            .register("B", "b@example.com", "9876543210")
            .await
            .unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(err.to_string(), "Phone number already registered");

        let found = directory.find_by_phone("9876543210").await.unwrap().unwrap();
        assert_eq!(found.name, "A");
        assert_eq!(directory.users.read().await.len(), 1);
    }
}
