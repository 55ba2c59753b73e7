//! Answer vault
//!
//! Keeps generated questions together with their answer keys. Only
//! [`PublicItem`] views, which carry no answer or explanation, leave the vault
//! before a question has been answered.

use async_trait::async_trait;
use bson::doc;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::db::schemas::{GeneratedItem, GeneratedSet, GENERATION_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::services::generator::{Difficulty, DraftItem};
use crate::types::{ExamdeskError, Result};

/// Where a set of questions belongs in the course tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topic {
    pub level: String,
    pub subject: String,
    pub chapter: String,
    /// Empty when no unit was chosen
    pub unit: String,
}

/// Question view safe to show before answering
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicItem {
    #[serde(rename = "mcqId")]
    pub item_id: String,
    pub question_number: i32,
    pub question: String,
    pub options: Vec<String>,
    pub difficulty: String,
}

impl From<&GeneratedItem> for PublicItem {
    fn from(item: &GeneratedItem) -> Self {
        Self {
            item_id: item.item_id.clone(),
            question_number: item.question_number,
            question: item.question.clone(),
            options: item.options.clone(),
            difficulty: item.difficulty.clone(),
        }
    }
}

/// A stored item with the context of the set it came from
#[derive(Debug, Clone, PartialEq)]
pub struct VaultEntry {
    pub set_id: String,
    pub owner_id: String,
    pub topic: Topic,
    pub item: GeneratedItem,
}

impl VaultEntry {
    fn from_set(set: &GeneratedSet, item: &GeneratedItem) -> Self {
        Self {
            set_id: set.set_id.clone(),
            owner_id: set.user_id.clone(),
            topic: Topic {
                level: set.level.clone(),
                subject: set.subject.clone(),
                chapter: set.chapter.clone(),
                unit: set.unit.clone(),
            },
            item: item.clone(),
        }
    }
}

/// Persistence for generated sets
#[async_trait]
pub trait GenerationStore: Send + Sync {
    async fn insert_set(&self, set: GeneratedSet) -> Result<()>;

    async fn find_by_item(&self, item_id: &str) -> Result<Option<GeneratedSet>>;

    /// Every set containing at least one of `item_ids`
    async fn find_by_items(&self, item_ids: &[String]) -> Result<Vec<GeneratedSet>>;
}

pub struct AnswerVault {
    store: Arc<dyn GenerationStore>,
}

impl AnswerVault {
    pub fn new(store: Arc<dyn GenerationStore>) -> Self {
        Self { store }
    }

    /// Assign ids to `drafts` and persist them as one set
    pub async fn store(
        &self,
        user_id: &str,
        topic: &Topic,
        difficulty: Difficulty,
        drafts: Vec<DraftItem>,
    ) -> Result<GeneratedSet> {
        let items = drafts
            .into_iter()
            .map(|draft| GeneratedItem {
                item_id: Uuid::new_v4().to_string(),
                question_number: draft.question_number,
                question: draft.question,
                options: draft.options,
                correct_answer: draft.correct_answer,
                explanation: draft.explanation,
                difficulty: draft.difficulty,
            })
            .collect::<Vec<_>>();

        let set = GeneratedSet {
            set_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            level: topic.level.clone(),
            subject: topic.subject.clone(),
            chapter: topic.chapter.clone(),
            unit: topic.unit.clone(),
            difficulty: difficulty.to_string(),
            items,
            generated_at: Utc::now(),
            ..Default::default()
        };

        self.store.insert_set(set.clone()).await?;

        info!(
            user_id = %user_id,
            set_id = %set.set_id,
            count = set.items.len(),
            "Stored generated question set"
        );

        Ok(set)
    }

    pub async fn lookup(&self, item_id: &str) -> Result<VaultEntry> {
        let set = self
            .store
            .find_by_item(item_id)
            .await?
            .ok_or_else(|| ExamdeskError::NotFound("MCQ not found".into()))?;

        set.item(item_id)
            .map(|item| VaultEntry::from_set(&set, item))
            .ok_or_else(|| ExamdeskError::NotFound("MCQ not found".into()))
    }

    /// Resolve many items at once; ids with no stored item are absent from the map
    pub async fn lookup_many(&self, item_ids: &[String]) -> Result<HashMap<String, VaultEntry>> {
        if item_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let sets = self.store.find_by_items(item_ids).await?;
        let mut entries = HashMap::with_capacity(item_ids.len());
        for set in &sets {
            for item in &set.items {
                if item_ids.contains(&item.item_id) {
                    entries.insert(item.item_id.clone(), VaultEntry::from_set(set, item));
                }
            }
        }
        Ok(entries)
    }
}

// =============================================================================
// In-memory implementation
// =============================================================================

#[derive(Default)]
struct GenerationIndex {
    sets: HashMap<String, GeneratedSet>,
    // item id -> set id
    items: HashMap<String, String>,
}

#[derive(Default)]
pub struct InMemoryGenerationStore {
    index: RwLock<GenerationIndex>,
}

impl InMemoryGenerationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_count(&self) -> usize {
        self.index.read().await.sets.len()
    }
}

#[async_trait]
impl GenerationStore for InMemoryGenerationStore {
    async fn insert_set(&self, set: GeneratedSet) -> Result<()> {
        let mut index = self.index.write().await;

        if index.sets.contains_key(&set.set_id)
            || set.items.iter().any(|i| index.items.contains_key(&i.item_id))
        {
            return Err(ExamdeskError::DuplicateSubmission("Record already exists".into()));
        }

        for item in &set.items {
            index.items.insert(item.item_id.clone(), set.set_id.clone());
        }
        index.sets.insert(set.set_id.clone(), set);
        Ok(())
    }

    async fn find_by_item(&self, item_id: &str) -> Result<Option<GeneratedSet>> {
        let index = self.index.read().await;
        Ok(index
            .items
            .get(item_id)
            .and_then(|set_id| index.sets.get(set_id))
            .cloned())
    }

    async fn find_by_items(&self, item_ids: &[String]) -> Result<Vec<GeneratedSet>> {
        let index = self.index.read().await;

        let mut set_ids: Vec<&String> = item_ids
            .iter()
            .filter_map(|id| index.items.get(id))
            .collect();
        set_ids.sort();
        set_ids.dedup();

        Ok(set_ids
            .into_iter()
            .filter_map(|id| index.sets.get(id).cloned())
            .collect())
    }
}

// =============================================================================
// MongoDB implementation
// =============================================================================

pub struct MongoGenerationStore {
    collection: MongoCollection<GeneratedSet>,
}

impl MongoGenerationStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: mongo.collection::<GeneratedSet>(GENERATION_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl GenerationStore for MongoGenerationStore {
    async fn insert_set(&self, set: GeneratedSet) -> Result<()> {
        self.collection.insert_one(set).await
    }

    async fn find_by_item(&self, item_id: &str) -> Result<Option<GeneratedSet>> {
        self.collection
            .find_one(doc! { "items.itemId": item_id })
            .await
    }

    async fn find_by_items(&self, item_ids: &[String]) -> Result<Vec<GeneratedSet>> {
        self.collection
            .find_many(
                doc! { "items.itemId": { "$in": item_ids.to_vec() } },
                doc! { "generatedAt": -1 },
                0,
                None,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drafts(n: usize) -> Vec<DraftItem> {
        (0..n)
            .map(|i| DraftItem {
                question_number: i as i32 + 1,
                question: format!("Question {}", i + 1),
                options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                correct_answer: "B".into(),
                explanation: "Because".into(),
                difficulty: "easy".into(),
            })
            .collect()
    }

    fn topic() -> Topic {
        Topic {
            level: "Foundation".into(),
            subject: "accounting".into(),
            chapter: "Depreciation".into(),
            unit: String::new(),
        }
    }

    #[tokio::test]
    async fn test_store_assigns_unique_ids() {
        let vault = AnswerVault::new(Arc::new(InMemoryGenerationStore::new()));
        let set = vault
            .store("u1", &topic(), Difficulty::Easy, drafts(3))
            .await
            .unwrap();

        assert_eq!(set.items.len(), 3);
        assert_eq!(set.difficulty, "easy");
        let mut ids: Vec<_> = set.items.iter().map(|i| i.item_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn test_lookup_returns_answer_key() {
        let vault = AnswerVault::new(Arc::new(InMemoryGenerationStore::new()));
        let set = vault
            .store("u1", &topic(), Difficulty::Easy, drafts(2))
            .await
            .unwrap();

        let entry = vault.lookup(&set.items[1].item_id).await.unwrap();
        assert_eq!(entry.item.correct_answer, "B");
        assert_eq!(entry.item.question, "Question 2");
        assert_eq!(entry.owner_id, "u1");
        assert_eq!(entry.topic.chapter, "Depreciation");

        let err = vault.lookup("missing").await.unwrap_err();
        assert!(matches!(err, ExamdeskError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_public_item_has_no_answer() {
        let vault = AnswerVault::new(Arc::new(InMemoryGenerationStore::new()));
        let set = vault
            .store("u1", &topic(), Difficulty::Easy, drafts(1))
            .await
            .unwrap();

        let public = PublicItem::from(&set.items[0]);
        let json = serde_json::to_value(&public).unwrap();
        assert_eq!(json["mcqId"], set.items[0].item_id.as_str());
        assert!(json.get("correctAnswer").is_none());
        assert!(json.get("explanation").is_none());
    }

    #[tokio::test]
    async fn test_lookup_many_across_sets() {
        let vault = AnswerVault::new(Arc::new(InMemoryGenerationStore::new()));
        let a = vault.store("u1", &topic(), Difficulty::Easy, drafts(2)).await.unwrap();
        let b = vault.store("u1", &topic(), Difficulty::Hard, drafts(2)).await.unwrap();

        let wanted = vec![
            a.items[0].item_id.clone(),
            b.items[1].item_id.clone(),
            "gone".to_string(),
        ];
        let entries = vault.lookup_many(&wanted).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[&b.items[1].item_id].set_id, b.set_id);
    }
}
