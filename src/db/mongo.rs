//! MongoDB connection and typed collections
//!
//! Each schema declares its indexes through [`IntoIndexes`]. Opening a
//! collection applies them, so a fresh database needs no migration step.

use bson::{doc, DateTime, Document};
use futures_util::TryStreamExt;
use mongodb::{
    options::{ClientOptions, IndexOptions, ReturnDocument, UpdateModifications},
    results::UpdateResult,
    Client, Collection, Database, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::db::schemas::Metadata;
use crate::types::{ExamdeskError, Result};

/// Server selection and connect timeout unless the URI sets its own
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Index definitions declared by a schema
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Access to a document's embedded [`Metadata`]
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// A type that can live in a [`MongoCollection`]
pub trait Schema:
    Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata
{
}

impl<T> Schema for T where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata
{
}

/// Named secondary index
pub fn index(keys: Document, name: &str) -> (Document, Option<IndexOptions>) {
    (keys, Some(IndexOptions::builder().name(name.to_string()).build()))
}

/// Named unique index
pub fn unique_index(keys: Document, name: &str) -> (Document, Option<IndexOptions>) {
    (
        keys,
        Some(
            IndexOptions::builder()
                .unique(true)
                .name(name.to_string())
                .build(),
        ),
    )
}

/// Unique index over documents matching `filter` only
pub fn partial_unique_index(
    keys: Document,
    filter: Document,
    name: &str,
) -> (Document, Option<IndexOptions>) {
    (
        keys,
        Some(
            IndexOptions::builder()
                .unique(true)
                .partial_filter_expression(filter)
                .name(name.to_string())
                .build(),
        ),
    )
}

fn db_error(op: &'static str) -> impl Fn(mongodb::error::Error) -> ExamdeskError {
    move |e| ExamdeskError::Database(format!("{} failed: {}", op, e))
}

#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db: Database,
}

impl MongoClient {
    /// Connect and ping. Fails within a few seconds when the server is unreachable.
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!(database = db_name, "Connecting to MongoDB");

        let mut options = ClientOptions::parse(uri).await.map_err(db_error("URI parse"))?;
        options.server_selection_timeout.get_or_insert(CONNECT_TIMEOUT);
        options.connect_timeout.get_or_insert(CONNECT_TIMEOUT);
        options.app_name.get_or_insert_with(|| "examdesk".to_string());

        let client = Client::with_options(options).map_err(db_error("Connect"))?;
        let db = client.database(db_name);
        let mongo = Self { client, db };
        mongo.ping().await?;

        info!(database = db_name, "Connected to MongoDB");
        Ok(mongo)
    }

    pub async fn ping(&self) -> Result<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(db_error("Ping"))?;
        Ok(())
    }

    /// Open a typed collection, creating its indexes
    pub async fn collection<T: Schema>(&self, name: &str) -> Result<MongoCollection<T>> {
        let collection = MongoCollection {
            inner: self.db.collection::<T>(name),
        };
        collection.apply_indexes().await?;
        Ok(collection)
    }

    pub async fn shutdown(self) {
        self.client.shutdown().await;
        info!("MongoDB connections closed");
    }
}

/// Collection of `T` documents
#[derive(Debug, Clone)]
pub struct MongoCollection<T: Send + Sync> {
    inner: Collection<T>,
}

impl<T: Schema> MongoCollection<T> {
    async fn apply_indexes(&self) -> Result<()> {
        let models: Vec<IndexModel> = T::into_indices()
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();
        if models.is_empty() {
            return Ok(());
        }

        let count = models.len();
        self.inner
            .create_indexes(models)
            .await
            .map_err(db_error("Index creation"))?;
        debug!(collection = self.inner.name(), indexes = count, "Indexes ensured");
        Ok(())
    }

    /// Insert with fresh metadata timestamps.
    ///
    /// A unique index violation surfaces as [`ExamdeskError::DuplicateSubmission`].
    pub async fn insert_one(&self, mut item: T) -> Result<()> {
        item.mut_metadata().touch_new(DateTime::now());
        self.inner.insert_one(item).await?;
        Ok(())
    }

    pub async fn find_one(&self, filter: Document) -> Result<Option<T>> {
        self.find_first(filter, None).await
    }

    /// First match in `sort` order
    pub async fn find_first(&self, filter: Document, sort: Option<Document>) -> Result<Option<T>> {
        let mut action = self.inner.find_one(filter);
        if let Some(sort) = sort {
            action = action.sort(sort);
        }
        action.await.map_err(db_error("Find"))
    }

    /// One page of matches in `sort` order
    pub async fn find_many(
        &self,
        filter: Document,
        sort: Document,
        skip: u64,
        limit: Option<i64>,
    ) -> Result<Vec<T>> {
        let mut action = self.inner.find(filter).sort(sort).skip(skip);
        if let Some(limit) = limit {
            action = action.limit(limit);
        }

        let cursor = action.await.map_err(db_error("Find"))?;
        cursor
            .try_collect::<Vec<T>>()
            .await
            .map_err(db_error("Cursor read"))
    }

    pub async fn count(&self, filter: Document) -> Result<u64> {
        self.inner
            .count_documents(filter)
            .await
            .map_err(db_error("Count"))
    }

    pub async fn update_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult> {
        self.inner
            .update_one(filter, update.into())
            .await
            .map_err(db_error("Update"))
    }

    /// Update, inserting when nothing matches. Duplicate-key races surface as
    /// [`ExamdeskError::DuplicateSubmission`].
    pub async fn upsert_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult> {
        Ok(self
            .inner
            .update_one(filter, update.into())
            .upsert(true)
            .await?)
    }

    /// Update atomically and return the document as modified
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<Option<T>> {
        self.inner
            .find_one_and_update(filter, update.into())
            .return_document(ReturnDocument::After)
            .await
            .map_err(db_error("Update"))
    }
}
