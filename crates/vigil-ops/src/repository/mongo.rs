//! MongoDB repository implementation.
//!
//! Records live in a single collection (default
//! `long-running-operations`). Every mutation runs its
//! read-validate-write sequence inside a client-session transaction so
//! concurrent transitions against the same record are totally ordered
//! by the storage layer.
//!
//! ## Document layout
//!
//! - `_id`: ObjectId (hex wire form)
//! - `createTime` / `lastUpdate`: BSON datetimes
//! - `ttl` / `gracePeriod`: int64 milliseconds
//! - `state`: snake_case string
//! - `success` / `error`: at most one present; a record carrying both
//!   fails projection with a decode error

use std::collections::HashMap;

use async_trait::async_trait;
use bson::{Document, doc, oid::ObjectId};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::options::ReturnDocument;
use mongodb::{Client, ClientSession, Collection, options::ClientOptions};
use serde::{Deserialize, Serialize};

use vigil_core::{Error, OperationId, Result};

use super::{
    CompleteOperation, OperationFilter, RegisterOperation, Repository, UpdateField,
    UpdateOperation, generate_auth_token,
};
use crate::operation::{
    DEFAULT_GRACE_PERIOD, DEFAULT_TTL, Operation, OperationOutcome, OperationSnapshot,
    OperationState,
};

/// Default collection name for operation records.
pub const DEFAULT_COLLECTION: &str = "long-running-operations";

/// MongoDB-backed [`Repository`] implementation.
#[derive(Debug, Clone)]
pub struct MongoRepository {
    client: Client,
    collection: Collection<OperationDocument>,
}

/// The persisted shape of an operation record.
#[derive(Debug, Serialize, Deserialize)]
struct OperationDocument {
    #[serde(rename = "_id")]
    id: ObjectId,
    #[serde(rename = "createTime")]
    create_time: bson::DateTime,
    #[serde(rename = "lastUpdate")]
    last_update: bson::DateTime,
    owner: String,
    creator: String,
    state: OperationState,
    /// Milliseconds.
    ttl: i64,
    /// Milliseconds.
    #[serde(rename = "gracePeriod")]
    grace_period: i64,
    description: String,
    kind: String,
    #[serde(default)]
    parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    annotations: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    success: Option<SuccessDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDocument>,
    #[serde(rename = "authToken")]
    auth_token: String,
    #[serde(rename = "percentDone", default)]
    percent_done: i32,
    #[serde(rename = "statusMessage", default)]
    status_message: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SuccessDocument {
    #[serde(default)]
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorDocument {
    #[serde(default)]
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl OperationDocument {
    fn from_operation(op: &Operation) -> Result<Self> {
        let (success, error) = match &op.outcome {
            Some(OperationOutcome::Success(s)) => (
                Some(SuccessDocument {
                    message: s.message.clone(),
                    result: s.result.clone(),
                }),
                None,
            ),
            Some(OperationOutcome::Error(e)) => (
                None,
                Some(ErrorDocument {
                    message: e.message.clone(),
                    details: e.details.clone(),
                }),
            ),
            None => (None, None),
        };

        Ok(Self {
            id: op.id.as_object_id(),
            create_time: bson::DateTime::from_chrono(op.create_time),
            last_update: bson::DateTime::from_chrono(op.last_update),
            owner: op.owner.clone(),
            creator: op.creator.clone(),
            state: op.state,
            ttl: duration_to_millis(op.ttl)?,
            grace_period: duration_to_millis(op.grace_period)?,
            description: op.description.clone(),
            kind: op.kind.clone(),
            parameters: op.parameters.clone(),
            annotations: op.annotations.clone(),
            success,
            error,
            auth_token: op.auth_token.clone(),
            percent_done: op.percent_done,
            status_message: op.status_message.clone(),
        })
    }

    /// Projects the document to the domain entity.
    ///
    /// Refuses records that carry both result variants.
    fn into_operation(self) -> Result<Operation> {
        let outcome = match (self.success, self.error) {
            (Some(_), Some(_)) => {
                return Err(Error::decode(format!(
                    "operation {} has both success and error results",
                    self.id.to_hex()
                )));
            }
            (Some(s), None) => Some(OperationOutcome::Success(crate::operation::SuccessOutcome {
                message: s.message,
                result: s.result,
            })),
            (None, Some(e)) => Some(OperationOutcome::Error(crate::operation::ErrorOutcome {
                message: e.message,
                details: e.details,
            })),
            (None, None) => None,
        };

        Ok(Operation {
            id: OperationId::from_object_id(self.id),
            create_time: self.create_time.to_chrono(),
            last_update: self.last_update.to_chrono(),
            owner: self.owner,
            creator: self.creator,
            state: self.state,
            ttl: millis_to_duration(self.ttl),
            grace_period: millis_to_duration(self.grace_period),
            description: self.description,
            kind: self.kind,
            parameters: self.parameters,
            annotations: self.annotations,
            outcome,
            auth_token: self.auth_token,
            percent_done: self.percent_done,
            status_message: self.status_message,
        })
    }
}

fn duration_to_millis(value: std::time::Duration) -> Result<i64> {
    i64::try_from(value.as_millis())
        .map_err(|_| Error::invalid_argument("duration exceeds the representable range"))
}

fn millis_to_duration(ms: i64) -> std::time::Duration {
    std::time::Duration::from_millis(ms.max(0).unsigned_abs())
}

fn storage_err(err: mongodb::error::Error) -> Error {
    Error::storage_with_source("mongodb operation failed", err)
}

impl MongoRepository {
    /// Connects to MongoDB and targets the default collection.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the URL cannot be parsed or the
    /// client cannot be constructed.
    pub async fn connect(url: &str, database: &str) -> Result<Self> {
        let options = ClientOptions::parse(url).await.map_err(storage_err)?;
        let client = Client::with_options(options).map_err(storage_err)?;
        Ok(Self::with_client(client, database))
    }

    /// Creates a repository over an existing client.
    #[must_use]
    pub fn with_client(client: Client, database: &str) -> Self {
        Self::with_collection(client, database, DEFAULT_COLLECTION)
    }

    /// Creates a repository over an existing client and a custom
    /// collection name.
    #[must_use]
    pub fn with_collection(client: Client, database: &str, collection: &str) -> Self {
        let collection = client.database(database).collection(collection);
        Self { client, collection }
    }

    /// Loads a record inside a session and validates the mutation
    /// against it.
    async fn load_for_update(
        &self,
        session: &mut ClientSession,
        id: &OperationId,
        auth_token: &str,
    ) -> Result<Operation> {
        let operation = self.load_in_session(session, id).await?;
        operation.ensure_updatable(auth_token)?;
        Ok(operation)
    }

    async fn load_in_session(
        &self,
        session: &mut ClientSession,
        id: &OperationId,
    ) -> Result<Operation> {
        let document = self
            .collection
            .find_one(doc! { "_id": id.as_object_id() })
            .session(&mut *session)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| Error::not_found(id))?;

        document.into_operation()
    }

    /// Applies a `$set` document and returns the post-update record.
    async fn find_and_update(
        &self,
        session: &mut ClientSession,
        id: &OperationId,
        set: Document,
    ) -> Result<Operation> {
        let document = self
            .collection
            .find_one_and_update(doc! { "_id": id.as_object_id() }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .session(&mut *session)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| Error::not_found(id))?;

        document.into_operation()
    }

    /// Finds all matching records, newest first.
    ///
    /// A record that fails projection fails the whole call; the error
    /// names the offending record.
    async fn find_projected(&self, filter: Document) -> Result<Vec<OperationSnapshot>> {
        let raw = self.collection.clone_with_type::<Document>();
        let mut cursor = raw
            .find(filter)
            .sort(doc! { "createTime": -1 })
            .await
            .map_err(storage_err)?;

        let mut snapshots = Vec::new();
        while let Some(document) = cursor.try_next().await.map_err(storage_err)? {
            let id = document
                .get_object_id("_id")
                .map(|oid| oid.to_hex())
                .unwrap_or_else(|_| "<missing _id>".to_string());

            let operation = bson::from_document::<OperationDocument>(document)
                .map_err(|err| {
                    Error::decode(format!("failed to decode operation {id}: {err}"))
                })?
                .into_operation()?;
            snapshots.push(operation.snapshot());
        }

        Ok(snapshots)
    }

    /// Opens a session with a started transaction.
    async fn begin_transaction(&self) -> Result<ClientSession> {
        let mut session = self.client.start_session().await.map_err(storage_err)?;
        session.start_transaction().await.map_err(storage_err)?;
        Ok(session)
    }

    /// Commits on success, aborts on error, passing the result through.
    async fn finish_transaction<T>(
        &self,
        mut session: ClientSession,
        result: Result<T>,
    ) -> Result<T> {
        match result {
            Ok(value) => {
                session.commit_transaction().await.map_err(storage_err)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    tracing::warn!(error = %abort_err, "failed to abort transaction");
                }
                Err(err)
            }
        }
    }

    async fn update_in_session(
        &self,
        session: &mut ClientSession,
        req: &UpdateOperation,
        set: Document,
    ) -> Result<OperationSnapshot> {
        self.load_for_update(session, &req.id, &req.auth_token)
            .await?;
        let updated = self.find_and_update(session, &req.id, set).await?;
        Ok(updated.snapshot())
    }

    async fn complete_in_session(
        &self,
        session: &mut ClientSession,
        id: &OperationId,
        auth_token: &str,
        set: Document,
    ) -> Result<OperationSnapshot> {
        self.load_for_update(session, id, auth_token).await?;
        let updated = self.find_and_update(session, id, set).await?;
        Ok(updated.snapshot())
    }

    async fn mark_lost_in_session(
        &self,
        session: &mut ClientSession,
        id: &OperationId,
        set: Document,
    ) -> Result<OperationSnapshot> {
        let operation = self.load_in_session(session, id).await?;
        if operation.is_terminal() {
            return Err(Error::OperationCompleted { id: id.to_hex() });
        }

        let updated = self.find_and_update(session, id, set).await?;
        Ok(updated.snapshot())
    }
}

#[async_trait]
impl Repository for MongoRepository {
    async fn register(&self, req: RegisterOperation) -> Result<(OperationId, String)> {
        let auth_token = generate_auth_token()?;
        let id = OperationId::generate();
        let now = Utc::now();

        let operation = Operation {
            id,
            create_time: now,
            last_update: now,
            owner: req.owner,
            creator: req.creator,
            state: req.initial_state.or_pending(),
            ttl: req.ttl.unwrap_or(DEFAULT_TTL),
            grace_period: req.grace_period.unwrap_or(DEFAULT_GRACE_PERIOD),
            description: req.description,
            kind: req.kind,
            parameters: req.parameters,
            annotations: req.annotations,
            outcome: None,
            auth_token: auth_token.clone(),
            percent_done: 0,
            status_message: String::new(),
        };

        let document = OperationDocument::from_operation(&operation)?;
        self.collection
            .insert_one(&document)
            .await
            .map_err(storage_err)?;

        Ok((id, auth_token))
    }

    async fn get(&self, id: &OperationId) -> Result<OperationSnapshot> {
        let document = self
            .collection
            .find_one(doc! { "_id": id.as_object_id() })
            .await
            .map_err(storage_err)?
            .ok_or_else(|| Error::not_found(id))?;

        Ok(document.into_operation()?.snapshot())
    }

    async fn query(&self, filter: OperationFilter) -> Result<Vec<OperationSnapshot>> {
        let mut document = Document::new();

        if let Some(creator) = filter.creator.as_deref().filter(|c| !c.is_empty()) {
            document.insert("creator", creator);
        }
        if let Some(owner) = filter.owner.as_deref().filter(|o| !o.is_empty()) {
            document.insert("owner", owner);
        }
        if let Some(state) = filter.effective_state() {
            document.insert("state", state.as_str());
        }
        if let Some(kind) = filter.kind.as_deref().filter(|k| !k.is_empty()) {
            document.insert("kind", kind);
        }

        self.find_projected(document).await
    }

    async fn get_active_operations(&self) -> Result<Vec<OperationSnapshot>> {
        self.find_projected(doc! { "state": OperationState::Running.as_str() })
            .await
    }

    async fn update(&self, req: UpdateOperation) -> Result<OperationSnapshot> {
        let fields = UpdateField::parse_mask(&req.update_mask)?;

        let mut set = doc! { "lastUpdate": bson::DateTime::from_chrono(Utc::now()) };
        for field in &fields {
            match field {
                UpdateField::Running => {
                    let state = if req.running {
                        OperationState::Running
                    } else {
                        OperationState::Pending
                    };
                    set.insert("state", state.as_str());
                }
                UpdateField::Annotations => {
                    let annotations = bson::to_bson(&req.annotations)
                        .map_err(|e| Error::decode(format!("invalid annotations: {e}")))?;
                    set.insert("annotations", annotations);
                }
            }
        }

        let mut session = self.begin_transaction().await?;
        let result = self.update_in_session(&mut session, &req, set).await;
        self.finish_transaction(session, result).await
    }

    async fn complete(&self, req: CompleteOperation) -> Result<OperationSnapshot> {
        let id = req.id;
        let auth_token = req.auth_token.clone();
        let outcome = req.take_outcome()?;

        let mut set = doc! {
            "lastUpdate": bson::DateTime::from_chrono(Utc::now()),
            "state": OperationState::Complete.as_str(),
        };
        match &outcome {
            OperationOutcome::Success(success) => {
                let value = bson::to_bson(success)
                    .map_err(|e| Error::decode(format!("invalid success result: {e}")))?;
                set.insert("success", value);
            }
            OperationOutcome::Error(error) => {
                let value = bson::to_bson(error)
                    .map_err(|e| Error::decode(format!("invalid error result: {e}")))?;
                set.insert("error", value);
            }
        }

        let mut session = self.begin_transaction().await?;
        let result = self
            .complete_in_session(&mut session, &id, &auth_token, set)
            .await;
        self.finish_transaction(session, result).await
    }

    async fn mark_lost(&self, id: &OperationId) -> Result<OperationSnapshot> {
        let set = doc! {
            "lastUpdate": bson::DateTime::from_chrono(Utc::now()),
            "state": OperationState::Lost.as_str(),
        };

        let mut session = self.begin_transaction().await?;
        let result = self.mark_lost_in_session(&mut session, id, set).await;
        self.finish_transaction(session, result).await
    }
}
