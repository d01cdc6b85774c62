//! HTTP client wrapper for the Qdrant collection backing the index.

use crate::config::Config;
use crate::index::types::{
    ChunkPoint, QdrantError, QueryPoint, QueryResponse, QueryResponseResult, ScoredChunk,
    ScrollResponse,
};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use std::collections::HashSet;
use time::OffsetDateTime;

/// Lightweight HTTP client scoped to one Qdrant collection.
pub struct QdrantCollection {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) collection: String,
    pub(crate) vector_size: u64,
}

impl QdrantCollection {
    /// Construct a new client from the server configuration.
    pub fn new(config: &Config) -> Result<Self, QdrantError> {
        let client = Client::builder().user_agent("docuchat/0.1").build()?;
        let base_url = normalize_base_url(&config.qdrant_url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            collection = %config.qdrant_collection_name,
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key: config.qdrant_api_key.clone(),
            collection: config.qdrant_collection_name.clone(),
            vector_size: config.embedding_dimension as u64,
        })
    }

    /// Create the collection only when it is missing from Qdrant.
    pub async fn ensure_collection(&self) -> Result<(), QdrantError> {
        if self.collection_exists().await? {
            return Ok(());
        }
        tracing::debug!(collection = %self.collection, "Creating collection");
        self.create_collection().await
    }

    /// Destroy and recreate the collection, discarding all entries. This is a
    /// structural operation: it needs no embedding capability and leaves the
    /// collection in a valid, queryable empty state.
    pub async fn recreate_collection(&self) -> Result<(), QdrantError> {
        let response = self
            .request(Method::DELETE, &format!("collections/{}", self.collection))?
            .send()
            .await?;
        // A missing collection is fine; reset must work from any state.
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QdrantError::UnexpectedStatus { status, body });
        }
        self.create_collection().await?;
        self.ensure_payload_indexes().await
    }

    /// Upload prepared chunk points. Point ids are fingerprint-derived, so
    /// re-sending an existing chunk upserts in place.
    pub async fn upsert_points(&self, points: Vec<ChunkPoint>) -> Result<usize, QdrantError> {
        if points.is_empty() {
            return Ok(0);
        }

        let now = current_timestamp_rfc3339();
        let serialized: Vec<_> = points
            .into_iter()
            .map(|point| {
                json!({
                    "id": point.fingerprint.point_id.to_string(),
                    "vector": point.vector,
                    "payload": {
                        "document": point.document,
                        "chunk_id": point.ordinal,
                        "fingerprint": point.fingerprint.hex,
                        "text": point.text,
                        "timestamp": now,
                    },
                })
            })
            .collect();

        let point_count = serialized.len();
        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/points", self.collection),
            )?
            .query(&[("wait", true)])
            .json(&json!({ "points": serialized }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, points = point_count, "Points indexed");
        })
        .await?;

        Ok(point_count)
    }

    /// Delete every point whose payload names `document`. Zero matches is a
    /// success: the document may never have been indexed.
    pub async fn delete_by_document(&self, document: &str) -> Result<(), QdrantError> {
        let body = json!({
            "filter": {
                "must": [
                    { "key": "document", "match": { "value": document } }
                ]
            }
        });

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/delete", self.collection),
            )?
            .query(&[("wait", true)])
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, document, "Document entries removed");
        })
        .await
    }

    /// Perform a similarity search, optionally returning stored vectors for
    /// diversity-aware re-ranking.
    pub async fn query(
        &self,
        vector: Vec<f32>,
        limit: usize,
        with_vectors: bool,
    ) -> Result<Vec<ScoredChunk>, QdrantError> {
        let body = json!({
            "query": vector,
            "limit": limit,
            "with_payload": true,
            "with_vector": with_vectors,
        });

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/query", self.collection),
            )?
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };

        Ok(points.into_iter().map(map_query_point).collect())
    }

    /// Collect the fingerprints already indexed for `document` by scrolling
    /// the collection's payloads.
    pub async fn existing_fingerprints(
        &self,
        document: &str,
    ) -> Result<HashSet<String>, QdrantError> {
        let filter = json!({
            "must": [
                { "key": "document", "match": { "value": document } }
            ]
        });

        let mut offset: Option<Value> = None;
        let mut fingerprints = HashSet::new();

        loop {
            let mut body = json!({
                "with_payload": ["fingerprint"],
                "with_vector": false,
                "limit": 512,
                "offset": offset.clone().unwrap_or(Value::Null),
                "filter": filter.clone(),
            });

            if offset.is_none() {
                if let Some(map) = body.as_object_mut() {
                    map.remove("offset");
                }
            }

            let response = self
                .request(
                    Method::POST,
                    &format!("collections/{}/points/scroll", self.collection),
                )?
                .json(&body)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection = %self.collection, error = %error, "Failed to scroll fingerprints");
                return Err(error);
            }

            let ScrollResponse { result } = response.json().await?;
            for point in result.points {
                if let Some(payload) = point.payload {
                    if let Some(Value::String(fingerprint)) = payload.get("fingerprint") {
                        fingerprints.insert(fingerprint.clone());
                    }
                }
            }

            match result.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(fingerprints)
    }

    /// Ensure payload indexes exist for the fields used in filters.
    pub async fn ensure_payload_indexes(&self) -> Result<(), QdrantError> {
        let fields: [(&str, &str); 2] = [("document", "keyword"), ("fingerprint", "keyword")];

        for (field, schema) in fields {
            let body = json!({
                "field_name": field,
                "field_schema": schema,
            });

            let response = self
                .request(
                    Method::PUT,
                    &format!("collections/{}/index", self.collection),
                )?
                .json(&body)
                .send()
                .await?;

            if response.status().is_success() || response.status() == StatusCode::CONFLICT {
                tracing::debug!(collection = %self.collection, field, schema, "Payload index ensured");
            } else {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::warn!(collection = %self.collection, field, error = %error, "Failed to ensure payload index");
            }
        }

        Ok(())
    }

    async fn collection_exists(&self) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))?
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection = %self.collection, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    async fn create_collection(&self) -> Result<(), QdrantError> {
        let body = json!({
            "vectors": {
                "size": self.vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{}", self.collection))?
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, "Collection created");
        })
        .await
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder, QdrantError> {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key {
            if !api_key.is_empty() {
                req = req.header("api-key", api_key);
            }
        }
        Ok(req)
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

fn map_query_point(point: QueryPoint) -> ScoredChunk {
    let QueryPoint {
        score,
        payload,
        vector,
    } = point;

    let mut document = String::new();
    let mut text = String::new();
    if let Some(mut map) = payload {
        if let Some(Value::String(value)) = map.remove("document") {
            document = value;
        }
        if let Some(Value::String(value)) = map.remove("text") {
            text = value;
        }
    }

    ScoredChunk {
        document,
        text,
        score,
        vector,
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

/// Current timestamp formatted for payload storage.
fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::types::compute_fingerprint;
    use httpmock::{Method::DELETE, Method::POST, Method::PUT, MockServer};

    fn collection_for(server: &MockServer) -> QdrantCollection {
        QdrantCollection {
            client: Client::builder()
                .user_agent("docuchat-test")
                .build()
                .expect("client"),
            base_url: server.base_url(),
            api_key: None,
            collection: "docs".into(),
            vector_size: 2,
        }
    }

    #[tokio::test]
    async fn query_parses_scored_chunks() {
        let server = MockServer::start_async().await;
        let service = collection_for(&server);

        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/docs/points/query");
                then.status(200).json_body(json!({
                    "status": "ok",
                    "time": 0.0,
                    "result": {
                        "points": [
                            {
                                "id": "11111111-2222-3333-4444-555555555555",
                                "score": 0.87,
                                "payload": {
                                    "document": "report",
                                    "chunk_id": 1,
                                    "text": "Revenue grew by 12%."
                                },
                                "vector": [0.6, 0.8]
                            }
                        ]
                    }
                }));
            })
            .await;

        let hits = service
            .query(vec![0.1, 0.2], 3, true)
            .await
            .expect("query");

        mock.assert();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document, "report");
        assert_eq!(hits[0].text, "Revenue grew by 12%.");
        assert!((hits[0].score - 0.87).abs() < f32::EPSILON);
        assert_eq!(hits[0].vector.as_deref(), Some(&[0.6, 0.8][..]));
    }

    #[tokio::test]
    async fn delete_by_document_filters_on_payload() {
        let server = MockServer::start_async().await;
        let service = collection_for(&server);

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/docs/points/delete")
                    .json_body_partial(
                        json!({
                            "filter": {
                                "must": [
                                    { "key": "document", "match": { "value": "report" } }
                                ]
                            }
                        })
                        .to_string(),
                    );
                then.status(200).json_body(json!({ "status": "ok", "result": {} }));
            })
            .await;

        service.delete_by_document("report").await.expect("delete");
        mock.assert();
    }

    #[tokio::test]
    async fn upsert_sends_fingerprint_derived_ids() {
        let server = MockServer::start_async().await;
        let service = collection_for(&server);
        let fingerprint = compute_fingerprint("report", "chunk text");
        let expected_id = fingerprint.point_id.to_string();

        let mock = server
            .mock_async(move |when, then| {
                when.method(PUT)
                    .path("/collections/docs/points")
                    .body_contains(&expected_id);
                then.status(200).json_body(json!({ "status": "ok", "result": {} }));
            })
            .await;

        let inserted = service
            .upsert_points(vec![ChunkPoint {
                fingerprint,
                document: "report".into(),
                ordinal: 1,
                text: "chunk text".into(),
                vector: vec![0.1, 0.2],
            }])
            .await
            .expect("upsert");

        mock.assert();
        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn recreate_tolerates_missing_collection() {
        let server = MockServer::start_async().await;
        let service = collection_for(&server);

        let delete_mock = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/collections/docs");
                then.status(404).body("not found");
            })
            .await;
        let create_mock = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/docs");
                then.status(200).json_body(json!({ "status": "ok", "result": true }));
            })
            .await;
        let index_mock = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/docs/index");
                then.status(200).json_body(json!({ "status": "ok", "result": {} }));
            })
            .await;

        service.recreate_collection().await.expect("recreate");
        delete_mock.assert();
        create_mock.assert();
        index_mock.assert_hits(2);
    }
}
