//! Collaborators outside the sync core.
//!
//! Authentication, room membership, user directories and document metadata
//! belong to the surrounding application. The core only talks to them
//! through these traits; the `Static*` and `Memory*` implementations back
//! tests and demos.

use crate::awareness::{filter_mentions, Identity};
use crate::document::{render_html, DocumentSnapshot, Schema};
use crate::error::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Turns an auth token into a user ID for one room.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, room: &str, token: &str) -> Result<String, TransportError>;
}

/// Who may join a room. Consulted once per connection.
#[async_trait]
pub trait MembershipResolver: Send + Sync {
    async fn members(&self, room: &str) -> Result<Vec<String>, TransportError>;
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Display identities for the given users; unknown IDs are skipped.
    async fn resolve(&self, user_ids: &[String]) -> Vec<Identity>;

    /// Users whose display name contains `query`, ignoring case.
    async fn mentions(&self, user_ids: &[String], query: &str) -> Vec<Identity> {
        let identities = self.resolve(user_ids).await;
        filter_mentions(&identities, query).into_iter().cloned().collect()
    }
}

/// Document metadata kept outside the operation log.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Markup a new room starts from, if any
    async fn initial_content(&self, room: &str) -> Option<String>;
    async fn title(&self, room: &str) -> Option<String>;
    async fn set_title(&self, room: &str, title: &str) -> Result<(), TransportError>;
}

/// Consumes a document snapshot, e.g. to produce an export format.
pub trait SnapshotExporter {
    type Output;

    fn export(&self, snapshot: &DocumentSnapshot) -> Self::Output;
}

/// Exports the document as HTML markup.
#[derive(Debug, Clone)]
pub struct HtmlExporter {
    schema: Schema,
}

impl HtmlExporter {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }
}

impl SnapshotExporter for HtmlExporter {
    type Output = String;

    fn export(&self, snapshot: &DocumentSnapshot) -> String {
        render_html(&self.schema, snapshot)
    }
}

/// Fixed token table.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorizer {
    tokens: HashMap<String, String>,
}

impl StaticAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authorize(&self, _room: &str, token: &str) -> Result<String, TransportError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| TransportError::AccessDenied("invalid token".into()))
    }
}

/// Fixed room membership.
#[derive(Debug, Clone, Default)]
pub struct StaticMembership {
    rooms: HashMap<String, Vec<String>>,
}

impl StaticMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(mut self, room: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.rooms.entry(room.into()).or_default().push(user_id.into());
        self
    }
}

#[async_trait]
impl MembershipResolver for StaticMembership {
    async fn members(&self, room: &str) -> Result<Vec<String>, TransportError> {
        Ok(self.rooms.get(room).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticIdentities {
    identities: HashMap<String, Identity>,
}

impl StaticIdentities {
    pub fn new(identities: impl IntoIterator<Item = Identity>) -> Self {
        Self {
            identities: identities
                .into_iter()
                .map(|identity| (identity.user_id.clone(), identity))
                .collect(),
        }
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentities {
    async fn resolve(&self, user_ids: &[String]) -> Vec<Identity> {
        user_ids
            .iter()
            .filter_map(|id| self.identities.get(id).cloned())
            .collect()
    }
}

#[derive(Debug, Default)]
struct RoomMetadata {
    initial_content: Option<String>,
    title: Option<String>,
}

/// Metadata held in memory.
#[derive(Debug, Default)]
pub struct MemoryMetadata {
    rooms: Mutex<HashMap<String, RoomMetadata>>,
}

impl MemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_content(self, room: impl Into<String>, markup: impl Into<String>) -> Self {
        self.rooms.lock().entry(room.into()).or_default().initial_content = Some(markup.into());
        self
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadata {
    async fn initial_content(&self, room: &str) -> Option<String> {
        self.rooms.lock().get(room).and_then(|m| m.initial_content.clone())
    }

    async fn title(&self, room: &str) -> Option<String> {
        self.rooms.lock().get(room).and_then(|m| m.title.clone())
    }

    async fn set_title(&self, room: &str, title: &str) -> Result<(), TransportError> {
        self.rooms.lock().entry(room.to_string()).or_default().title = Some(title.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Position;
    use crate::Replica;

    #[tokio::test]
    async fn test_static_authorizer() {
        let auth = StaticAuthorizer::new().with_token("t1", "alice");
        assert_eq!(auth.authorize("room", "t1").await.unwrap(), "alice");
        let err = auth.authorize("room", "nope").await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_mentions_filter_by_name() {
        let identities = StaticIdentities::new([
            Identity::new("1", "Grace Hopper"),
            Identity::new("2", "Alan Turing"),
        ]);
        let ids = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        assert_eq!(identities.resolve(&ids).await.len(), 2);

        let found = identities.mentions(&ids, "hop").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user_id, "1");
    }

    #[tokio::test]
    async fn test_memory_metadata_title() {
        let metadata = MemoryMetadata::new().with_initial_content("r", "<p>x</p>");
        assert_eq!(metadata.initial_content("r").await.as_deref(), Some("<p>x</p>"));
        assert!(metadata.title("r").await.is_none());
        metadata.set_title("r", "Plans").await.unwrap();
        assert_eq!(metadata.title("r").await.as_deref(), Some("Plans"));
    }

    #[test]
    fn test_html_exporter() {
        let mut replica = Replica::new("a").unwrap();
        let p = replica.insert_paragraph(&Position::root(0)).unwrap();
        replica
            .insert_text(&Position::new(crate::crdt::ParentRef::Node(p), 0), "hi")
            .unwrap();
        let html = HtmlExporter::new(replica.schema().clone()).export(&replica.snapshot());
        assert_eq!(html, "<p>hi</p>");
    }
}
