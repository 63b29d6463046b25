use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::request::status::{RequestStatus, SignStatus};

/// A batch of generated documents moving through the signature workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningRequest {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// File name of the template under the templates directory.
    pub template: String,
    pub status: RequestStatus,
    pub created_by: String,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub delegated_to: Option<String>,
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub document_count: Option<usize>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SigningRequest {
    pub fn new(id: impl Into<String>, template: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            template: template.into(),
            status: RequestStatus::Unsigned,
            created_by: created_by.into(),
            assigned_to: None,
            delegated_to: None,
            documents: Vec::new(),
            document_count: None,
            rejection_reason: None,
            updated_by: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn with_document(mut self, document: Document) -> Self {
        self.documents.push(document);
        self
    }

    pub fn document(&self, document_id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == document_id)
    }

    pub fn rejected_count(&self) -> usize {
        self.documents
            .iter()
            .filter(|d| d.sign_status == SignStatus::Rejected)
            .count()
    }

    pub fn signed_count(&self) -> usize {
        self.documents
            .iter()
            .filter(|d| d.sign_status == SignStatus::Signed)
            .count()
    }
}

/// One signable unit inside a request. Owned by its request and never
/// referenced from outside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub template_data: BTreeMap<String, String>,
    #[serde(default)]
    pub sign_status: SignStatus,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub signed_artifact_path: Option<String>,
    #[serde(default)]
    pub qr_artifact_path: Option<String>,
    #[serde(default)]
    pub signed_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            template_data: BTreeMap::new(),
            sign_status: SignStatus::Unsigned,
            rejection_reason: None,
            rejected_at: None,
            signed_artifact_path: None,
            qr_artifact_path: None,
            signed_at: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.template_data.insert(key.into(), value.into());
        self
    }

    pub fn rejected(mut self, reason: impl Into<String>) -> Self {
        self.sign_status = SignStatus::Rejected;
        self.rejection_reason = Some(reason.into());
        self.rejected_at = Some(Utc::now());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Court {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Officer,
    Reader,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Officer => write!(f, "officer"),
            Role::Reader => write!(f, "reader"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub role: Role,
}

/// A stored signature image. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub id: String,
    pub user_id: String,
    /// Path relative to the signatures directory, or absolute.
    pub image_path: String,
}
