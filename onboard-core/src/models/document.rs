use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::blob::BlobRef;
use crate::error::FailureKind;

/// Kind of KYC/KYB document a user uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Passport,
    IdCard,
    UtilityBill,
    BusinessRegistration,
    BankStatement,
    Other,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Passport => "passport",
            DocumentType::IdCard => "id_card",
            DocumentType::UtilityBill => "utility_bill",
            DocumentType::BusinessRegistration => "business_registration",
            DocumentType::BankStatement => "bank_statement",
            DocumentType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "passport" => Some(DocumentType::Passport),
            "id_card" => Some(DocumentType::IdCard),
            "utility_bill" => Some(DocumentType::UtilityBill),
            "business_registration" => Some(DocumentType::BusinessRegistration),
            "bank_statement" => Some(DocumentType::BankStatement),
            "other" => Some(DocumentType::Other),
            _ => None,
        }
    }

    /// Fields that must be resolved before a document of this type counts
    /// as extracted.
    pub fn mandatory_fields(&self) -> &'static [&'static str] {
        match self {
            DocumentType::Passport => &[
                "full_name",
                "passport_number",
                "nationality",
                "date_of_birth",
                "expiry_date",
            ],
            DocumentType::IdCard => &["full_name", "id_number", "date_of_birth"],
            DocumentType::UtilityBill => {
                &["account_holder", "service_provider", "billing_date", "address"]
            }
            DocumentType::BusinessRegistration => {
                &["business_name", "registration_number", "registration_date"]
            }
            DocumentType::BankStatement => &["account_holder", "account_number", "bank_name"],
            DocumentType::Other => &[],
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a document.
///
/// ```text
/// uploaded ──► extracting ──► extracted
///                  │   ▲          │
///                  ▼   └──────────┤ (reprocess)
///                failed ──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Uploaded,
    Extracting,
    Extracted,
    Failed,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Uploaded => "uploaded",
            DocumentState::Extracting => "extracting",
            DocumentState::Extracted => "extracted",
            DocumentState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(DocumentState::Uploaded),
            "extracting" => Some(DocumentState::Extracting),
            "extracted" => Some(DocumentState::Extracted),
            "failed" => Some(DocumentState::Failed),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: DocumentState) -> bool {
        use DocumentState::*;
        matches!(
            (self, next),
            (Uploaded, Extracting)
                | (Extracting, Extracted)
                | (Extracting, Failed)
                | (Failed, Extracting)
                | (Extracted, Extracting)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentState::Extracted | DocumentState::Failed)
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an extracted value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldProvenance {
    Ocr,
    LlmCorrected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    pub value: String,
    pub confidence: f64,
    pub provenance: FieldProvenance,
}

/// Output of one extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSet {
    pub fields: BTreeMap<String, ExtractedField>,
    /// Mandatory fields the pass could not resolve.
    pub unresolved: Vec<String>,
}

impl FieldSet {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ExtractedField> {
        self.fields.get(name)
    }
}

/// Structured failure detail stored on a failed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub user_id: Uuid,
    pub document_type: DocumentType,
    pub file_name: String,
    pub content_type: String,
    pub blob_ref: BlobRef,
    pub state: DocumentState,
    pub attempts: u32,
    pub fields: Option<FieldSet>,
    pub failure: Option<FailureReason>,
    pub uploaded_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        user_id: Uuid,
        document_type: DocumentType,
        file_name: String,
        content_type: String,
        blob_ref: BlobRef,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            document_type,
            file_name,
            content_type,
            blob_ref,
            state: DocumentState::Uploaded,
            attempts: 0,
            fields: None,
            failure: None,
            uploaded_at: now,
            processing_started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Field set of a successfully extracted document.
    pub fn extracted_fields(&self) -> Option<&FieldSet> {
        match self.state {
            DocumentState::Extracted => self.fields.as_ref(),
            _ => None,
        }
    }
}
