//! # Identity Record
//!
//! Data captured by the external KYC collaborator. This module performs no
//! extraction: OCR and biometric matching happen elsewhere and arrive here
//! as [`ExtractedData`]. The only rule enforced is completeness. A record
//! can complete KYC once it names the person and their identity document.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use veil_core::{EmailAddress, PhoneNumber, Timestamp};

/// KYC completion attempted with required fields missing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KycError {
    /// The record lacks fields required for completion.
    #[error("identity record incomplete, missing: {}", missing.join(", "))]
    IncompleteData {
        /// Names of the missing fields.
        missing: Vec<&'static str>,
    },
}

/// Kind of captured document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// National identity card.
    NationalId,
    /// Passport data page.
    Passport,
    /// Driving licence.
    DriversLicense,
    /// Liveness selfie.
    Selfie,
    /// Utility bill or similar.
    ProofOfAddress,
}

/// Structured fields extracted from documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedData {
    /// Full legal name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    /// Government identity-document number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_number: Option<String>,
    /// Date of birth.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    /// Residential address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl ExtractedData {
    /// Overlay `newer` onto `self`: fields present in `newer` win.
    pub fn merge(&mut self, newer: ExtractedData) {
        if newer.full_name.is_some() {
            self.full_name = newer.full_name;
        }
        if newer.id_number.is_some() {
            self.id_number = newer.id_number;
        }
        if newer.date_of_birth.is_some() {
            self.date_of_birth = newer.date_of_birth;
        }
        if newer.address.is_some() {
            self.address = newer.address;
        }
    }
}

/// What the capture collaborator hands over for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPayload {
    /// Opaque reference to the stored document (blob key, URI, ...).
    pub reference: String,
    /// Fields extracted from this document, if any.
    pub extracted: Option<ExtractedData>,
}

/// A captured document reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentCapture {
    /// Document kind.
    pub kind: DocumentKind,
    /// Opaque reference to the stored document.
    pub reference: String,
    /// When it was captured.
    pub captured_at: Timestamp,
}

/// Identity data for one onboarding session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Phone number the user verified.
    pub phone_number: Option<PhoneNumber>,
    /// Contact email.
    pub email: Option<EmailAddress>,
    /// Captured documents, in capture order.
    #[serde(default)]
    pub documents: Vec<DocumentCapture>,
    /// Structured fields from the extraction collaborator.
    pub extracted_data: Option<ExtractedData>,
    /// Set when KYC completion succeeds.
    #[serde(default)]
    pub verified: bool,
    /// When KYC completion succeeded.
    pub verification_date: Option<Timestamp>,
}

impl IdentityRecord {
    /// Record a captured document and merge any extracted fields.
    ///
    /// A new capture invalidates an earlier verification.
    pub fn capture_document(&mut self, kind: DocumentKind, payload: DocumentPayload, at: Timestamp) {
        self.documents.push(DocumentCapture {
            kind,
            reference: payload.reference,
            captured_at: at,
        });
        if let Some(extracted) = payload.extracted {
            self.extracted_data
                .get_or_insert_with(ExtractedData::default)
                .merge(extracted);
        }
        self.verified = false;
        self.verification_date = None;
    }

    /// Names of required fields that are absent or blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        let mut missing = Vec::new();
        match &self.extracted_data {
            None => {
                missing.push("full_name");
                missing.push("id_number");
            }
            Some(data) => {
                if blank(&data.full_name) {
                    missing.push("full_name");
                }
                if blank(&data.id_number) {
                    missing.push("id_number");
                }
            }
        }
        missing
    }

    /// Whether the record may complete KYC. Pure.
    pub fn validate(&self) -> Result<(), KycError> {
        let missing = self.missing_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(KycError::IncompleteData { missing })
        }
    }

    /// Mark the record verified at `at`.
    pub(crate) fn mark_verified(&mut self, at: Timestamp) {
        self.verified = true;
        self.verification_date = Some(at);
    }
}
