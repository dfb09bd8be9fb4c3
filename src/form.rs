//! Intake form: raw field values and their validation into a
//! [`SubmissionPayload`].
//!
//! Validation runs before any network call. A failure names the first
//! offending field and no request is sent.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::model::{Gender, ImageFile, SubmissionPayload};
use crate::multipart::Field;

/// Validation failures, in form order.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Patient name is required.")]
    MissingName,

    #[error("Patient ID is required.")]
    MissingPatientId,

    #[error("Age is required.")]
    MissingAge,

    #[error("Age must be a whole number of years, got '{0}'.")]
    InvalidAge(String),

    #[error("Gender is required.")]
    MissingGender,

    #[error("Unknown gender '{0}'. Use Male, Female or Other.")]
    InvalidGender(String),

    #[error("Choose an X-ray image to upload.")]
    MissingImage,

    #[error("'{0}' is not an image file.")]
    NotAnImage(String),
}

/// Raw values as typed into the form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormInput {
    pub patient_name: String,
    pub patient_id: String,
    pub age: String,
    pub gender: String,
    pub file: Option<ImageFile>,
}

impl FormInput {
    /// Build input from decoded form-data fields. Unknown fields are ignored.
    pub fn from_fields(fields: Vec<Field>) -> Self {
        let mut input = Self::default();
        for field in fields {
            match field.name.as_str() {
                "patientName" => input.patient_name = field.text().into_owned(),
                "patientId" => input.patient_id = field.text().into_owned(),
                "patientAge" => input.age = field.text().into_owned(),
                "patientGender" => input.gender = field.text().into_owned(),
                "file" => input.file = field.into_image(),
                _ => {}
            }
        }
        input
    }

    /// Check every field and produce a payload. The preview URL is left empty
    /// for the workspace to fill in.
    pub fn validate(&self) -> Result<SubmissionPayload, ValidationError> {
        let patient_name = self.patient_name.trim();
        if patient_name.is_empty() {
            return Err(ValidationError::MissingName);
        }

        let patient_id = self.patient_id.trim();
        if patient_id.is_empty() {
            return Err(ValidationError::MissingPatientId);
        }

        let age = self.age.trim();
        if age.is_empty() {
            return Err(ValidationError::MissingAge);
        }
        let age: u32 = age
            .parse()
            .map_err(|_| ValidationError::InvalidAge(age.to_string()))?;

        let gender = self.gender.trim();
        if gender.is_empty() {
            return Err(ValidationError::MissingGender);
        }
        let gender = Gender::parse(gender).ok_or_else(|| ValidationError::InvalidGender(gender.to_string()))?;

        let file = match &self.file {
            Some(file) if !file.file_name.is_empty() && !file.is_empty() => file.clone(),
            _ => return Err(ValidationError::MissingImage),
        };
        if !file.content_type.starts_with("image/") {
            return Err(ValidationError::NotAnImage(file.file_name));
        }

        Ok(SubmissionPayload {
            patient_name: patient_name.to_string(),
            patient_id: patient_id.to_string(),
            age,
            gender,
            file,
            preview_url: String::new(),
        })
    }
}

/// Read an image from disk, guessing its MIME type from the extension.
pub fn load_image(path: &Path) -> Result<ImageFile> {
    let bytes = fs::read(path).with_context(|| format!("failed to read image {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("not a file path: {}", path.display()))?;
    let content_type = mime_guess::from_path(path).first_or_octet_stream().essence_str().to_string();
    Ok(ImageFile::new(file_name, content_type, bytes))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
