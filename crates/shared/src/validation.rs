//! Client-side validation of user-entered payloads.

use serde::{Deserialize, Serialize};

use crate::models::{NewLabRequest, NewPrescription, StockAdjustment};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub trait Validate {
    /// Collect every problem rather than stopping at the first.
    fn validate(&self) -> Result<(), Vec<FieldError>>;
}

fn require(errors: &mut Vec<FieldError>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, "is required"));
    }
}

fn finish(errors: Vec<FieldError>) -> Result<(), Vec<FieldError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

impl Validate for NewPrescription {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        require(&mut errors, "patientId", &self.patient_id);
        require(&mut errors, "drugName", &self.drug_name);
        require(&mut errors, "dosage", &self.dosage);
        if self.quantity == 0 {
            errors.push(FieldError::new("quantity", "must be at least 1"));
        }
        finish(errors)
    }
}

impl Validate for NewLabRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        require(&mut errors, "patientId", &self.patient_id);
        require(&mut errors, "testCode", &self.test_code);
        if !self
            .test_code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            errors.push(FieldError::new(
                "testCode",
                "may only contain letters, digits, '-' and '_'",
            ));
        }
        finish(errors)
    }
}

impl Validate for StockAdjustment {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        require(&mut errors, "itemId", &self.item_id);
        require(&mut errors, "reason", &self.reason);
        if self.delta == 0 {
            errors.push(FieldError::new("delta", "must not be zero"));
        }
        finish(errors)
    }
}
