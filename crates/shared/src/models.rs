//! Shared data models for the hospital backend's REST and live-update APIs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Live updates ---

/// Incremental change pushed on a domain topic.
///
/// Topics carry either the full, current entity or a removal marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Change<T> {
    Removed { id: String, removed: bool },
    Upsert(T),
}

// --- Pharmacy ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrescriptionStatus {
    Pending,
    Dispensed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Prescription {
    pub id: String,
    pub patient_id: String,
    #[serde(default)]
    pub patient_name: Option<String>,
    pub drug_name: String,
    pub dosage: String,
    pub quantity: u32,
    pub status: PrescriptionStatus,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewPrescription {
    pub patient_id: String,
    pub drug_name: String,
    pub dosage: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    pub quantity: u32,
    #[serde(default)]
    pub reorder_level: u32,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl InventoryItem {
    pub fn is_low_stock(&self) -> bool {
        self.quantity <= self.reorder_level
    }
}

/// Stock correction for an inventory item. `delta` may be negative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StockAdjustment {
    pub item_id: String,
    pub delta: i64,
    pub reason: String,
}

/// Entry of the drug database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Drug {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub generic_name: Option<String>,
    #[serde(default)]
    pub form: Option<String>,
    #[serde(default)]
    pub strength: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

// --- Dialysis ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineStatus {
    Available,
    InUse,
    Maintenance,
    OutOfService,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DialysisMachine {
    pub id: String,
    pub label: String,
    pub status: MachineStatus,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DialysisSession {
    pub id: String,
    pub patient_id: String,
    #[serde(default)]
    pub machine_id: Option<String>,
    pub status: SessionStatus,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

// --- Laboratory ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabPriority {
    Routine,
    Urgent,
    Stat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabStatus {
    Requested,
    SampleCollected,
    Processing,
    Completed,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabRequest {
    pub id: String,
    pub patient_id: String,
    pub test_code: String,
    pub priority: LabPriority,
    pub status: LabStatus,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewLabRequest {
    pub patient_id: String,
    pub test_code: String,
    pub priority: LabPriority,
}

/// Body of the various `.../status` endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate<S> {
    pub status: S,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_distinguishes_removal_from_upsert() {
        let removed: Change<Prescription> =
            serde_json::from_str(r#"{"id":"rx-1","removed":true}"#).unwrap();
        assert_eq!(
            removed,
            Change::Removed {
                id: "rx-1".into(),
                removed: true
            }
        );

        let upsert: Change<Prescription> = serde_json::from_str(
            r#"{"id":"rx-2","patientId":"p-9","drugName":"Heparin","dosage":"5000 IU","quantity":2,"status":"PENDING"}"#,
        )
        .unwrap();
        match upsert {
            Change::Upsert(rx) => {
                assert_eq!(rx.id, "rx-2");
                assert_eq!(rx.status, PrescriptionStatus::Pending);
                assert_eq!(rx.updated_at, None);
            }
            other => panic!("expected upsert, got {other:?}"),
        }
    }

    #[test]
    fn low_stock_threshold_is_inclusive() {
        let mut item = InventoryItem {
            id: "inv-1".into(),
            name: "Saline 0.9%".into(),
            category: None,
            quantity: 10,
            reorder_level: 10,
            unit: Some("bag".into()),
            updated_at: None,
        };
        assert!(item.is_low_stock());
        item.quantity = 11;
        assert!(!item.is_low_stock());
    }
}
