//! Row and response types for the expenses backend.
//!
//! Column names are snake_case, matching the `expenses` table.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sync::Payload;

/// One row written to the `expenses` table.
///
/// Only the columns the entry form captures are sent; any other payload
/// fields are ignored. `user_id` is always filled in at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    #[serde(default)]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl ExpenseRecord {
    /// Build the row for `payload`, owned by `user_id`.
    ///
    /// Any `user_id` captured in the payload is replaced. Fails when a known
    /// column has the wrong JSON type (e.g. a non-numeric amount).
    pub fn from_payload(user_id: &str, payload: &Payload) -> Result<Self, serde_json::Error> {
        let mut record: ExpenseRecord = serde_json::from_value(Value::Object(payload.clone()))?;
        record.user_id = user_id.to_string();
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    #[test]
    fn test_from_payload_maps_form_fields() {
        let p = payload(json!({
            "date": "2024-01-01",
            "category": "Food",
            "paid_by": "Cash",
            "payee": "Shop A",
            "purpose": "Lunch",
            "amount": 100,
            "status": "paid"
        }));
        let record = ExpenseRecord::from_payload("user-1", &p).unwrap();
        assert_eq!(record.user_id, "user-1");
        assert_eq!(record.date.as_deref(), Some("2024-01-01"));
        assert_eq!(record.category.as_deref(), Some("Food"));
        assert_eq!(record.paid_by.as_deref(), Some("Cash"));
        assert_eq!(record.payee.as_deref(), Some("Shop A"));
        assert_eq!(record.purpose.as_deref(), Some("Lunch"));
        assert_eq!(record.amount, Some(100.0));
        assert_eq!(record.status.as_deref(), Some("paid"));
    }

    #[test]
    fn test_from_payload_overrides_captured_user() {
        let p = payload(json!({"user_id": "someone-else", "amount": 5.5}));
        let record = ExpenseRecord::from_payload("current-user", &p).unwrap();
        assert_eq!(record.user_id, "current-user");
        assert_eq!(record.amount, Some(5.5));
    }

    #[test]
    fn test_from_payload_ignores_unknown_fields() {
        let p = payload(json!({"amount": 1, "note_to_self": "x"}));
        let record = ExpenseRecord::from_payload("u", &p).unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("note_to_self").is_none());
    }

    #[test]
    fn test_from_payload_rejects_non_numeric_amount() {
        let p = payload(json!({"amount": "one hundred"}));
        assert!(ExpenseRecord::from_payload("u", &p).is_err());
    }

    #[test]
    fn test_serialization_skips_missing_columns() {
        let p = payload(json!({"date": "2024-01-01", "amount": 300}));
        let record = ExpenseRecord::from_payload("u", &p).unwrap();
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"user_id":"u","date":"2024-01-01","amount":300.0}"#);
    }
}
