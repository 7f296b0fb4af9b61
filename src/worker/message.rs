use crate::error::ConsumerError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Partitioning and lease key
    pub message_id: String,
    #[serde(default)]
    pub processed_by: Option<String>,
    #[serde(default)]
    pub random_property: Option<String>,
}

impl Message {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            processed_by: None,
            random_property: None,
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ConsumerError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Field/value pairs for the result stream. Unset fields are left out.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("message_id", self.message_id.clone())];

        if let Some(processed_by) = &self.processed_by {
            fields.push(("processed_by", processed_by.clone()));
        }
        if let Some(random_property) = &self.random_property {
            fields.push(("random_property", random_property.clone()));
        }

        fields
    }
}
