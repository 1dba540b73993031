//! Table rows and the mapping from domain items to rows.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use balanceindex_core::error::IndexerError;

/// One keyed row: written with insert-or-replace semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntity {
    /// Rows sharing a partition key may be written in one atomic batch.
    pub partition_key: String,
    /// Unique within the partition.
    pub row_key: String,
    /// Serialized row body (JSON).
    pub payload: String,
}

impl TableEntity {
    pub fn new(
        partition_key: impl Into<String>,
        row_key: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            payload: payload.into(),
        }
    }

    /// Serialize `value` as the row payload.
    pub fn from_json<T: Serialize>(
        partition_key: impl Into<String>,
        row_key: impl Into<String>,
        value: &T,
    ) -> Result<Self, IndexerError> {
        Ok(Self::new(partition_key, row_key, serde_json::to_string(value)?))
    }

    /// Deserialize the payload.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, IndexerError> {
        Ok(serde_json::from_str(&self.payload)?)
    }

    /// Bytes this row contributes to a request.
    pub fn size(&self) -> usize {
        self.partition_key.len() + self.row_key.len() + self.payload.len()
    }

    /// `partition/row`, for logs.
    pub fn key(&self) -> String {
        format!("{}/{}", self.partition_key, self.row_key)
    }

    /// `partition/row (N bytes): payload`, with the payload cut to at most
    /// `max_payload` bytes on a char boundary. For logs.
    pub fn describe(&self, max_payload: usize) -> String {
        let mut end = self.payload.len().min(max_payload);
        while !self.payload.is_char_boundary(end) {
            end -= 1;
        }
        let ellipsis = if end < self.payload.len() { "…" } else { "" };
        format!(
            "{} ({} bytes): {}{}",
            self.key(),
            self.size(),
            &self.payload[..end],
            ellipsis
        )
    }
}

/// Maps an item to the row that stores it.
pub trait IntoTableEntity {
    fn to_table_entity(&self) -> Result<TableEntity, IndexerError>;
}

impl IntoTableEntity for TableEntity {
    fn to_table_entity(&self) -> Result<TableEntity, IndexerError> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Row {
        amount: u64,
    }

    #[test]
    fn json_payload_roundtrip_and_size() {
        let e = TableEntity::from_json("pk", "rk", &Row { amount: 7 }).unwrap();
        assert_eq!(e.payload, r#"{"amount":7}"#);
        assert_eq!(e.size(), 2 + 2 + e.payload.len());
        assert_eq!(e.parse::<Row>().unwrap(), Row { amount: 7 });
        assert_eq!(e.key(), "pk/rk");
    }

    #[test]
    fn describe_truncates_payload_on_char_boundary() {
        let e = TableEntity::new("pk", "rk", r#"{"memo":"héllo"}"#);
        assert_eq!(e.describe(100), format!(r#"pk/rk ({} bytes): {{"memo":"héllo"}}"#, e.size()));
        // byte 11 falls inside 'é'
        assert_eq!(e.describe(11), format!(r#"pk/rk ({} bytes): {{"memo":"h…"#, e.size()));
        assert_eq!(e.describe(0), format!("pk/rk ({} bytes): …", e.size()));
    }

    #[test]
    fn bad_payload_is_serialization_error() {
        let e = TableEntity::new("pk", "rk", "not json");
        assert!(matches!(e.parse::<Row>(), Err(IndexerError::Serialization(_))));
    }
}
