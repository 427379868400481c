//! Payload schema for dense index points

use crate::meta::Chunk;
use qdrant_client::qdrant::{PointStruct, Value as QdrantValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// A chunk vector ready to be upserted
#[derive(Debug, Clone)]
pub struct DenseRecord {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

impl DenseRecord {
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            vector,
            payload: ChunkPayload::from(chunk),
        }
    }

    /// Stable point id derived from the chunk id, so re-upserting overwrites
    pub fn point_id(&self) -> Uuid {
        point_id_for(&self.chunk_id)
    }

    /// Convert to qdrant-client PointStruct
    pub fn to_point_struct(self) -> PointStruct {
        let id = self.point_id().to_string();
        PointStruct::new(id, self.vector, self.payload.to_qdrant_payload())
    }
}

pub fn point_id_for(chunk_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes())
}

/// Metadata stored with each vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub chunk_id: String,
    pub doc_id: String,
    pub workspace_id: String,
    pub chunk_index: i32,
    pub page_start: i32,
    pub page_end: i32,
    pub doc_type: String,
    pub text: String,
}

impl From<&Chunk> for ChunkPayload {
    fn from(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            doc_id: chunk.doc_id.clone(),
            workspace_id: chunk.workspace_id.clone(),
            chunk_index: chunk.chunk_index,
            page_start: chunk.page_start,
            page_end: chunk.page_end,
            doc_type: chunk.doc_type.clone(),
            text: chunk.text.clone(),
        }
    }
}

impl ChunkPayload {
    /// Convert to Qdrant payload format
    pub fn to_qdrant_payload(self) -> HashMap<String, QdrantValue> {
        let mut map = HashMap::new();

        map.insert("chunk_id".to_string(), string_to_qdrant(&self.chunk_id));
        map.insert("doc_id".to_string(), string_to_qdrant(&self.doc_id));
        map.insert("workspace_id".to_string(), string_to_qdrant(&self.workspace_id));
        map.insert("chunk_index".to_string(), int_to_qdrant(self.chunk_index as i64));
        map.insert("page_start".to_string(), int_to_qdrant(self.page_start as i64));
        map.insert("page_end".to_string(), int_to_qdrant(self.page_end as i64));
        map.insert("doc_type".to_string(), string_to_qdrant(&self.doc_type));
        map.insert("text".to_string(), string_to_qdrant(&self.text));

        map
    }

    /// Rebuild from a JSON object; `None` if the point carries a foreign schema
    pub fn from_json_map(map: Map<String, Value>) -> Option<Self> {
        serde_json::from_value(Value::Object(map)).ok()
    }
}

fn string_to_qdrant(s: &str) -> QdrantValue {
    QdrantValue {
        kind: Some(qdrant_client::qdrant::value::Kind::StringValue(s.to_string())),
    }
}

fn int_to_qdrant(i: i64) -> QdrantValue {
    QdrantValue {
        kind: Some(qdrant_client::qdrant::value::Kind::IntegerValue(i)),
    }
}

/// Convert Qdrant value to serde_json Value
pub(crate) fn json_from_qdrant_value(v: QdrantValue) -> Value {
    use qdrant_client::qdrant::value::Kind;

    match v.kind {
        Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => Value::Array(
            list.values
                .into_iter()
                .map(json_from_qdrant_value)
                .collect(),
        ),
        Some(Kind::StructValue(s)) => Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, json_from_qdrant_value(v)))
                .collect(),
        ),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Document;

    #[test]
    fn test_payload_survives_qdrant_conversion() {
        let doc = Document::new("w1", "notes.pdf");
        let chunk = Chunk::new(&doc, 2, 3, 4, "attention is all you need");
        let payload = ChunkPayload::from(&chunk);

        let json: Map<String, Value> = payload
            .clone()
            .to_qdrant_payload()
            .into_iter()
            .map(|(k, v)| (k, json_from_qdrant_value(v)))
            .collect();

        assert_eq!(ChunkPayload::from_json_map(json), Some(payload));
    }

    #[test]
    fn test_point_id_is_stable() {
        assert_eq!(point_id_for("chunk-1"), point_id_for("chunk-1"));
        assert_ne!(point_id_for("chunk-1"), point_id_for("chunk-2"));
    }

    #[test]
    fn test_foreign_payload_is_rejected() {
        let mut map = Map::new();
        map.insert("source_id".to_string(), Value::String("x".to_string()));
        assert!(ChunkPayload::from_json_map(map).is_none());
    }
}
