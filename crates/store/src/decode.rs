//! Frame decoder: raw text frames to tagged update records.
//!
//! The wire format marks a deletion as an object that carries only `id`.
//! That shape check lives here and nowhere else; downstream code matches on
//! [`Update::Tombstone`].

use serde_json::Value;
use tracing::{debug, warn};
use vigil_core::{json_type, DecodeError, Entity, EntityId, RawFrame, Update, ID_FIELD};

/// Decode one frame. Every element of a list is decoded independently, so a
/// bad element does not spoil its neighbours.
pub fn decode_frame(frame: &RawFrame) -> Vec<Result<Update, DecodeError>> {
    let parsed: Value = match serde_json::from_str(frame.text()) {
        Ok(v) => v,
        Err(e) => return vec![Err(e.into())],
    };
    match frame {
        RawFrame::Incremental(_) => match parsed {
            Value::Array(items) => items.into_iter().map(decode_record).collect(),
            other => vec![decode_record(other)],
        },
        RawFrame::Snapshot(_) => decode_snapshot(parsed),
    }
}

/// Single record: a one-field object is a tombstone, anything else an upsert.
pub fn decode_record(v: Value) -> Result<Update, DecodeError> {
    let map = match v {
        Value::Object(m) => m,
        other => return Err(DecodeError::NotAnObject(json_type(&other))),
    };
    if map.len() == 1 {
        let id = map.get(ID_FIELD).ok_or(DecodeError::MissingId)?;
        return Ok(Update::Tombstone(EntityId::from_value(id)?));
    }
    Entity::from_map(map).map(Update::Upsert)
}

fn decode_snapshot(parsed: Value) -> Vec<Result<Update, DecodeError>> {
    let items = match parsed {
        Value::Array(items) => items,
        other => vec![other],
    };
    let mut out = Vec::new();
    let mut entities = Vec::with_capacity(items.len());
    for item in items {
        match decode_record(item) {
            Ok(Update::Upsert(e)) => entities.push(e),
            Ok(Update::Tombstone(id)) => debug!(id = %id, "id-only record in snapshot; skipped"),
            Ok(Update::Snapshot(_)) => {}
            Err(e) => out.push(Err(e)),
        }
    }
    out.push(Ok(Update::Snapshot(entities)));
    out
}

/// Decode a batch in arrival order, logging and dropping bad frames.
pub fn decode_batch(key: &str, frames: &[RawFrame]) -> Vec<Update> {
    let mut out = Vec::with_capacity(frames.len());
    for (pos, frame) in frames.iter().enumerate() {
        for res in decode_frame(frame) {
            match res {
                Ok(u) => out.push(u),
                Err(e) => {
                    metrics::counter!("frames_decode_errors_total", 1u64, "collection" => key.to_string());
                    warn!(collection = %key, frame = pos, snapshot = frame.is_snapshot(), error = %e, "dropping undecodable record");
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::Severity;

    fn inc(s: &str) -> RawFrame { RawFrame::Incremental(s.to_string()) }

    #[test]
    fn object_is_upsert_and_id_only_is_tombstone() {
        let out = decode_frame(&inc(r#"{"id": 1, "px": 10.5}"#));
        assert!(matches!(&out[..], [Ok(Update::Upsert(e))] if e.id() == &EntityId::Num(1)));
        let out = decode_frame(&inc(r#"{"id": "ord-9"}"#));
        assert!(matches!(&out[..], [Ok(Update::Tombstone(EntityId::Str(s)))] if s == "ord-9"));
    }

    #[test]
    fn list_elements_decode_independently() {
        let out = decode_frame(&inc(r#"[{"id": 1, "severity": "ERROR"}, 5, {"id": 2}, {"qty": 1, "px": 2}]"#));
        assert_eq!(out.len(), 4);
        assert!(matches!(&out[0], Ok(Update::Upsert(e)) if e.severity() == Severity::Error));
        assert!(matches!(out[1], Err(DecodeError::NotAnObject("number"))));
        assert!(matches!(out[2], Ok(Update::Tombstone(EntityId::Num(2)))));
        assert!(matches!(out[3], Err(DecodeError::MissingId)));
    }

    #[test]
    fn single_field_without_id_is_rejected() {
        let out = decode_frame(&inc(r#"{"px": 1}"#));
        assert!(matches!(&out[..], [Err(DecodeError::MissingId)]));
    }

    #[test]
    fn malformed_text_is_one_error() {
        let out = decode_frame(&inc("{not json"));
        assert!(matches!(&out[..], [Err(DecodeError::Json(_))]));
    }

    #[test]
    fn snapshot_collects_entities_and_skips_tombstones() {
        let out = decode_frame(&RawFrame::Snapshot(r#"[{"id": 1, "a": 1}, {"id": 2}, {"id": 3, "a": 3}, "x"]"#.into()));
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Err(DecodeError::NotAnObject("string"))));
        match &out[1] {
            Ok(Update::Snapshot(items)) => {
                let ids: Vec<_> = items.iter().map(|e| e.id().clone()).collect();
                assert_eq!(ids, vec![EntityId::Num(1), EntityId::Num(3)]);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn batch_drops_only_bad_frames() {
        let frames = vec![inc(r#"{"id": 1, "a": 1}"#), inc("garbage"), inc(r#"{"id": 1}"#)];
        let out = decode_batch("orders", &frames);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[1], Update::Tombstone(EntityId::Num(1))));
    }
}
