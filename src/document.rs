//! Translation between benchmark records and stored documents.

use serde_json::{Map, Value};

use crate::client::{FieldSet, Record};
use crate::store::{Document, StoreError, METADATA_COLLECTION, METADATA_ID, METADATA_KEY};

pub fn document_id(table: &str, key: &str) -> String {
    format!("{}/{}", table, key)
}

/// Id prefix shared by every document of `table`
pub fn collection_prefix(table: &str) -> String {
    format!("{}/", table)
}

/// Build a document for `values`, tagged with `collection` in its metadata.
pub fn to_document(values: &Record, collection: &str) -> Result<Document, StoreError> {
    let mut document = Document::new();
    merge_fields(&mut document, values)?;
    set_collection(&mut document, collection);
    Ok(document)
}

/// Replace the metadata slot with a fresh one naming `collection`.
pub fn set_collection(document: &mut Document, collection: &str) {
    let mut metadata = Map::new();
    metadata.insert(
        METADATA_COLLECTION.to_string(),
        Value::String(collection.to_string()),
    );
    document.insert(METADATA_KEY.to_string(), Value::Object(metadata));
}

/// Merge `values` over the fields of `document`.
pub fn merge_fields(document: &mut Document, values: &Record) -> Result<(), StoreError> {
    for (name, bytes) in values {
        let text = std::str::from_utf8(bytes).map_err(|_| StoreError::Encoding(name.clone()))?;
        document.insert(name.clone(), Value::String(text.to_string()));
    }
    Ok(())
}

/// Copy the requested fields of `document` into `result`, skipping the
/// metadata slot and null values.
pub fn fill_record(document: &Document, fields: Option<&FieldSet>, result: &mut Record) {
    let filter = fields.filter(|f| !f.is_empty());
    for (name, value) in document {
        if name == METADATA_KEY {
            continue;
        }
        if let Some(filter) = filter {
            if !filter.contains(name) {
                continue;
            }
        }
        match value {
            Value::Null => {}
            Value::String(s) => {
                result.insert(name.clone(), s.clone().into_bytes());
            }
            other => {
                result.insert(name.clone(), other.to_string().into_bytes());
            }
        }
    }
}

/// The id the store reports in a document's metadata
pub fn stored_id(document: &Document) -> Option<&str> {
    document.get(METADATA_KEY)?.get(METADATA_ID)?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn document_carries_collection_metadata() {
        let document = to_document(&record(&[("field0", "a")]), "usertable").unwrap();

        assert_eq!(document["field0"], "a");
        assert_eq!(document["@metadata"]["@collection"], "usertable");
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut values = Record::new();
        values.insert("field0".into(), vec![0xff, 0xfe]);

        match to_document(&values, "usertable") {
            Err(StoreError::Encoding(name)) => assert_eq!(name, "field0"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn fill_strips_metadata_and_keeps_store_order() {
        let document = to_document(&record(&[("b", "2"), ("a", "1")]), "usertable").unwrap();
        let mut result = Record::new();
        fill_record(&document, None, &mut result);

        let names: Vec<&str> = result.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(result["a"], b"1");
    }

    #[test]
    fn fill_projects_requested_fields() {
        let document = to_document(&record(&[("a", "1"), ("b", "2")]), "usertable").unwrap();
        let fields: FieldSet = ["b".to_string(), "missing".to_string()].into_iter().collect();
        let mut result = Record::new();
        fill_record(&document, Some(&fields), &mut result);

        assert_eq!(result, record(&[("b", "2")]));
    }

    #[test]
    fn fill_renders_non_string_values_and_skips_nulls() {
        let document = match json!({ "n": 42, "flag": true, "gone": null }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let mut result = Record::new();
        fill_record(&document, Some(&FieldSet::new()), &mut result);

        assert_eq!(result, record(&[("n", "42"), ("flag", "true")]));
    }

    #[test]
    fn merge_overwrites_and_adds() {
        let mut document = to_document(&record(&[("a", "1"), ("b", "x")]), "usertable").unwrap();
        merge_fields(&mut document, &record(&[("b", "2"), ("c", "3")])).unwrap();

        let mut result = Record::new();
        fill_record(&document, None, &mut result);
        assert_eq!(result, record(&[("a", "1"), ("b", "2"), ("c", "3")]));
    }
}
