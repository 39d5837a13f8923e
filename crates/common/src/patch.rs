// Apply and revert path-addressed change operations on a JSON document.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{ChangeOperation, PathSegment};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("operation path is empty")]
    EmptyPath,

    #[error("path segment `{0}` does not address an object or array")]
    NotContainer(String),

    #[error("path segment `{0}` is not a valid array index")]
    InvalidIndex(String),

    #[error("array index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("path segment `{0}` not found")]
    NotFound(String),

    #[error("insert target is not an array")]
    NotAnArray,
}

/// Apply `operation` to `doc`, returning the operation with `old_value`
/// filled in from the document when the caller did not supply one.
///
/// Missing intermediate objects are created (as arrays when the next segment
/// is an index). Array indices never extend an array past its end, except
/// that `set` at `len` appends and `insert` clamps to `len`.
pub fn apply_operation(
    doc: &mut Value,
    operation: &ChangeOperation,
) -> Result<ChangeOperation, PatchError> {
    let path = operation.path();
    let last = path.last().ok_or(PatchError::EmptyPath)?;
    let parent = walk(doc, path, true)?;

    match operation {
        ChangeOperation::Set { path, value, old_value } => {
            let previous = set_slot(parent, last, value.clone())?;
            Ok(ChangeOperation::Set {
                path: path.clone(),
                value: value.clone(),
                old_value: old_value.clone().or(previous),
            })
        }
        ChangeOperation::Delete { path, old_value } => {
            let previous = remove_slot(parent, last)?;
            Ok(ChangeOperation::Delete { path: path.clone(), old_value: old_value.clone().or(previous) })
        }
        ChangeOperation::Add { path, value, old_value } => {
            let previous = match parent {
                Value::Array(items) => {
                    items.push(value.clone());
                    None
                }
                Value::Object(map) => map.insert(last.as_key(), value.clone()),
                _ => return Err(PatchError::NotContainer(last.to_string())),
            };
            Ok(ChangeOperation::Add {
                path: path.clone(),
                value: value.clone(),
                old_value: old_value.clone().or(previous),
            })
        }
        ChangeOperation::Insert { path, value } => {
            let Value::Array(items) = parent else {
                return Err(PatchError::NotAnArray);
            };
            let index = array_index(last)?.min(items.len());
            items.insert(index, value.clone());
            Ok(ChangeOperation::Insert { path: path.clone(), value: value.clone() })
        }
    }
}

/// Undo a previously applied operation. `operation` must carry the
/// `old_value` recorded by [`apply_operation`].
pub fn revert_operation(doc: &mut Value, operation: &ChangeOperation) -> Result<(), PatchError> {
    let path = operation.path();
    let last = path.last().ok_or(PatchError::EmptyPath)?;
    let parent = walk(doc, path, false)?;

    match operation {
        ChangeOperation::Set { old_value, .. } => restore_slot(parent, last, old_value.clone()),
        ChangeOperation::Add { old_value, .. } => match parent {
            Value::Array(items) => {
                items.pop();
                Ok(())
            }
            _ => restore_slot(parent, last, old_value.clone()),
        },
        ChangeOperation::Delete { old_value, .. } => {
            let Some(old_value) = old_value.clone() else {
                return Ok(());
            };
            match parent {
                Value::Object(map) => {
                    map.insert(last.as_key(), old_value);
                    Ok(())
                }
                Value::Array(items) => {
                    let index = array_index(last)?.min(items.len());
                    items.insert(index, old_value);
                    Ok(())
                }
                _ => Err(PatchError::NotContainer(last.to_string())),
            }
        }
        ChangeOperation::Insert { .. } => {
            let Value::Array(items) = parent else {
                return Err(PatchError::NotAnArray);
            };
            let index = array_index(last)?;
            if index >= items.len() {
                return Err(PatchError::IndexOutOfRange { index, len: items.len() });
            }
            items.remove(index);
            Ok(())
        }
    }
}

// Walk to the container holding the final path segment.
fn walk<'a>(
    doc: &'a mut Value,
    path: &[PathSegment],
    create: bool,
) -> Result<&'a mut Value, PatchError> {
    let Some((_, parents)) = path.split_last() else {
        return Err(PatchError::EmptyPath);
    };

    let mut target = doc;
    for (position, segment) in parents.iter().enumerate() {
        let next_is_index = path[position + 1].as_index().is_some();
        target = match target {
            Value::Object(map) => {
                let key = segment.as_key();
                if !create && !map.contains_key(&key) {
                    return Err(PatchError::NotFound(key));
                }
                map.entry(key).or_insert_with(|| {
                    if next_is_index {
                        Value::Array(Vec::new())
                    } else {
                        Value::Object(Map::new())
                    }
                })
            }
            Value::Array(items) => {
                let index = array_index(segment)?;
                let len = items.len();
                items.get_mut(index).ok_or(PatchError::IndexOutOfRange { index, len })?
            }
            _ => return Err(PatchError::NotContainer(segment.to_string())),
        };
    }
    Ok(target)
}

fn array_index(segment: &PathSegment) -> Result<usize, PatchError> {
    segment.as_index().ok_or_else(|| PatchError::InvalidIndex(segment.to_string()))
}

fn set_slot(parent: &mut Value, last: &PathSegment, value: Value) -> Result<Option<Value>, PatchError> {
    match parent {
        Value::Object(map) => Ok(map.insert(last.as_key(), value)),
        Value::Array(items) => {
            let index = array_index(last)?;
            let len = items.len();
            if index < len {
                Ok(Some(std::mem::replace(&mut items[index], value)))
            } else if index == len {
                items.push(value);
                Ok(None)
            } else {
                Err(PatchError::IndexOutOfRange { index, len })
            }
        }
        _ => Err(PatchError::NotContainer(last.to_string())),
    }
}

fn remove_slot(parent: &mut Value, last: &PathSegment) -> Result<Option<Value>, PatchError> {
    match parent {
        Value::Object(map) => Ok(map.remove(&last.as_key())),
        Value::Array(items) => {
            let index = array_index(last)?;
            if index >= items.len() {
                return Err(PatchError::IndexOutOfRange { index, len: items.len() });
            }
            Ok(Some(items.remove(index)))
        }
        _ => Err(PatchError::NotContainer(last.to_string())),
    }
}

// Put back what a `set` or object `add` replaced; `None` means the slot did not exist.
fn restore_slot(
    parent: &mut Value,
    last: &PathSegment,
    old_value: Option<Value>,
) -> Result<(), PatchError> {
    match parent {
        Value::Object(map) => {
            let key = last.as_key();
            match old_value {
                Some(value) => {
                    map.insert(key, value);
                }
                None => {
                    map.remove(&key);
                }
            }
            Ok(())
        }
        Value::Array(items) => {
            let index = array_index(last)?;
            let len = items.len();
            if index >= len {
                return Err(PatchError::IndexOutOfRange { index, len });
            }
            match old_value {
                Some(value) => items[index] = value,
                None => {
                    items.remove(index);
                }
            }
            Ok(())
        }
        _ => Err(PatchError::NotContainer(last.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(segments: &[&str]) -> Vec<PathSegment> {
        segments.iter().map(|segment| PathSegment::from(*segment)).collect()
    }

    #[test]
    fn set_records_old_value_and_reverts() {
        let mut doc = json!({ "title": "Draft" });
        let applied = apply_operation(&mut doc, &ChangeOperation::set(path(&["title"]), json!("Final")))
            .expect("set should apply");

        assert_eq!(doc, json!({ "title": "Final" }));
        assert_eq!(
            applied,
            ChangeOperation::Set { path: path(&["title"]), value: json!("Final"), old_value: Some(json!("Draft")) }
        );

        revert_operation(&mut doc, &applied).expect("set should revert");
        assert_eq!(doc, json!({ "title": "Draft" }));
    }

    #[test]
    fn set_creates_missing_intermediates() {
        let mut doc = json!({});
        let applied = apply_operation(&mut doc, &ChangeOperation::set(path(&["meta", "owner"]), json!("ana")))
            .expect("set should create parents");
        assert_eq!(doc, json!({ "meta": { "owner": "ana" } }));

        revert_operation(&mut doc, &applied).expect("revert should remove the new key");
        assert_eq!(doc, json!({ "meta": {} }));
    }

    #[test]
    fn intermediate_before_index_becomes_array() {
        let mut doc = json!({});
        apply_operation(&mut doc, &ChangeOperation::set(path(&["rows", "0"]), json!("first")))
            .expect("set at len should append");
        assert_eq!(doc, json!({ "rows": ["first"] }));
    }

    #[test]
    fn delete_from_array_reverts_in_place() {
        let mut doc = json!({ "tags": ["a", "b", "c"] });
        let applied = apply_operation(&mut doc, &ChangeOperation::delete(path(&["tags", "1"])))
            .expect("delete should apply");
        assert_eq!(doc, json!({ "tags": ["a", "c"] }));

        revert_operation(&mut doc, &applied).expect("delete should revert");
        assert_eq!(doc, json!({ "tags": ["a", "b", "c"] }));
    }

    #[test]
    fn add_appends_to_arrays_and_pops_on_revert() {
        let mut doc = json!({ "items": [1, 2] });
        let applied = apply_operation(&mut doc, &ChangeOperation::add(path(&["items", "9"]), json!(3)))
            .expect("add should apply");
        assert_eq!(doc, json!({ "items": [1, 2, 3] }));

        revert_operation(&mut doc, &applied).expect("add should revert");
        assert_eq!(doc, json!({ "items": [1, 2] }));
    }

    #[test]
    fn insert_shifts_items_and_clamps_index() {
        let mut doc = json!({ "items": ["a", "c"] });
        let applied = apply_operation(&mut doc, &ChangeOperation::insert(path(&["items", "1"]), json!("b")))
            .expect("insert should apply");
        assert_eq!(doc, json!({ "items": ["a", "b", "c"] }));
        revert_operation(&mut doc, &applied).expect("insert should revert");
        assert_eq!(doc, json!({ "items": ["a", "c"] }));

        apply_operation(&mut doc, &ChangeOperation::insert(path(&["items", "40"]), json!("z")))
            .expect("insert past end should clamp");
        assert_eq!(doc, json!({ "items": ["a", "c", "z"] }));
    }

    #[test]
    fn insert_into_object_is_rejected() {
        let mut doc = json!({ "meta": {} });
        let err = apply_operation(&mut doc, &ChangeOperation::insert(path(&["meta", "0"]), json!(1)))
            .expect_err("insert into object should fail");
        assert_eq!(err, PatchError::NotAnArray);
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let mut doc = json!({ "items": [] });
        let err = apply_operation(&mut doc, &ChangeOperation::set(path(&["items", "3"]), json!(1)))
            .expect_err("set past end should fail");
        assert_eq!(err, PatchError::IndexOutOfRange { index: 3, len: 0 });

        let err = apply_operation(&mut doc, &ChangeOperation::set(path(&["items", "0", "x"]), json!(1)))
            .expect_err("walking past end should fail");
        assert_eq!(err, PatchError::IndexOutOfRange { index: 0, len: 0 });
    }

    #[test]
    fn scalar_in_path_is_not_a_container() {
        let mut doc = json!({ "title": "x" });
        let err = apply_operation(&mut doc, &ChangeOperation::set(path(&["title", "sub"]), json!(1)))
            .expect_err("scalar parent should fail");
        assert_eq!(err, PatchError::NotContainer("sub".into()));
    }

    #[test]
    fn empty_path_is_rejected() {
        let mut doc = json!({});
        let err = apply_operation(&mut doc, &ChangeOperation::set(Vec::new(), json!(1)))
            .expect_err("empty path should fail");
        assert_eq!(err, PatchError::EmptyPath);
    }

    #[test]
    fn revert_does_not_create_missing_parents() {
        let mut doc = json!({});
        let operation = ChangeOperation::Set {
            path: path(&["gone", "x"]),
            value: json!(1),
            old_value: None,
        };
        let err = revert_operation(&mut doc, &operation).expect_err("missing parent should fail");
        assert_eq!(err, PatchError::NotFound("gone".into()));
        assert_eq!(doc, json!({}));
    }

    #[test]
    fn supplied_old_value_is_kept() {
        let mut doc = json!({ "n": 2 });
        let operation = ChangeOperation::Set { path: path(&["n"]), value: json!(3), old_value: Some(json!(1)) };
        let applied = apply_operation(&mut doc, &operation).expect("set should apply");
        assert_eq!(applied, operation);
    }
}
