//! In-process evaluation of built expressions.
//!
//! Backends without a native expression engine (the in-memory store, the PostgreSQL
//! document store) apply conditions and updates through these functions, so every
//! backend shares one definition of the semantics.

use std::cmp::Ordering;

use crate::attr::{AttributeValue, Item};
use crate::store::StoreError;

use super::{Comparator, Condition, Expression, FieldPath, PathSegment, SetAction};

/// Resolve a path inside an item.
pub fn get<'a>(item: &'a Item, path: &FieldPath) -> Option<&'a AttributeValue> {
    let mut segments = path.segments().iter();
    let mut current = match segments.next()? {
        PathSegment::Attr(name) => item.get(name)?,
        PathSegment::Index(_) => return None,
    };
    for segment in segments {
        current = match (segment, current) {
            (PathSegment::Attr(name), AttributeValue::M(map)) => map.get(name)?,
            (PathSegment::Index(index), AttributeValue::L(list)) => list.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Evaluate a condition. An absent item behaves like an empty one.
pub fn condition_holds(condition: &Condition, item: Option<&Item>) -> bool {
    let empty = Item::new();
    let item = item.unwrap_or(&empty);
    evaluate(condition, item)
}

fn evaluate(condition: &Condition, item: &Item) -> bool {
    match condition {
        Condition::AttributeExists(path) => get(item, path).is_some(),
        Condition::AttributeNotExists(path) => get(item, path).is_none(),
        Condition::Compare(path, op, expected) => {
            let Some(actual) = get(item, path) else {
                return false;
            };
            match op {
                Comparator::Eq => actual == expected,
                Comparator::Ne => actual != expected,
                ordered => match actual.compare(expected) {
                    Some(ordering) => match ordered {
                        Comparator::Lt => ordering == Ordering::Less,
                        Comparator::Le => ordering != Ordering::Greater,
                        Comparator::Gt => ordering == Ordering::Greater,
                        Comparator::Ge => ordering != Ordering::Less,
                        Comparator::Eq | Comparator::Ne => false,
                    },
                    None => false,
                },
            }
        }
        Condition::Contains(path, needle) => match get(item, path) {
            Some(AttributeValue::L(list)) => list.contains(needle),
            Some(AttributeValue::S(haystack)) => needle
                .as_str()
                .map(|n| haystack.contains(n))
                .unwrap_or(false),
            _ => false,
        },
        Condition::And(terms) => terms.iter().all(|term| evaluate(term, item)),
        Condition::Or(terms) => terms.iter().any(|term| evaluate(term, item)),
        Condition::Not(inner) => !evaluate(inner, item),
    }
}

/// Apply the SET and REMOVE clauses of an expression to an item.
///
/// All right-hand sides are computed against the item as it was before the update,
/// matching native semantics where `if_not_exists(p, ...)` sees the old value.
pub fn apply_update(expression: &Expression, item: &mut Item) -> Result<(), StoreError> {
    let mut computed = Vec::with_capacity(expression.set_actions().len());
    for (path, action) in expression.set_actions() {
        let current = get(item, path);
        let value = match action {
            SetAction::Assign(value) => value.clone(),
            SetAction::IfNotExists(value) => current.cloned().unwrap_or_else(|| value.clone()),
            SetAction::AddFrom { zero, delta } => current.unwrap_or(zero).add_numbers(delta)?,
            SetAction::AppendList(list) => {
                let mut combined = match current {
                    Some(AttributeValue::L(existing)) => existing.clone(),
                    None => Vec::new(),
                    Some(other) => {
                        return Err(StoreError::Validation(format!(
                            "list_append on {} attribute '{}'",
                            other.type_name(),
                            path
                        )))
                    }
                };
                combined.extend(list.iter().cloned());
                AttributeValue::L(combined)
            }
        };
        computed.push((path, value));
    }

    for (path, value) in computed {
        set(item, path, value)?;
    }
    for path in expression.removals() {
        remove(item, path);
    }
    Ok(())
}

fn set(item: &mut Item, path: &FieldPath, value: AttributeValue) -> Result<(), StoreError> {
    let segments = path.segments();
    let Some((PathSegment::Attr(root), rest)) = segments.split_first() else {
        return Err(StoreError::Validation(format!("invalid path '{path}'")));
    };
    if rest.is_empty() {
        item.insert(root.clone(), value);
        return Ok(());
    }
    let parent = item
        .get_mut(root)
        .ok_or_else(|| StoreError::Validation(format!("parent of '{path}' does not exist")))?;
    set_nested(parent, rest, value, path)
}

fn set_nested(
    target: &mut AttributeValue,
    segments: &[PathSegment],
    value: AttributeValue,
    path: &FieldPath,
) -> Result<(), StoreError> {
    let invalid = || StoreError::Validation(format!("path '{path}' does not match item shape"));
    let (head, rest) = segments.split_first().ok_or_else(invalid)?;
    match (head, target) {
        (PathSegment::Attr(name), AttributeValue::M(map)) => {
            if rest.is_empty() {
                map.insert(name.clone(), value);
                Ok(())
            } else {
                set_nested(map.get_mut(name).ok_or_else(invalid)?, rest, value, path)
            }
        }
        (PathSegment::Index(index), AttributeValue::L(list)) => {
            if rest.is_empty() {
                if *index < list.len() {
                    list[*index] = value;
                } else {
                    list.push(value);
                }
                Ok(())
            } else {
                set_nested(list.get_mut(*index).ok_or_else(invalid)?, rest, value, path)
            }
        }
        _ => Err(invalid()),
    }
}

fn remove(item: &mut Item, path: &FieldPath) {
    let segments = path.segments();
    let Some((PathSegment::Attr(root), rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        item.remove(root);
        return;
    }
    let mut current = match item.get_mut(root) {
        Some(value) => value,
        None => return,
    };
    let (last, parents) = match rest.split_last() {
        Some(split) => split,
        None => return,
    };
    for segment in parents {
        current = match (segment, current) {
            (PathSegment::Attr(name), AttributeValue::M(map)) => match map.get_mut(name) {
                Some(value) => value,
                None => return,
            },
            (PathSegment::Index(index), AttributeValue::L(list)) => match list.get_mut(*index) {
                Some(value) => value,
                None => return,
            },
            _ => return,
        };
    }
    match (last, current) {
        (PathSegment::Attr(name), AttributeValue::M(map)) => {
            map.remove(name);
        }
        (PathSegment::Index(index), AttributeValue::L(list)) if *index < list.len() => {
            list.remove(*index);
        }
        _ => {}
    }
}
