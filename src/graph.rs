//! Object graph walks
//!
//! Builds the closure of objects reachable from a set of roots. The walk is
//! breadth-first over an explicit queue with a visited set keyed by
//! [`ObjectKey`], so shared and cyclic references are visited once and
//! stack depth stays bounded.

use crate::Result;
use crate::codec;
use crate::object::{Object, ObjectKey, ObjectRef};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Walk the graph reachable from `roots`.
///
/// - Roots are always part of the closure (deduplicated by key).
/// - A nested object is part of the closure only if `admit` returns true
///   for it; rejected objects are not descended into.
/// - `expand` returns the direct references of an admitted object.
///
/// Objects are returned in visit order: roots first, then breadth-first.
pub fn closure<A, E>(roots: &[ObjectRef], mut admit: A, mut expand: E) -> Result<Vec<ObjectRef>>
where
    A: FnMut(&ObjectRef) -> Result<bool>,
    E: FnMut(&ObjectRef) -> Result<Vec<ObjectRef>>,
{
    let mut visited: HashSet<ObjectKey> = HashSet::new();
    let mut queue = VecDeque::new();
    let mut results = Vec::new();

    for root in roots {
        if visited.insert(root.key()) {
            results.push(Arc::clone(root));
            queue.push_back(Arc::clone(root));
        }
    }

    while let Some(current) = queue.pop_front() {
        for next in expand(&current)? {
            if !visited.insert(next.key()) {
                continue;
            }

            if admit(&next)? {
                results.push(Arc::clone(&next));
                queue.push_back(next);
            }
        }
    }

    Ok(results)
}

/// Objects to delete when removing `roots`.
///
/// Without a cascade predicate only the roots are removed. With one, every
/// nested object reachable through admitted objects is offered to it.
///
/// Stubs met on the way (roots included) are handed to `load` first, so the
/// predicate sees their fields and the walk follows their stored references.
pub fn removal_closure<L>(
    roots: &[ObjectRef],
    cascade: Option<&dyn Fn(&Object) -> bool>,
    mut load: L,
) -> Result<Vec<ObjectRef>>
where
    L: FnMut(&ObjectRef) -> Result<()>,
{
    let Some(cascade) = cascade else {
        return closure(roots, |_| Ok(false), |_| Ok(Vec::new()));
    };

    for root in roots.iter().filter(|root| !root.is_data_available()) {
        load(root)?;
    }

    closure(
        roots,
        |object| {
            if !object.is_data_available() {
                load(object)?;
            }
            Ok(cascade(object))
        },
        |object| Ok(codec::references(object)),
    )
}
