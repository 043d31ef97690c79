//! Dotted-path addressing over a `serde_json::Value` tree.
//!
//! `modules.Quote.maxWords` splits on dots. Bracket segments are taken
//! literally, so `chatThreads.100.participants[john.doe]` (or `["john.doe"]`)
//! addresses a single key that contains a dot.

use serde_json::{Map, Value};

/// Split a dotted path into segments.
pub fn parse_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => flush(&mut segments, &mut current),
            '[' => {
                flush(&mut segments, &mut current);
                let mut inner = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(c);
                }
                if !closed {
                    // Unterminated bracket: keep it verbatim as a plain segment.
                    current.push('[');
                    current.push_str(&inner);
                    continue;
                }
                segments.push(strip_quotes(&inner).to_string());
            }
            _ => current.push(c),
        }
    }
    flush(&mut segments, &mut current);
    segments
}

fn flush(segments: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        segments.push(std::mem::take(current));
    }
}

fn strip_quotes(s: &str) -> &str {
    let t = s.trim();
    if t.len() >= 2
        && ((t.starts_with('"') && t.ends_with('"')) || (t.starts_with('\'') && t.ends_with('\'')))
    {
        return &t[1..t.len() - 1];
    }
    t
}

/// Read-only lookup. Never creates nodes.
pub fn lookup<'a, S: AsRef<str>>(root: &'a Value, segments: &[S]) -> Option<&'a Value> {
    let mut node = root;
    for seg in segments {
        let seg = seg.as_ref();
        node = match node {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(node)
}

/// Write `value` at `segments`, creating intermediate maps as needed.
///
/// Scalars in the way are replaced by maps. An empty path replaces the root.
/// A sequence index at or past the end appends one element.
pub fn assign<S: AsRef<str>>(root: &mut Value, segments: &[S], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    let mut node = root;
    for seg in parents {
        node = child_mut(node, seg.as_ref());
    }

    let last = last.as_ref();
    if let Value::Array(items) = node {
        if let Ok(idx) = last.parse::<usize>() {
            match items.get_mut(idx) {
                Some(slot) => *slot = value,
                None => items.push(value),
            }
            return;
        }
    }
    ensure_object(node).insert(last.to_string(), value);
}

fn child_mut<'a>(node: &'a mut Value, seg: &str) -> &'a mut Value {
    let array_idx = match node {
        Value::Array(_) => seg.parse::<usize>().ok(),
        _ => None,
    };

    let slot = match (node, array_idx) {
        (Value::Array(items), Some(idx)) => {
            let idx = if idx < items.len() {
                idx
            } else {
                items.push(Value::Object(Map::new()));
                items.len() - 1
            };
            &mut items[idx]
        }
        (node, _) => ensure_object(node)
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new())),
    };
    if !slot.is_object() && !slot.is_array() {
        *slot = Value::Object(Map::new());
    }
    slot
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced by an object"),
    }
}

/// Deep-merge `src` into `dst`.
///
/// Maps merge recursively; any other `src` value replaces `dst`. A `null` in
/// `src` never clears an existing value.
pub fn deep_merge(dst: &mut Value, src: &Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (key, src_val) in src_map {
                match dst_map.get_mut(key) {
                    Some(dst_val) => deep_merge(dst_val, src_val),
                    None => {
                        dst_map.insert(key.clone(), src_val.clone());
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (dst, src) => *dst = src.clone(),
    }
}
