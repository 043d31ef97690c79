use serde_json::{Map, Number, Value};
use serde_yaml::Value as Yaml;

use crate::{
    config::{path, CONFIG_KEY_PARTICIPANTS},
    errors::Error,
    Result,
};

/// Parse YAML into a JSON tree with every map key stringified.
///
/// Numeric thread / participant ids become string keys so they can be
/// addressed with the same dotted paths as any other key.
pub fn parse_yaml(input: &str) -> Result<Value> {
    let mut doc: Yaml = serde_yaml::from_str(input)?;
    doc.apply_merge()?;
    yaml_to_json(doc)
}

fn yaml_to_json(v: Yaml) -> Result<Value> {
    Ok(match v {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => number_to_json(&n),
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut out = Map::new();
            for (k, v) in mapping {
                out.insert(key_to_string(k)?, yaml_to_json(v)?);
            }
            Value::Object(out)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

fn number_to_json(n: &serde_yaml::Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::from(i)
    } else if let Some(u) = n.as_u64() {
        Value::from(u)
    } else {
        n.as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn key_to_string(k: Yaml) -> Result<String> {
    match k {
        Yaml::String(s) => Ok(s),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Bool(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        Yaml::Tagged(tagged) => key_to_string(tagged.value),
        other => Err(Error::Config(format!(
            "unsupported configuration map key: {other:?}"
        ))),
    }
}

/// Rewrite keys containing a literal `.` into nested maps, in place.
///
/// Keys directly under a `participants` map are left alone: vanity usernames
/// such as `john.doe` must stay single keys.
pub fn expand_dotted_keys(v: &mut Value) {
    expand(v, None);
}

fn expand(v: &mut Value, parent_key: Option<&str>) {
    match v {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                expand(child, Some(key.as_str()));
            }

            if parent_key == Some(CONFIG_KEY_PARTICIPANTS) {
                return;
            }

            let dotted: Vec<String> = map.keys().filter(|k| k.contains('.')).cloned().collect();
            for key in dotted {
                if let Some(child) = map.remove(&key) {
                    let mut wrapper = Value::Object(std::mem::take(map));
                    path::assign(&mut wrapper, &path::parse_path(&key), child);
                    if let Value::Object(expanded) = wrapper {
                        *map = expanded;
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                expand(item, None);
            }
        }
        _ => {}
    }
}
