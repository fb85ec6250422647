// ─── Manifest schema migrations ───
// Each step is a pure `Value -> Value` transform from version N to N+1.
// `migrate` applies them in order until the payload is current.

use serde_json::{Map, Value};
use tracing::info;

use super::model::{Manifest, CURRENT_SCHEMA_VERSION};
use crate::core::error::{ModsError, ModsResult};

type MigrationStep = fn(Map<String, Value>) -> ModsResult<Map<String, Value>>;

/// `STEPS[n]` upgrades a version `n` payload to version `n + 1`.
const STEPS: [MigrationStep; CURRENT_SCHEMA_VERSION as usize] = [v0_to_v1, v1_to_v2];

/// Upgrade a raw manifest document and deserialize it.
///
/// Payloads without `schema_version` are treated as version 0.
pub fn migrate(raw: Value) -> ModsResult<Manifest> {
    let upgraded = upgrade(raw)?;
    serde_json::from_value(Value::Object(upgraded))
        .map_err(|e| ModsError::InvalidSchema(e.to_string()))
}

/// Run the transform chain without deserializing the result.
pub fn upgrade(raw: Value) -> ModsResult<Map<String, Value>> {
    let Value::Object(mut doc) = raw else {
        return Err(ModsError::InvalidSchema(
            "manifest root must be a JSON object".into(),
        ));
    };

    let mut version = schema_version_of(&doc)?;
    if version > CURRENT_SCHEMA_VERSION {
        return Err(ModsError::UnsupportedSchema {
            found: version,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }

    while version < CURRENT_SCHEMA_VERSION {
        let step = STEPS[version as usize];
        doc = step(doc)?;
        version += 1;
        doc.insert("schema_version".into(), Value::from(version));
        info!("Migrated mods manifest to schema version {}", version);
    }

    Ok(doc)
}

fn schema_version_of(doc: &Map<String, Value>) -> ModsResult<u32> {
    match doc.get("schema_version") {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| ModsError::InvalidSchema(format!("bad schema_version {n}"))),
        Some(other) => Err(ModsError::InvalidSchema(format!(
            "schema_version must be an integer, got {other}"
        ))),
    }
}

/// v0 stored `mods` as an object keyed by id.
fn v0_to_v1(mut doc: Map<String, Value>) -> ModsResult<Map<String, Value>> {
    match doc.remove("mods") {
        None | Some(Value::Null) => {
            doc.insert("mods".into(), Value::Array(Vec::new()));
        }
        Some(Value::Array(list)) => {
            doc.insert("mods".into(), Value::Array(list));
        }
        Some(Value::Object(by_id)) => {
            let mut list = Vec::with_capacity(by_id.len());
            for (id, entry) in by_id {
                let Value::Object(mut entry) = entry else {
                    return Err(ModsError::InvalidSchema(format!(
                        "mod '{id}' must be an object"
                    )));
                };
                entry.entry("id").or_insert(Value::String(id));
                list.push(Value::Object(entry));
            }
            doc.insert("mods".into(), Value::Array(list));
        }
        Some(other) => {
            return Err(ModsError::InvalidSchema(format!(
                "mods must be a list, got {other}"
            )));
        }
    }
    Ok(doc)
}

/// v1 allowed untyped sources, mixed-case loader/side values and null hashes.
fn v1_to_v2(mut doc: Map<String, Value>) -> ModsResult<Map<String, Value>> {
    lowercase_field(&mut doc, "loader");

    if let Some(Value::Array(mods)) = doc.get_mut("mods") {
        for entry in mods.iter_mut() {
            let Value::Object(entry) = entry else {
                continue;
            };
            lowercase_field(entry, "loader");
            lowercase_field(entry, "side");

            if matches!(entry.get("hashes"), Some(Value::Null)) {
                entry.remove("hashes");
            }

            match entry.get_mut("source") {
                None | Some(Value::Null) => {
                    entry.insert("source".into(), serde_json::json!({ "type": "local" }));
                }
                Some(Value::Object(source)) => {
                    lowercase_field(source, "type");
                    source
                        .entry("type")
                        .or_insert_with(|| Value::String("local".into()));
                    source.retain(|_, v| !v.is_null());
                }
                Some(_) => {}
            }
        }
    }
    Ok(doc)
}

fn lowercase_field(map: &mut Map<String, Value>, key: &str) {
    if let Some(Value::String(s)) = map.get_mut(key) {
        *s = s.to_ascii_lowercase();
    }
}
