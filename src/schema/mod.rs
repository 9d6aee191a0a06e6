//! Collection schemas: discovery from the repository, path classification and validation.
//!
//! Schemas are optional. A repository without a configuration has no schemas and every
//! document is accepted as-is.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use serde_json::{Number, Value};

use crate::errors::AppError;
use crate::models::{FieldError, FieldSchema, FieldType, Metadata, RepoId, SchemaDefinition};
use crate::remote::{ContentStore, Credential};

/// Repository path of the collection configuration.
pub const DEFAULT_CONFIG_PATH: &str = ".gitpress/collections.yml";
/// Directory that holds collections, stripped before classification when present.
pub const CONTENT_ROOT: &str = "content";
/// Collection of files that sit directly under the content root.
pub const ROOT_COLLECTION: &str = "pages";

#[derive(Debug, Deserialize)]
struct CollectionsFile {
    #[serde(default)]
    collections: BTreeMap<String, CollectionConfig>,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    #[serde(default)]
    fields: BTreeMap<String, FieldSchema>,
}

/// Reads collection schemas out of a repository.
#[derive(Clone)]
pub struct SchemaRegistry {
    store: Arc<dyn ContentStore>,
    config_path: String,
}

impl SchemaRegistry {
    pub fn new(store: Arc<dyn ContentStore>, config_path: impl Into<String>) -> Self {
        Self {
            store,
            config_path: config_path.into(),
        }
    }

    /// Discover the schemas declared by `repo`.
    ///
    /// A missing configuration declares no schemas. `None` means the configuration exists but
    /// could not be read or parsed, so whatever was discovered before is still the best answer.
    pub async fn discover(
        &self,
        credential: &Credential,
        repo: &RepoId,
    ) -> Option<Vec<SchemaDefinition>> {
        match self.store.get_file(credential, repo, &self.config_path).await {
            Ok(Some(file)) => match parse_config(&file.content, repo) {
                Ok(schemas) => {
                    tracing::debug!("Discovered {} collection schemas in {}", schemas.len(), repo);
                    Some(schemas)
                }
                Err(e) => {
                    tracing::warn!("Ignoring invalid schema config in {}: {}", repo, e);
                    None
                }
            },
            Ok(None) => {
                tracing::debug!("No schema config at {} in {}", self.config_path, repo);
                Some(Vec::new())
            }
            Err(e) => {
                tracing::warn!("Could not read schema config from {}: {}", repo, e);
                None
            }
        }
    }
}

/// Parse the collections configuration file.
pub fn parse_config(raw: &str, repo: &RepoId) -> Result<Vec<SchemaDefinition>, AppError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let file: CollectionsFile = serde_yaml::from_str(raw)?;

    Ok(file
        .collections
        .into_iter()
        .map(|(collection, config)| SchemaDefinition {
            repository: repo.full_name(),
            collection,
            fields: config.fields,
        })
        .collect())
}

/// Collection a path belongs to: its first segment below the content root.
pub fn classify(path: &str) -> String {
    let mut path = path;
    loop {
        let trimmed = path.trim_start_matches('/').trim_start_matches("./");
        if trimmed == path {
            break;
        }
        path = trimmed;
    }
    let path = path
        .strip_prefix(CONTENT_ROOT)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(path);

    match path.split_once('/') {
        Some((first, _)) if !first.is_empty() => first.to_string(),
        _ => ROOT_COLLECTION.to_string(),
    }
}

/// Result of validating metadata against a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub valid: bool,
    /// Normalized metadata when valid, the untouched input otherwise
    pub data: Metadata,
    pub errors: Vec<FieldError>,
}

/// Check required fields and types, applying defaults and coercions.
pub fn validate(metadata: &Metadata, schema: &SchemaDefinition) -> ValidationOutcome {
    let mut errors = Vec::new();
    let data = validate_fields(metadata, &schema.fields, "", &mut errors);

    if errors.is_empty() {
        ValidationOutcome {
            valid: true,
            data,
            errors,
        }
    } else {
        ValidationOutcome {
            valid: false,
            data: metadata.clone(),
            errors,
        }
    }
}

fn validate_fields(
    input: &Metadata,
    fields: &BTreeMap<String, FieldSchema>,
    prefix: &str,
    errors: &mut Vec<FieldError>,
) -> Metadata {
    let mut out = input.clone();

    for (name, field) in fields {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };

        match input.get(name) {
            None | Some(Value::Null) => {
                if let Some(default) = &field.default {
                    out.insert(name.clone(), default.clone());
                } else if field.required {
                    errors.push(FieldError {
                        field: path,
                        message: "is required".to_string(),
                    });
                }
            }
            Some(value) => {
                if let Some(coerced) = coerce(value, field, &path, errors) {
                    out.insert(name.clone(), coerced);
                }
            }
        }
    }

    out
}

fn coerce(
    value: &Value,
    field: &FieldSchema,
    path: &str,
    errors: &mut Vec<FieldError>,
) -> Option<Value> {
    let coerced = match (field.field_type, value) {
        (FieldType::String, Value::String(_)) => Some(value.clone()),
        (FieldType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (FieldType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),

        (FieldType::Number, Value::Number(_)) => Some(value.clone()),
        (FieldType::Number, Value::String(s)) => parse_number(s.trim()),

        (FieldType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Some(value.clone()),
        (FieldType::Integer, Value::Number(n)) => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| Value::from(f as i64)),
        (FieldType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),

        (FieldType::Boolean, Value::Bool(_)) => Some(value.clone()),
        (FieldType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },

        (FieldType::Date, Value::String(s)) if is_date(s.trim()) => Some(value.clone()),

        (FieldType::Array, Value::Array(items)) => match &field.items {
            Some(item_schema) => {
                let mut out = Vec::with_capacity(items.len());
                let mut ok = true;
                for (i, item) in items.iter().enumerate() {
                    match coerce(item, item_schema, &format!("{}[{}]", path, i), errors) {
                        Some(v) => out.push(v),
                        None => ok = false,
                    }
                }
                // item errors are already recorded
                return ok.then_some(Value::Array(out));
            }
            None => Some(value.clone()),
        },

        (FieldType::Object, Value::Object(map)) => match &field.fields {
            Some(nested) => {
                let before = errors.len();
                let out = validate_fields(map, nested, path, errors);
                return (errors.len() == before).then_some(Value::Object(out));
            }
            None => Some(value.clone()),
        },

        _ => None,
    };

    if coerced.is_none() {
        errors.push(FieldError {
            field: path.to_string(),
            message: format!(
                "expected {}, found {}",
                field.field_type.as_str(),
                describe(value)
            ),
        });
    }
    coerced
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn is_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() || DateTime::parse_from_rfc3339(s).is_ok()
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {}", b),
        Value::Number(n) => format!("number {}", n),
        Value::String(s) => format!("string {:?}", s),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}
