//! Meta validation: turns a raw job body into one whose `meta` mapping is
//! safe to hand to a command as environment variables.
//!
//! Steps run in order over the same mapping:
//!
//! 1. [`ensure_meta`] inserts an empty `meta` mapping when absent.
//! 2. [`inject_output_path`] sets `meta["s3_output"]` to a fresh object key.
//! 3. [`transform_meta`] stringifies values, then drops unknown and empty keys.
//! 4. [`ensure_required`] reports every required key that is still missing.
//!
//! All functions are pure apart from the clock and the random object id.

use crate::config::JobConfig;
use crate::error::{Error, Result};
use crate::model::{JobBody, META_KEY, OUTPUT_KEY};
use chrono::{DateTime, Datelike, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Run the full validation pipeline over a job body.
///
/// The body is mutated in place even when validation fails, so that a
/// failure reply can still report what was generated.
pub fn validate(job: &JobConfig, body: &mut JobBody) -> Result<()> {
    let meta = ensure_meta(body)?;
    inject_output_path(job, meta);
    transform_meta(meta, job.whitelist());
    ensure_required(meta, &job.meta_required)
}

/// Return the body's `meta` mapping, inserting an empty one when absent.
pub fn ensure_meta(body: &mut JobBody) -> Result<&mut Map<String, Value>> {
    body.entry(META_KEY)
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| Error::InvalidMeta("expected a mapping".to_string()))
}

/// Set `meta["s3_output"]` to a newly generated output object path.
pub fn inject_output_path(job: &JobConfig, meta: &mut Map<String, Value>) {
    let path = output_path(job, Utc::now(), Uuid::new_v4());
    meta.insert(OUTPUT_KEY.to_string(), Value::String(path));
}

/// Format `<bucket>/<name>/<version>/<YYYY>/<MM>/<DD>/<id>.<ext>`.
pub fn output_path(job: &JobConfig, now: DateTime<Utc>, id: Uuid) -> String {
    format!(
        "{}/{}/{}/{:04}/{:02}/{:02}/{}.{}",
        job.s3_bucket,
        job.name,
        job.version,
        now.year(),
        now.month(),
        now.day(),
        id,
        job.extension(),
    )
}

/// Stringify every meta value, then drop keys outside the whitelist and
/// keys whose value is empty. The generated output path is always kept.
pub fn transform_meta<'a>(
    meta: &mut Map<String, Value>,
    whitelist: impl IntoIterator<Item = &'a str>,
) {
    for value in meta.values_mut() {
        if !value.is_string() {
            *value = Value::String(stringify(value));
        }
    }

    let allowed: Vec<&str> = whitelist.into_iter().collect();
    meta.retain(|key, value| {
        (key == OUTPUT_KEY || allowed.contains(&key.as_str()))
            && value.as_str().is_some_and(|s| !s.is_empty())
    });
}

/// Check that every required key is present, listing all missing keys.
pub fn ensure_required(meta: &Map<String, Value>, required: &[String]) -> Result<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|key| !meta.contains_key(key.as_str()))
        .cloned()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::MissingMeta(missing))
    }
}

/// Default string form of a meta value. Lists are comma-joined.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(stringify).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}
