//! Compile per-component JSON submissions into one catalog document.
//!
//! Validates the identity fields the rest of the pipeline depends on,
//! rejects duplicate repositories, and carries forward previously fetched
//! metrics so enrichment timestamps survive a rebuild.

use crate::Result;
use crate::catalog::repo_spec::RepoSpec;
use crate::catalog::store::load_json;
use crate::misc::{get_nested, utc_now_iso};
use ohno::app_err;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

const LOG_TARGET: &str = "   compile";

/// One validation or parse problem in a submission file.
#[derive(Debug)]
pub struct BuildError {
    pub file: PathBuf,
    pub json_path: Option<String>,
    pub message: String,
}

impl core::fmt::Display for BuildError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.json_path {
            Some(jp) => write!(f, "{}: {jp}: {}", self.file.display(), self.message),
            None => write!(f, "{}: {}", self.file.display(), self.message),
        }
    }
}

/// Compiled document plus any per-file problems encountered.
#[derive(Debug)]
pub struct BuildOutcome {
    pub doc: Value,
    pub errors: Vec<BuildError>,
}

/// Error local to one submission, before it is attributed to a file.
struct FieldError {
    json_path: String,
    message: String,
}

impl FieldError {
    fn new(json_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            json_path: json_path.into(),
            message: message.into(),
        }
    }
}

/// Build the compiled catalog from `components_dir/*.json`.
///
/// Invalid submissions are collected in [`BuildOutcome::errors`] and excluded
/// from the document; the caller decides whether errors fail the build.
pub fn build_catalog(components_dir: &Path, schema_path: &Path, previous: Option<&Path>) -> Result<BuildOutcome> {
    let categories = taxonomy_categories(schema_path)?;
    let prev_index = load_previous_index(previous);

    if !components_dir.is_dir() {
        return Err(app_err!("missing components directory: {}", components_dir.display()));
    }

    let mut files: Vec<PathBuf> = fs::read_dir(components_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut errors = Vec::new();
    let mut components: Vec<Value> = Vec::new();
    let mut seen_keys: HashSet<String> = HashSet::new();

    for file in files {
        let submission = match load_json(&file) {
            Ok(v) => v,
            Err(e) => {
                errors.push(BuildError {
                    file,
                    json_path: None,
                    message: format!("{e}"),
                });
                continue;
            }
        };

        match compile_submission(&submission, &prev_index) {
            Ok((key, compiled)) => {
                if seen_keys.contains(&key) {
                    errors.push(BuildError {
                        file,
                        json_path: Some("links.github".to_string()),
                        message: format!("duplicate component identity (same GitHub repo): {key}"),
                    });
                    continue;
                }
                let _ = seen_keys.insert(key);
                components.push(compiled);
            }
            Err(fe) => {
                errors.push(BuildError {
                    file,
                    json_path: Some(fe.json_path),
                    message: fe.message,
                });
            }
        }
    }

    // Deterministic ordering for stable diffs.
    components.sort_by(|a, b| {
        let left = (sort_str(a, "gitHubUrl"), sort_str(a, "title"));
        let right = (sort_str(b, "gitHubUrl"), sort_str(b, "title"));
        left.cmp(&right)
    });

    log::info!(target: LOG_TARGET, "Compiled {} component(s), {} error(s)", components.len(), errors.len());

    Ok(BuildOutcome {
        doc: json!({
            "generatedAt": utc_now_iso(),
            "schemaVersion": 1,
            "categories": categories,
            "components": components,
        }),
        errors,
    })
}

fn sort_str<'a>(component: &'a Value, field: &str) -> &'a str {
    component.get(field).and_then(Value::as_str).unwrap_or_default()
}

/// Read the fixed taxonomy from the category enum of the component schema,
/// prefixed with the "All" pseudo-category the gallery UI expects.
fn taxonomy_categories(schema_path: &Path) -> Result<Vec<String>> {
    let schema = load_json(schema_path)?;
    let enum_values = get_nested(&schema, &["properties", "categories", "items", "enum"])
        .and_then(Value::as_array)
        .ok_or_else(|| app_err!("no category enum at properties.categories.items.enum in '{}'", schema_path.display()))?;

    let mut categories = vec!["All".to_string()];
    for value in enum_values {
        let s = value
            .as_str()
            .ok_or_else(|| app_err!("category enum entries must be strings in '{}'", schema_path.display()))?;
        categories.push(s.to_string());
    }
    Ok(categories)
}

/// Index a previous compiled artifact by repo key for metric carry-forward.
/// Missing or unreadable previous artifacts yield an empty index.
fn load_previous_index(previous: Option<&Path>) -> HashMap<String, Value> {
    let mut index = HashMap::new();

    let Some(path) = previous else {
        return index;
    };
    let Ok(doc) = load_json(path) else {
        log::warn!(target: LOG_TARGET, "Could not read previous artifact '{}', skipping carry-forward", path.display());
        return index;
    };

    let components = doc.get("components").and_then(Value::as_array).cloned().unwrap_or_default();
    for component in components {
        let Some(url) = component.get("gitHubUrl").and_then(Value::as_str) else {
            continue;
        };
        let Ok(spec) = RepoSpec::parse(url) else {
            continue;
        };
        let _ = index.insert(spec.key(), component);
    }
    index
}

fn required_str<'a>(submission: &'a Value, path: &[&str]) -> Result<&'a str, FieldError> {
    let json_path = path.join(".");
    get_nested(submission, path)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| FieldError::new(json_path, "required string field is missing or empty"))
}

fn compile_submission(submission: &Value, prev_index: &HashMap<String, Value>) -> Result<(String, Value), FieldError> {
    if !submission.is_object() {
        return Err(FieldError::new("$", "submission JSON must be an object"));
    }

    let title = required_str(submission, &["title"])?;
    let author_github = required_str(submission, &["author", "github"])?;
    let github_url = required_str(submission, &["links", "github"])?;

    let spec = RepoSpec::parse(github_url).map_err(|e| FieldError::new("links.github", format!("{e}")))?;
    let key = spec.key();

    let categories = submitted_categories(submission)?;

    let pip_link = pip_link(submission);
    let pypi_project = get_nested(submission, &["links", "pypi"])
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let app_url = get_nested(submission, &["links", "demo"]).and_then(Value::as_str);
    let image_url = get_nested(submission, &["media", "image"]).and_then(Value::as_str);
    let enabled = get_nested(submission, &["governance", "enabled"]).and_then(Value::as_bool).unwrap_or(true);

    let prev = prev_index.get(&key);

    let mut component = Map::new();
    let _ = component.insert("title".to_string(), json!(title));
    let _ = component.insert("author".to_string(), json!(author_github));
    let _ = component.insert("pipLink".to_string(), json!(pip_link));
    let _ = component.insert("pypi".to_string(), json!(pypi_project));
    let _ = component.insert("categories".to_string(), json!(categories));
    let _ = component.insert("image".to_string(), json!(image_url));
    let _ = component.insert("gitHubUrl".to_string(), json!(spec.canonical_url()));
    let _ = component.insert("enabled".to_string(), json!(enabled));
    let _ = component.insert("appUrl".to_string(), json!(app_url));
    let _ = component.insert("socialUrl".to_string(), json!(format!("https://github.com/{author_github}")));
    let _ = component.insert("metrics".to_string(), carried_metrics(prev));

    Ok((key, Value::Object(component)))
}

/// Per-component categories must be non-empty and never contain "All",
/// which is an implied UI filter mode rather than a real assignment.
fn submitted_categories(submission: &Value) -> Result<Vec<String>, FieldError> {
    let mut out: Vec<String> = Vec::new();
    if let Some(list) = submission.get("categories").and_then(Value::as_array) {
        for c in list {
            if let Some(s) = c.as_str()
                && s != "All"
                && !out.iter().any(|existing| existing == s)
            {
                out.push(s.to_string());
            }
        }
    }

    if out.is_empty() {
        return Err(FieldError::new("categories", "must be non-empty and must not be 'All'"));
    }
    Ok(out)
}

fn pip_link(submission: &Value) -> Option<String> {
    if let Some(cmd) = get_nested(submission, &["install", "pip"]).and_then(Value::as_str) {
        let cmd = cmd.trim();
        if !cmd.is_empty() {
            return Some(cmd.to_string());
        }
    }

    get_nested(submission, &["links", "pypi"])
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pkg| format!("pip install {pkg}"))
}

/// Last-known-good metrics from the previous artifact. The github bucket is
/// always materialized (stars default to 0, matching the gallery UI); pypi
/// and pypistats buckets carry over verbatim when present.
fn carried_metrics(prev: Option<&Value>) -> Value {
    let prev_int = |path: &[&str]| prev.and_then(|p| get_nested(p, path)).and_then(Value::as_i64);
    let prev_str = |path: &[&str]| prev.and_then(|p| get_nested(p, path)).and_then(Value::as_str);
    let prev_bool = |path: &[&str]| prev.and_then(|p| get_nested(p, path)).and_then(Value::as_bool);

    let stars = prev_int(&["metrics", "github", "stars"])
        .or_else(|| prev_int(&["stars"])) // legacy top-level field
        .unwrap_or(0);

    json!({
        "github": {
            "stars": stars,
            "forks": prev_int(&["metrics", "github", "forks"]),
            "openIssues": prev_int(&["metrics", "github", "openIssues"]),
            "contributorsCount": prev_int(&["metrics", "github", "contributorsCount"]),
            "lastPushAt": prev_str(&["metrics", "github", "lastPushAt"]),
            "fetchedAt": prev_str(&["metrics", "github", "fetchedAt"]),
            "isStale": prev_bool(&["metrics", "github", "isStale"]),
        },
        "pypi": prev.and_then(|p| get_nested(p, &["metrics", "pypi"])).cloned().unwrap_or(Value::Null),
        "pypistats": prev.and_then(|p| get_nested(p, &["metrics", "pypistats"])).cloned().unwrap_or(Value::Null),
    })
}
