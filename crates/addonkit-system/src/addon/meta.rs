//! Addon metadata (`addon.json`): validation, defaults, lazy re-reading and
//! the mutable `extra` sub-tree.

use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use addonkit_core::{AppError, AppResult};

use super::storage::json_type;

/// Required file name of addon metadata.
pub const META_FILENAME: &str = "addon.json";

/// Version written back when the metadata omits one.
pub const DEFAULT_VERSION: &str = "0.0.1";

const REQUIRED_FIELDS: [&str; 4] = ["id", "module", "name", "authors"];

#[derive(Clone, Copy)]
enum FieldType {
    String,
    StringList,
    Object,
}

const FIELD_TYPES: [(&str, FieldType); 8] = [
    ("id", FieldType::String),
    ("module", FieldType::String),
    ("depends", FieldType::StringList),
    ("name", FieldType::String),
    ("description", FieldType::String),
    ("authors", FieldType::StringList),
    ("version", FieldType::String),
    ("extra", FieldType::Object),
];

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

/// The validated contents of an addon metadata file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaData {
    pub id: String,
    pub name: String,
    pub module: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub authors: Vec<String>,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Map<String, Value>>,
    /// Unknown top-level fields, preserved verbatim.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Whether `name` matches `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// SHA-256 hex digest of a dependency list. Each specifier is followed by a
/// zero byte so that element boundaries affect the digest.
pub fn dependency_hash(depends: &[String]) -> String {
    let mut hasher = Sha256::new();
    for spec in depends {
        hasher.update(spec.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

fn validate(content: &Map<String, Value>, origin: &Path) -> AppResult<()> {
    for field in REQUIRED_FIELDS {
        if !content.contains_key(field) {
            return Err(AppError::meta_invalid(
                format!("Metadata file content must include {field} field"),
                origin,
            ));
        }
    }

    for (field, expected) in FIELD_TYPES {
        let Some(value) = content.get(field) else {
            continue;
        };
        let (matches, required) = match expected {
            FieldType::String => (value.is_string(), "string"),
            FieldType::StringList => (value.is_array(), "array"),
            FieldType::Object => (value.is_object(), "object"),
        };
        if !matches {
            return Err(AppError::meta_invalid(
                format!(
                    "Field \"{field}\" has invalid type {}. Required type is {required}",
                    json_type(value)
                ),
                origin,
            ));
        }
        if let (FieldType::StringList, Some(items)) = (expected, value.as_array()) {
            if items.iter().any(|item| !item.is_string()) {
                return Err(AppError::meta_invalid(
                    format!("All elements of the \"{field}\" field must be strings"),
                    origin,
                ));
            }
        }
    }

    if let Some(name) = content.get("name").and_then(Value::as_str) {
        if !is_identifier(name) {
            return Err(AppError::meta_invalid(
                format!("Addon name \"{name}\" must be a valid identifier"),
                origin,
            ));
        }
    }
    Ok(())
}

fn install_defaults(content: &mut Map<String, Value>) -> bool {
    let defaults = [
        ("version", Value::String(DEFAULT_VERSION.to_string())),
        ("description", Value::String(String::new())),
        ("depends", Value::Array(Vec::new())),
    ];
    let mut changed = false;
    for (key, value) in defaults {
        if !content.contains_key(key) {
            content.insert(key.to_string(), value);
            changed = true;
        }
    }
    changed
}

/// Parse and validate a metadata document. Returns the data and whether
/// defaults had to be filled in.
fn parse_document(content: &str, origin: &Path) -> AppResult<(MetaData, bool)> {
    let value: Value = serde_json::from_str(content).map_err(|e| {
        AppError::meta_invalid(format!("Addon meta file is not valid JSON: {e}"), origin)
    })?;
    let Value::Object(mut map) = value else {
        return Err(AppError::meta_invalid(
            format!(
                "Addon meta file contains invalid data type: {}",
                json_type(&value)
            ),
            origin,
        ));
    };

    validate(&map, origin)?;
    let defaulted = install_defaults(&mut map);
    let data = serde_json::from_value(Value::Object(map))
        .map_err(|e| AppError::meta_invalid(e, origin))?;
    Ok((data, defaulted))
}

fn modified_time(path: &Path) -> AppResult<SystemTime> {
    Ok(std::fs::metadata(path)?.modified()?)
}

fn write_file(path: &Path, data: &MetaData) -> AppResult<()> {
    let content = serde_json::to_string_pretty(data)?;
    std::fs::write(path, content)?;
    Ok(())
}

enum MetaSource {
    File(PathBuf),
    Memory,
}

struct MetaState {
    data: MetaData,
    read_at: Option<SystemTime>,
}

/// Metadata store of one addon.
///
/// File-backed stores re-read the file on the next access after its
/// modification time moves past the last read. Stores built from a document
/// are read-only.
pub struct AddonMeta {
    source: MetaSource,
    state: RwLock<MetaState>,
}

impl AddonMeta {
    /// Read and validate the metadata file at `path`.
    pub fn open(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Err(AppError::meta_invalid("Addon meta doesn't exist", path));
        }
        if path.file_name().and_then(|n| n.to_str()) != Some(META_FILENAME) {
            return Err(AppError::meta_invalid(
                format!("Addon meta file's name must be \"{META_FILENAME}\""),
                path,
            ));
        }

        let (data, read_at) = Self::load_file(path)?;
        Ok(Self {
            source: MetaSource::File(path.to_path_buf()),
            state: RwLock::new(MetaState {
                data,
                read_at: Some(read_at),
            }),
        })
    }

    /// Build a read-only store from an in-memory JSON document.
    pub fn from_document(content: &str) -> AppResult<Self> {
        let (data, _) = parse_document(content, Path::new("<memory>"))?;
        Ok(Self {
            source: MetaSource::Memory,
            state: RwLock::new(MetaState {
                data,
                read_at: None,
            }),
        })
    }

    fn load_file(path: &Path) -> AppResult<(MetaData, SystemTime)> {
        let content = std::fs::read_to_string(path)?;
        let (data, defaulted) = parse_document(&content, path)?;
        if defaulted {
            write_file(path, &data)?;
            debug!(path = %path.display(), "Metadata defaults written");
        }
        Ok((data, modified_time(path)?))
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            MetaSource::File(path) => Some(path),
            MetaSource::Memory => None,
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.source, MetaSource::Memory)
    }

    /// Re-read and re-validate the backing file.
    pub fn read(&self) -> AppResult<()> {
        let MetaSource::File(path) = &self.source else {
            return Ok(());
        };
        let (data, read_at) = Self::load_file(path)?;
        let mut state = self.state.write();
        state.data = data;
        state.read_at = Some(read_at);
        Ok(())
    }

    fn refresh(&self) -> AppResult<()> {
        let MetaSource::File(path) = &self.source else {
            return Ok(());
        };
        let modified = modified_time(path)?;
        let stale = self
            .state
            .read()
            .read_at
            .is_none_or(|read_at| modified > read_at);
        if stale {
            debug!(path = %path.display(), "Metadata changed on disk, re-reading");
            self.read()?;
        }
        Ok(())
    }

    /// Current metadata, re-read first if the file changed.
    pub fn data(&self) -> AppResult<MappedRwLockReadGuard<'_, MetaData>> {
        self.refresh()?;
        Ok(RwLockReadGuard::map(self.state.read(), |state| &state.data))
    }

    /// Owned copy of the current metadata.
    pub fn snapshot(&self) -> AppResult<MetaData> {
        Ok(self.data()?.clone())
    }

    pub fn id(&self) -> AppResult<String> {
        Ok(self.data()?.id.clone())
    }

    pub fn name(&self) -> AppResult<String> {
        Ok(self.data()?.name.clone())
    }

    pub fn module(&self) -> AppResult<String> {
        Ok(self.data()?.module.clone())
    }

    pub fn version(&self) -> AppResult<String> {
        Ok(self.data()?.version.clone())
    }

    pub fn description(&self) -> AppResult<String> {
        Ok(self.data()?.description.clone())
    }

    pub fn authors(&self) -> AppResult<Vec<String>> {
        Ok(self.data()?.authors.clone())
    }

    pub fn depends(&self) -> AppResult<Vec<String>> {
        Ok(self.data()?.depends.clone())
    }

    /// Digest of the current dependency list.
    pub fn depends_hash(&self) -> AppResult<String> {
        Ok(dependency_hash(&self.data()?.depends))
    }

    /// Write the full metadata back to its file.
    pub fn save(&self) -> AppResult<()> {
        let MetaSource::File(path) = &self.source else {
            return Err(AppError::system(
                "Metadata built from a document is read-only and cannot be saved",
            ));
        };
        let mut state = self.state.write();
        write_file(path, &state.data)?;
        state.read_at = Some(modified_time(path)?);
        debug!(path = %path.display(), "Metadata saved");
        Ok(())
    }

    /// Modification time of the metadata file.
    pub fn update_time(&self) -> AppResult<SystemTime> {
        match &self.source {
            MetaSource::File(path) => modified_time(path),
            MetaSource::Memory => Err(AppError::system(
                "Metadata built from a document has no update time",
            )),
        }
    }

    /// Mutable view over the `extra` sub-tree, checked by `schema`.
    pub fn extra<S: ExtraSchema>(&self, schema: S) -> ExtraView<'_, S> {
        ExtraView { meta: self, schema }
    }

    fn with_extra<R>(
        &self,
        f: impl FnOnce(&mut Option<Map<String, Value>>) -> AppResult<R>,
    ) -> AppResult<R> {
        self.refresh()?;
        let mut state = self.state.write();
        f(&mut state.data.extra)
    }
}

impl fmt::Display for AddonMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        let path = self
            .path()
            .map_or_else(|| "<memory>".to_string(), |p| p.display().to_string());
        write!(
            f,
            "AddonMeta<{}>(name='{}', version='{}', path='{}')",
            state.data.id, state.data.name, state.data.version, path
        )
    }
}

impl fmt::Debug for AddonMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddonMeta")
            .field("path", &self.path())
            .field("data", &self.state.read().data)
            .finish()
    }
}

/// Validator for the `extra` sub-tree.
pub trait ExtraSchema {
    /// Accept or reject a candidate tree. The error becomes a `Type` error.
    fn validate(&self, extra: &Map<String, Value>) -> Result<(), String>;
}

/// Accepts any tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyExtra;

impl ExtraSchema for AnyExtra {
    fn validate(&self, _extra: &Map<String, Value>) -> Result<(), String> {
        Ok(())
    }
}

/// Requires the whole tree to deserialize into `T`.
pub struct TypedExtra<T>(PhantomData<fn() -> T>);

impl<T> TypedExtra<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for TypedExtra<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> ExtraSchema for TypedExtra<T> {
    fn validate(&self, extra: &Map<String, Value>) -> Result<(), String> {
        serde_json::from_value::<T>(Value::Object(extra.clone()))
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Checks the tree with a closure.
pub struct ValidatedExtra<F>(pub F);

impl<F> ExtraSchema for ValidatedExtra<F>
where
    F: Fn(&Map<String, Value>) -> Result<(), String>,
{
    fn validate(&self, extra: &Map<String, Value>) -> Result<(), String> {
        (self.0)(extra)
    }
}

/// Typed, mutable view over the metadata `extra` sub-tree.
///
/// Every mutation is validated against the schema before it is applied; a
/// rejected mutation leaves the tree unchanged. Changes are persisted by
/// [`ExtraView::save`].
pub struct ExtraView<'a, S> {
    meta: &'a AddonMeta,
    schema: S,
}

impl<S: ExtraSchema> ExtraView<'_, S> {
    fn apply(&self, mutate: impl FnOnce(&mut Map<String, Value>)) -> AppResult<()> {
        self.meta.with_extra(|extra| {
            let mut candidate = extra.clone().unwrap_or_default();
            mutate(&mut candidate);
            self.schema
                .validate(&candidate)
                .map_err(|e| AppError::type_error(format!("Extra data rejected: {e}")))?;
            *extra = Some(candidate);
            Ok(())
        })
    }

    pub fn get_value(&self, key: &str) -> AppResult<Option<Value>> {
        Ok(self
            .meta
            .data()?
            .extra
            .as_ref()
            .and_then(|extra| extra.get(key).cloned()))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        self.get_value(key)?
            .map(|value| {
                serde_json::from_value(value).map_err(|e| {
                    AppError::type_error(format!("Extra key '{key}' has an unexpected shape: {e}"))
                })
            })
            .transpose()
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> AppResult<()> {
        let value = serde_json::to_value(value).map_err(|e| {
            AppError::type_error(format!("Value for extra key '{key}' is not serialisable: {e}"))
        })?;
        self.apply(|extra| {
            extra.insert(key.to_string(), value);
        })
    }

    pub fn remove(&self, key: &str) -> AppResult<Option<Value>> {
        let removed = self.get_value(key)?;
        if removed.is_some() {
            self.apply(|extra| {
                extra.remove(key);
            })?;
        }
        Ok(removed)
    }

    pub fn contains(&self, key: &str) -> AppResult<bool> {
        Ok(self
            .meta
            .data()?
            .extra
            .as_ref()
            .is_some_and(|extra| extra.contains_key(key)))
    }

    pub fn keys(&self) -> AppResult<Vec<String>> {
        Ok(self
            .meta
            .data()?
            .extra
            .as_ref()
            .map(|extra| extra.keys().cloned().collect())
            .unwrap_or_default())
    }

    /// The whole tree deserialized into `T`.
    pub fn typed<T: DeserializeOwned>(&self) -> AppResult<T> {
        let extra = self.meta.data()?.extra.clone().unwrap_or_default();
        serde_json::from_value(Value::Object(extra))
            .map_err(|e| AppError::type_error(format!("Extra data has an unexpected shape: {e}")))
    }

    /// Replace the whole tree with `value`, which must serialise to an
    /// object.
    pub fn replace<T: Serialize>(&self, value: &T) -> AppResult<()> {
        let Value::Object(map) = serde_json::to_value(value)
            .map_err(|e| AppError::type_error(format!("Extra data is not serialisable: {e}")))?
        else {
            return Err(AppError::type_error("Extra data must serialise to an object"));
        };
        self.apply(|extra| *extra = map)
    }

    /// Persist the metadata, including this tree.
    pub fn save(&self) -> AppResult<()> {
        self.meta.save()
    }
}
