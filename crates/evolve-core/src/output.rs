//! The result of reading an agent's `output/` directory, optionally
//! validated against a declared schema.

use serde::{Deserialize, Serialize};

use crate::files::FileMap;

/// Files downloaded from `output/`, plus schema-validated data when a
/// schema was declared.
///
/// Exactly one of `data` or `(error, raw_data)` is populated when a schema
/// is declared; with no schema, both are left empty and only `files` is
/// meaningful.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(bound = "S: Serialize + for<'de2> Deserialize<'de2>")]
pub struct OutputResult<S> {
    /// Files found under `output/` since the run started.
    pub files: FileMap,
    /// The schema-validated value, when validation succeeded.
    pub data: Option<S>,
    /// A validation failure message, when validation failed.
    pub error: Option<String>,
    /// The raw, unparsed `output/result.json` contents, when validation
    /// failed.
    pub raw_data: Option<String>,
}

impl<S> OutputResult<S> {
    /// Build a result with no schema declared: only `files` is populated.
    pub fn files_only(files: FileMap) -> Self {
        OutputResult { files, data: None, error: None, raw_data: None }
    }

    /// Build a successfully validated result.
    pub fn validated(files: FileMap, data: S) -> Self {
        OutputResult { files, data: Some(data), error: None, raw_data: None }
    }

    /// Build a result whose schema validation failed.
    pub fn invalid(files: FileMap, error: impl Into<String>, raw_data: impl Into<String>) -> Self {
        OutputResult {
            files,
            data: None,
            error: Some(error.into()),
            raw_data: Some(raw_data.into()),
        }
    }
}
