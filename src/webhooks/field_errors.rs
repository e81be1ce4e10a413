// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Field-level validation errors, rendered the way the Kubernetes API server
//! renders them (`metadata.labels[key]: Forbidden: detail`).

use std::fmt;

/// Path to a field of the object under validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPath(String);

impl FieldPath {
    #[must_use]
    pub fn new(root: &str) -> Self {
        Self(root.to_string())
    }

    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        Self(format!("{}.{name}", self.0))
    }

    /// Map key, e.g. `metadata.labels[topology.kubernetes.io/zone]`.
    #[must_use]
    pub fn key(&self, key: &str) -> Self {
        Self(format!("{}[{key}]", self.0))
    }

    /// List element, e.g. `spec.volumes[1]`.
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        Self(format!("{}[{index}]", self.0))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldErrorType {
    Forbidden,
    Invalid,
    Required,
}

impl FieldErrorType {
    fn as_str(self) -> &'static str {
        match self {
            FieldErrorType::Forbidden => "Forbidden",
            FieldErrorType::Invalid => "Invalid value",
            FieldErrorType::Required => "Required value",
        }
    }
}

/// One rejected field and why.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub path: FieldPath,
    pub error_type: FieldErrorType,
    pub detail: String,
}

impl FieldError {
    pub fn forbidden(path: FieldPath, detail: impl Into<String>) -> Self {
        Self {
            path,
            error_type: FieldErrorType::Forbidden,
            detail: detail.into(),
        }
    }

    pub fn invalid(path: FieldPath, detail: impl Into<String>) -> Self {
        Self {
            path,
            error_type: FieldErrorType::Invalid,
            detail: detail.into(),
        }
    }

    pub fn required(path: FieldPath, detail: impl Into<String>) -> Self {
        Self {
            path,
            error_type: FieldErrorType::Required,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.path, self.error_type.as_str(), self.detail)
    }
}

/// Every field error found for one request. Empty means allowed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldErrorList(Vec<FieldError>);

impl FieldErrorList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: FieldError) {
        self.0.push(error);
    }

    pub fn extend(&mut self, other: FieldErrorList) {
        self.0.extend(other.0);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// One reason string per field error.
    #[must_use]
    pub fn reasons(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}

impl From<FieldError> for FieldErrorList {
    fn from(error: FieldError) -> Self {
        Self(vec![error])
    }
}

impl fmt::Display for FieldErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reasons().join(", "))
    }
}
