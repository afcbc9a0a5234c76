use std::fmt;

/// Error for rejecting empty or whitespace-only identifiers at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("identifier must not be empty")]
pub struct IdParseError;

/// Identifier for one logical operation (one tool invocation plus its
/// full retry history).
///
/// Callers supply ids (typically UUIDs minted by the session); the type
/// only enforces non-emptiness so dependency references stay meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdParseError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(IdParseError);
        }
        Ok(Self(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier grouping related operations under one rollback plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdParseError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(IdParseError);
        }
        Ok(Self(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
