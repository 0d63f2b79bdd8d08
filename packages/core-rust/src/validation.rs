/// Outcome of the soft validation run when a header set or route table
/// is constructed. Construction never fails; this records what was wrong.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ValidationResult {
    /// Every entry was well-formed.
    #[default]
    Valid,
    /// One or more entries were malformed and were repaired or dropped.
    Invalid {
        /// Human-readable descriptions of each validation failure.
        errors: Vec<String>,
    },
}

impl ValidationResult {
    /// Builds a result from collected error messages. Empty means valid.
    #[must_use]
    pub fn from_errors(errors: Vec<String>) -> Self {
        if errors.is_empty() {
            Self::Valid
        } else {
            Self::Invalid { errors }
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// The recorded error messages; empty when valid.
    #[must_use]
    pub fn errors(&self) -> &[String] {
        match self {
            Self::Valid => &[],
            Self::Invalid { errors } => errors,
        }
    }
}
