//! foodlog error types.

/// Errors surfaced to http callers.
#[derive(Debug, thiserror::Error)]
pub enum FoodError {
    /// A required field is missing or malformed.
    #[error("{0}")]
    Validation(String),

    /// The submitted category tag has no seeded category record.
    #[error("UnknownCategory: {0}")]
    UnknownCategory(String),

    /// A collection file or upload could not be read or written.
    #[error("StorageFault: {0}")]
    Storage(#[from] std::io::Error),

    /// A response body could not be encoded.
    #[error("EncodeFault: {0}")]
    Encode(#[from] serde_json::Error),
}

impl FoodError {
    /// The http status code this error is reported with.
    pub fn status(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::UnknownCategory(_) => 400,
            Self::Storage(_) | Self::Encode(_) => 500,
        }
    }

    /// Construct a validation error.
    pub fn validation<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Validation(ctx.to_string())
    }
}

/// The foodlog result type.
pub type FoodResult<T> = Result<T, FoodError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_status() {
        assert_eq!(400, FoodError::validation("bla").status());
        assert_eq!(400, FoodError::UnknownCategory("fruit".into()).status());
        assert_eq!(
            500,
            FoodError::from(std::io::Error::other("disk")).status()
        );
    }

    #[test]
    fn error_display() {
        assert_eq!("bla", FoodError::validation("bla").to_string());
        assert_eq!(
            "UnknownCategory: fruit",
            FoodError::UnknownCategory("fruit".into()).to_string(),
        );
        assert_eq!(
            "StorageFault: disk",
            FoodError::from(std::io::Error::other("disk")).to_string(),
        );
    }
}
