use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SectionError {
    #[error("section not found: {title}")]
    NotFound {
        title: String,
        available: Vec<String>,
        suggestion: Option<String>,
    },
}

impl SectionError {
    /// Attach the file path to turn this into an operation-level error.
    pub fn into_store_error(self, path: impl Into<String>) -> crate::error::StoreError {
        match self {
            SectionError::NotFound {
                title,
                available,
                suggestion,
            } => crate::error::StoreError::NotFound(crate::error::NotFound::Section {
                path: path.into(),
                title,
                available,
                suggestion,
            }),
        }
    }
}
