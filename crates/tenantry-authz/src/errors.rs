use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("invalid tenant id: {0}")]
    InvalidTenantId(String),
    #[error("invalid policy tuple: {0}")]
    InvalidTuple(String),
    #[error("casbin error: {0}")]
    Casbin(#[from] casbin::Error),
}

pub type AuthzResult<T> = Result<T, AuthzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_variants() {
        let errors = vec![
            AuthzError::InvalidTenantId("Bad Tenant".to_string()),
            AuthzError::InvalidTuple("role:r1".to_string()),
        ];

        for error in errors {
            let rendered = error.to_string();
            assert!(!rendered.is_empty());
        }
    }
}
