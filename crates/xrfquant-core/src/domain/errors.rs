use std::error::Error;
use std::fmt::{Display, Formatter};

pub type QuantResult<T> = Result<T, QuantError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantErrorCategory {
    InvalidInput,
    SingularSystem,
    NumericAnomaly,
    IoSystemError,
    InternalError,
}

impl QuantErrorCategory {
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::InvalidInput => 2,
            Self::SingularSystem => 3,
            Self::NumericAnomaly => 4,
            Self::IoSystemError => 5,
            Self::InternalError => 6,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "InvalidInput",
            Self::SingularSystem => "SingularSystem",
            Self::NumericAnomaly => "NumericAnomaly",
            Self::IoSystemError => "IoSystemError",
            Self::InternalError => "InternalError",
        }
    }
}

/// Engine error carrying a category, a stable diagnostic code, and a
/// human-readable message. All failures cross the engine boundary as
/// values of this type; nothing panics across it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantError {
    category: QuantErrorCategory,
    code: &'static str,
    message: String,
}

impl QuantError {
    pub fn new(
        category: QuantErrorCategory,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code,
            message: message.into(),
        }
    }

    pub fn invalid_input(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(QuantErrorCategory::InvalidInput, code, message)
    }

    pub fn singular_system(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(QuantErrorCategory::SingularSystem, code, message)
    }

    pub fn numeric_anomaly(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(QuantErrorCategory::NumericAnomaly, code, message)
    }

    pub fn io_system(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(QuantErrorCategory::IoSystemError, code, message)
    }

    pub fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(QuantErrorCategory::InternalError, code, message)
    }

    pub const fn category(&self) -> QuantErrorCategory {
        self.category
    }

    pub const fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exit_code(&self) -> i32 {
        self.category.exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        format!("ERROR: [{}] {}", self.code, self.message)
    }

    pub fn fatal_exit_line(&self) -> String {
        format!("FATAL EXIT CODE: {}", self.exit_code())
    }
}

impl Display for QuantError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.category.as_str(),
            self.code,
            self.message
        )
    }
}

impl Error for QuantError {}

#[cfg(test)]
mod tests {
    use super::{QuantError, QuantErrorCategory};

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (QuantErrorCategory::InvalidInput, 2),
            (QuantErrorCategory::SingularSystem, 3),
            (QuantErrorCategory::NumericAnomaly, 4),
            (QuantErrorCategory::IoSystemError, 5),
            (QuantErrorCategory::InternalError, 6),
        ];
        for (category, exit_code) in cases {
            assert_eq!(category.exit_code(), exit_code);
        }
    }

    #[test]
    fn error_renders_diagnostic_lines() {
        let error = QuantError::invalid_input("INPUT.LIVE_TIME", "live time must be positive");
        assert_eq!(error.exit_code(), 2);
        assert_eq!(
            error.diagnostic_line(),
            "ERROR: [INPUT.LIVE_TIME] live time must be positive"
        );
        assert_eq!(error.fatal_exit_line(), "FATAL EXIT CODE: 2");
        assert_eq!(
            error.to_string(),
            "InvalidInput [INPUT.LIVE_TIME] live time must be positive"
        );
    }
}
