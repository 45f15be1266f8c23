//! Configuration validation errors and semantic validation.

use std::time::Duration;
use thiserror::Error;

use crate::resolve::AttachConfig;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid port range: start {start} is greater than end {end}")]
    InvalidRange { start: u16, end: u16 },

    #[error("{field} must be greater than zero")]
    NonPositive { field: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::InvalidRange { .. } => 41,
            ValidationError::NonPositive { .. } => 42,
            ValidationError::InvalidValue { .. } => 43,
        }
    }
}

/// Validate a resolved configuration semantically.
///
/// Port-range ordering is enforced when the range is constructed; this pass
/// covers the remaining cross-field rules.
pub fn validate_config(config: &AttachConfig) -> ValidationResult<()> {
    require_positive("PYFLIGHT_INJECT_TIMEOUT", config.inject_timeout)?;
    require_positive("PYFLIGHT_PROBE_TIMEOUT_MS", config.probe_timeout)?;

    if config.port_range.start() == 0 {
        return Err(ValidationError::InvalidValue {
            field: "PYFLIGHT_INJECT_START_PORT".to_string(),
            message: "port 0 cannot be probed".to_string(),
        });
    }

    if config.history_file.as_os_str().is_empty() {
        return Err(ValidationError::InvalidValue {
            field: "PYFLIGHT_HISTORY_FILE".to_string(),
            message: "path is empty".to_string(),
        });
    }

    Ok(())
}

fn require_positive(field: &str, value: Duration) -> ValidationResult<()> {
    if value.is_zero() {
        return Err(ValidationError::NonPositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PortRange;
    use std::path::PathBuf;

    fn sample() -> AttachConfig {
        AttachConfig::defaults(PathBuf::from("/opt/flight_profiler"))
    }

    #[test]
    fn defaults_validate() {
        assert!(validate_config(&sample()).is_ok());
    }

    #[test]
    fn zero_inject_timeout_rejected() {
        let mut config = sample();
        config.inject_timeout = Duration::ZERO;
        let err = validate_config(&config).unwrap_err();
        assert_eq!(
            err,
            ValidationError::NonPositive {
                field: "PYFLIGHT_INJECT_TIMEOUT".to_string()
            }
        );
        assert_eq!(err.code(), 42);
    }

    #[test]
    fn zero_probe_timeout_rejected() {
        let mut config = sample();
        config.probe_timeout = Duration::ZERO;
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::NonPositive { .. })
        ));
    }

    #[test]
    fn port_zero_rejected() {
        let mut config = sample();
        config.port_range = PortRange::new(0, 10).unwrap();
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::InvalidValue { .. })
        ));
    }
}
