//! Central error handling for the pathwave core
//!
//! Provides a unified RenderError enum with consistent categorization.
//! Device, accel and upload failures are fatal for the caller; unsupported
//! entities are reported to the upload subsystem which logs and skips them.

/// Centralized error type for all scene-upload and tracing operations
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("Device error: {0}")]
    Device(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Acceleration structure error: {0}")]
    Accel(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unsupported {category}: {detail}")]
    UnsupportedEntity {
        category: &'static str,
        detail: String,
    },

    #[error("Render error: {0}")]
    Render(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    /// Short category prefix used in log lines
    pub fn category(&self) -> &'static str {
        match self {
            RenderError::Device(_) => "Device",
            RenderError::Upload(_) => "Upload",
            RenderError::Accel(_) => "Accel",
            RenderError::Config(_) => "Config",
            RenderError::UnsupportedEntity { .. } => "Unsupported",
            RenderError::Render(_) => "Render",
            RenderError::Io(_) => "IO",
        }
    }

    /// Whether the error must abort the run (device/runtime failures).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RenderError::UnsupportedEntity { .. })
    }

    /// Convenience constructors for common error types
    pub fn device<T: ToString>(msg: T) -> Self {
        RenderError::Device(msg.to_string())
    }

    pub fn upload<T: ToString>(msg: T) -> Self {
        RenderError::Upload(msg.to_string())
    }

    pub fn accel<T: ToString>(msg: T) -> Self {
        RenderError::Accel(msg.to_string())
    }

    pub fn config<T: ToString>(msg: T) -> Self {
        RenderError::Config(msg.to_string())
    }

    pub fn render<T: ToString>(msg: T) -> Self {
        RenderError::Render(msg.to_string())
    }

    pub fn unsupported<T: ToString>(category: &'static str, detail: T) -> Self {
        RenderError::UnsupportedEntity {
            category,
            detail: detail.to_string(),
        }
    }
}

impl From<anyhow::Error> for RenderError {
    fn from(err: anyhow::Error) -> Self {
        RenderError::Accel(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for RenderError {
    fn from(err: serde_json::Error) -> Self {
        RenderError::Config(err.to_string())
    }
}

/// Result type alias for renderer operations
pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_and_fatality() {
        let err = RenderError::device("out of memory");
        assert_eq!(err.category(), "Device");
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "Device error: out of memory");

        let err = RenderError::unsupported("light", "rect");
        assert_eq!(err.category(), "Unsupported");
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "Unsupported light: rect");
    }

    #[test]
    fn anyhow_maps_to_accel() {
        let err: RenderError = anyhow::anyhow!("empty primitive set").into();
        assert!(matches!(err, RenderError::Accel(_)));
    }
}
