use thiserror::Error;

#[derive(Error, Debug)]
pub enum HrpError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("load error: {0}")]
    Load(String),

    #[error("request body type error: {0}")]
    BodyType(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("extract error: {0}")]
    Extract(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("hook error: {0}")]
    Hook(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("canceled")]
    Canceled,

    #[error("io error: {0}")]
    Io(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HrpError {
    /// Stable machine-readable tag for each error family.
    pub fn kind(&self) -> &'static str {
        match self {
            HrpError::Parse(_) => "parse_error",
            HrpError::Load(_) => "load_error",
            HrpError::BodyType(_) => "body_type_error",
            HrpError::Decode(_) => "decode_error",
            HrpError::Extract(_) => "extract_error",
            HrpError::Validation(_) => "validation_error",
            HrpError::Hook(_) => "hook_error",
            HrpError::Config(_) => "config_error",
            HrpError::Timeout(_) => "timeout_error",
            HrpError::Canceled => "canceled",
            HrpError::Io(_) => "io_error",
            HrpError::Json(_) => "json_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, HrpError>;
