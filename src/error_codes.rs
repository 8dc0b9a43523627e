use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodedErrorKind {
    Usage,
    SourceUnavailable,
    NotReady,
    InvalidGeometry,
    NoFrames,
    UnsupportedFormat,
    EncodingCapabilityUnavailable,
    EncodeFailed,
}

impl CodedErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::Usage => "INVALID_CONFIG",
            Self::SourceUnavailable => "SOURCE_UNAVAILABLE",
            Self::NotReady => "NOT_READY",
            Self::InvalidGeometry => "INVALID_GEOMETRY",
            Self::NoFrames => "NO_FRAMES",
            Self::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            Self::EncodingCapabilityUnavailable => "ENCODING_CAPABILITY_UNAVAILABLE",
            Self::EncodeFailed => "ENCODE_FAILED",
        }
    }
}

/// A failure with a stable machine-readable code, carried inside `anyhow::Error`.
#[derive(Debug, Clone)]
pub struct CodedError {
    pub kind: CodedErrorKind,
    pub message: String,
    pub details: Option<Value>,
}

impl CodedError {
    pub fn new(kind: CodedErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::Usage, message)
    }

    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::SourceUnavailable, message)
    }

    pub fn no_frames(message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::NoFrames, message)
    }

    pub fn unsupported_format(message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::UnsupportedFormat, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code().to_owned(),
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}

/// Envelope for any error. Failures without a code are reported as `INTERNAL`.
pub fn envelope_for(error: &Error) -> ErrorEnvelope {
    match find_coded_error(error) {
        Some(coded) => {
            let mut envelope = coded.envelope();
            envelope.error.message = format!("{error:#}");
            envelope
        }
        None => ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: "INTERNAL".to_owned(),
                message: format!("{error:#}"),
                details: None,
            },
        },
    }
}
