use bytes::Bytes;
use thiserror::Error;

use crate::error::FrameError;
use crate::serde::reader::FrameReader;

/// A failure the server reported in an ERROR frame.
///
/// The code-specific trailer (e.g. the replica counts of an UNAVAILABLE) is
/// kept undecoded in `details`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("server error {code:?} ({:#06x}): {message}", .code.to_code())]
pub struct ServerError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Bytes,
}

impl ServerError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> ServerError {
        ServerError {
            code,
            message: message.into(),
            details: Bytes::new(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ServerError,
    ProtocolError,
    BadCredentials,
    Unavailable,
    Overloaded,
    IsBootstrapping,
    TruncateError,
    WriteTimeout,
    ReadTimeout,
    ReadFailure,
    FunctionFailure,
    WriteFailure,
    SyntaxError,
    Unauthorized,
    Invalid,
    ConfigError,
    AlreadyExists,
    Unprepared,
    Other(i32),
}

impl ErrorCode {
    pub fn to_code(&self) -> i32 {
        match self {
            ErrorCode::ServerError => 0x0000,
            ErrorCode::ProtocolError => 0x000A,
            ErrorCode::BadCredentials => 0x0100,
            ErrorCode::Unavailable => 0x1000,
            ErrorCode::Overloaded => 0x1001,
            ErrorCode::IsBootstrapping => 0x1002,
            ErrorCode::TruncateError => 0x1003,
            ErrorCode::WriteTimeout => 0x1100,
            ErrorCode::ReadTimeout => 0x1200,
            ErrorCode::ReadFailure => 0x1300,
            ErrorCode::FunctionFailure => 0x1400,
            ErrorCode::WriteFailure => 0x1500,
            ErrorCode::SyntaxError => 0x2000,
            ErrorCode::Unauthorized => 0x2100,
            ErrorCode::Invalid => 0x2200,
            ErrorCode::ConfigError => 0x2300,
            ErrorCode::AlreadyExists => 0x2400,
            ErrorCode::Unprepared => 0x2500,
            ErrorCode::Other(code) => *code,
        }
    }

    pub fn from_code(code: i32) -> ErrorCode {
        match code {
            0x0000 => ErrorCode::ServerError,
            0x000A => ErrorCode::ProtocolError,
            0x0100 => ErrorCode::BadCredentials,
            0x1000 => ErrorCode::Unavailable,
            0x1001 => ErrorCode::Overloaded,
            0x1002 => ErrorCode::IsBootstrapping,
            0x1003 => ErrorCode::TruncateError,
            0x1100 => ErrorCode::WriteTimeout,
            0x1200 => ErrorCode::ReadTimeout,
            0x1300 => ErrorCode::ReadFailure,
            0x1400 => ErrorCode::FunctionFailure,
            0x1500 => ErrorCode::WriteFailure,
            0x2000 => ErrorCode::SyntaxError,
            0x2100 => ErrorCode::Unauthorized,
            0x2200 => ErrorCode::Invalid,
            0x2300 => ErrorCode::ConfigError,
            0x2400 => ErrorCode::AlreadyExists,
            0x2500 => ErrorCode::Unprepared,
            other => ErrorCode::Other(other),
        }
    }

    /// Server-side timeouts, as opposed to the client giving up waiting.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ErrorCode::ReadTimeout | ErrorCode::WriteTimeout)
    }
}

pub fn decode(body: Bytes) -> Result<ServerError, FrameError> {
    let mut src = FrameReader::new(body);
    let code = ErrorCode::from_code(src.read_i32()?);
    let message = src.read_string()?;

    Ok(ServerError {
        code,
        message,
        details: src.into_remaining(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serde::writer::FrameWriter;

    fn error_body(code: i32, message: &str, trailer: &[u8]) -> Bytes {
        let mut writer = FrameWriter::new();
        writer.write_i32(code);
        writer.write_string(message).unwrap();
        let mut bytes = writer.into_bytes().to_vec();
        bytes.extend_from_slice(trailer);
        Bytes::from(bytes)
    }

    #[test]
    fn decodes_code_message_and_trailer() {
        let error = decode(error_body(0x1000, "Cannot achieve consistency", &[0, 4])).unwrap();

        assert_eq!(error.code, ErrorCode::Unavailable);
        assert_eq!(error.message, "Cannot achieve consistency");
        assert_eq!(&error.details[..], &[0, 4]);
    }

    #[test]
    fn unknown_codes_are_kept() {
        let error = decode(error_body(0x7777, "new", &[])).unwrap();

        assert_eq!(error.code, ErrorCode::Other(0x7777));
        assert_eq!(error.code.to_code(), 0x7777);
    }

    #[test]
    fn display_names_the_code() {
        let error = ServerError::new(ErrorCode::SyntaxError, "line 1:0 no viable alternative");

        assert_eq!(
            error.to_string(),
            "server error SyntaxError (0x2000): line 1:0 no viable alternative"
        );
    }
}
