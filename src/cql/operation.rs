use crate::error::FrameError;

pub(crate) const ERROR_OP_CODE: u8 = 0x00;
pub(crate) const STARTUP_OP_CODE: u8 = 0x01;
pub(crate) const READY_OP_CODE: u8 = 0x02;
pub(crate) const AUTHENTICATE_OP_CODE: u8 = 0x03;
pub(crate) const OPTIONS_OP_CODE: u8 = 0x05;
pub(crate) const SUPPORTED_OP_CODE: u8 = 0x06;
pub(crate) const QUERY_OP_CODE: u8 = 0x07;
pub(crate) const RESULT_OP_CODE: u8 = 0x08;
pub(crate) const PREPARE_OP_CODE: u8 = 0x09;
pub(crate) const EXECUTE_OP_CODE: u8 = 0x0A;
pub(crate) const REGISTER_OP_CODE: u8 = 0x0B;
pub(crate) const EVENT_OP_CODE: u8 = 0x0C;
pub(crate) const BATCH_OP_CODE: u8 = 0x0D;
pub(crate) const AUTH_CHALLENGE_OP_CODE: u8 = 0x0E;
pub(crate) const AUTH_RESPONSE_OP_CODE: u8 = 0x0F;
pub(crate) const AUTH_SUCCESS_OP_CODE: u8 = 0x10;

/// The kind of message a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Error,
    Startup,
    Ready,
    Authenticate,
    Options,
    Supported,
    Query,
    Result,
    Prepare,
    Execute,
    Register,
    Event,
    Batch,
    AuthChallenge,
    AuthResponse,
    AuthSuccess,
}

impl Opcode {
    pub fn as_u8(&self) -> u8 {
        match self {
            Opcode::Error => ERROR_OP_CODE,
            Opcode::Startup => STARTUP_OP_CODE,
            Opcode::Ready => READY_OP_CODE,
            Opcode::Authenticate => AUTHENTICATE_OP_CODE,
            Opcode::Options => OPTIONS_OP_CODE,
            Opcode::Supported => SUPPORTED_OP_CODE,
            Opcode::Query => QUERY_OP_CODE,
            Opcode::Result => RESULT_OP_CODE,
            Opcode::Prepare => PREPARE_OP_CODE,
            Opcode::Execute => EXECUTE_OP_CODE,
            Opcode::Register => REGISTER_OP_CODE,
            Opcode::Event => EVENT_OP_CODE,
            Opcode::Batch => BATCH_OP_CODE,
            Opcode::AuthChallenge => AUTH_CHALLENGE_OP_CODE,
            Opcode::AuthResponse => AUTH_RESPONSE_OP_CODE,
            Opcode::AuthSuccess => AUTH_SUCCESS_OP_CODE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Error => "ERROR",
            Opcode::Startup => "STARTUP",
            Opcode::Ready => "READY",
            Opcode::Authenticate => "AUTHENTICATE",
            Opcode::Options => "OPTIONS",
            Opcode::Supported => "SUPPORTED",
            Opcode::Query => "QUERY",
            Opcode::Result => "RESULT",
            Opcode::Prepare => "PREPARE",
            Opcode::Execute => "EXECUTE",
            Opcode::Register => "REGISTER",
            Opcode::Event => "EVENT",
            Opcode::Batch => "BATCH",
            Opcode::AuthChallenge => "AUTH_CHALLENGE",
            Opcode::AuthResponse => "AUTH_RESPONSE",
            Opcode::AuthSuccess => "AUTH_SUCCESS",
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        match value {
            ERROR_OP_CODE => Ok(Opcode::Error),
            STARTUP_OP_CODE => Ok(Opcode::Startup),
            READY_OP_CODE => Ok(Opcode::Ready),
            AUTHENTICATE_OP_CODE => Ok(Opcode::Authenticate),
            OPTIONS_OP_CODE => Ok(Opcode::Options),
            SUPPORTED_OP_CODE => Ok(Opcode::Supported),
            QUERY_OP_CODE => Ok(Opcode::Query),
            RESULT_OP_CODE => Ok(Opcode::Result),
            PREPARE_OP_CODE => Ok(Opcode::Prepare),
            EXECUTE_OP_CODE => Ok(Opcode::Execute),
            REGISTER_OP_CODE => Ok(Opcode::Register),
            EVENT_OP_CODE => Ok(Opcode::Event),
            BATCH_OP_CODE => Ok(Opcode::Batch),
            AUTH_CHALLENGE_OP_CODE => Ok(Opcode::AuthChallenge),
            AUTH_RESPONSE_OP_CODE => Ok(Opcode::AuthResponse),
            AUTH_SUCCESS_OP_CODE => Ok(Opcode::AuthSuccess),
            _ => Err(FrameError::UnknownOpcode(value)),
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
