// Error-code taxonomy and the `Failure` value carried through the lifecycle.
use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Integer code transmitted to callers in the `Err` response key.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(i32);

impl ErrorCode {
    pub const NO_ERR: ErrorCode = ErrorCode(0);
    pub const INVALID_INPUT: ErrorCode = ErrorCode(1);
    pub const RETRY: ErrorCode = ErrorCode(2);
    pub const FAIL: ErrorCode = ErrorCode(3);
    /// Floor of the reportable system range; everything at or above passes through.
    pub const SYSTEM: ErrorCode = ErrorCode(100);

    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    pub const fn value(self) -> i32 {
        self.0
    }

    pub fn band(self) -> Band {
        classify(self)
    }

    /// Safe code to put on the wire for a failure carrying `self`.
    pub fn coerce(self) -> ErrorCode {
        coerce(self)
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl From<ErrorCode> for Value {
    fn from(code: ErrorCode) -> Self {
        Value::from(code.0)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Band {
    NoErr,
    InvalidInput,
    Retry,
    Fail,
    /// Below `SYSTEM` but not a named band (negative codes, 4..=99).
    OutOfRange,
    System,
}

pub fn classify(code: ErrorCode) -> Band {
    match code {
        ErrorCode::NO_ERR => Band::NoErr,
        ErrorCode::INVALID_INPUT => Band::InvalidInput,
        ErrorCode::RETRY => Band::Retry,
        ErrorCode::FAIL => Band::Fail,
        code if code >= ErrorCode::SYSTEM => Band::System,
        _ => Band::OutOfRange,
    }
}

pub fn coerce(code: ErrorCode) -> ErrorCode {
    match classify(code) {
        Band::InvalidInput | Band::Retry | Band::Fail | Band::System => code,
        Band::NoErr | Band::OutOfRange => ErrorCode::SYSTEM,
    }
}

/// A failed call: the code it carries plus enough context to log it.
#[derive(Debug)]
pub struct Failure {
    code: ErrorCode,
    message: Option<String>,
    location: Option<String>,
    fields: Map<String, Value>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Failure {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: None,
            location: None,
            fields: Map::new(),
            source: None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_fields(mut self, fields: Map<String, Value>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error({})", self.code)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(location) = &self.location {
            write!(f, " {location}")?;
        }
        Ok(())
    }
}

impl StdError for Failure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub type ServiceResult<T> = Result<T, Failure>;

/// Exit status of the host process for a finished call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// A success response was written.
    Success,
    /// An error response was written after recovery.
    Recovered,
    /// No service instance existed; a best-effort response was written.
    Fatal,
}

pub fn to_exit_code(outcome: Outcome) -> i32 {
    match outcome {
        Outcome::Success | Outcome::Recovered => 0,
        Outcome::Fatal => 1,
    }
}

pub const USAGE_EXIT_CODE: i32 = 2;

#[cfg(test)]
mod tests {
    use super::{Band, ErrorCode, Failure, Outcome, classify, coerce, to_exit_code};
    use std::error::Error as _;

    #[test]
    fn named_bands_pass_through() {
        for code in [
            ErrorCode::INVALID_INPUT,
            ErrorCode::RETRY,
            ErrorCode::FAIL,
            ErrorCode::SYSTEM,
        ] {
            assert_eq!(coerce(code), code);
        }
    }

    #[test]
    fn no_err_is_never_transmitted_as_failure() {
        assert_eq!(coerce(ErrorCode::NO_ERR), ErrorCode::SYSTEM);
    }

    #[test]
    fn out_of_range_codes_become_system() {
        for raw in [-7, -1, 4, 42, 99] {
            let code = ErrorCode::new(raw);
            assert_eq!(classify(code), Band::OutOfRange, "code {raw}");
            assert_eq!(coerce(code), ErrorCode::SYSTEM, "code {raw}");
        }
    }

    #[test]
    fn system_range_is_open_ended() {
        for raw in [100, 101, 5000, i32::MAX] {
            let code = ErrorCode::new(raw);
            assert_eq!(classify(code), Band::System);
            assert_eq!(coerce(code), code);
        }
    }

    #[test]
    fn failure_display_includes_message_and_location() {
        let failure = Failure::new(ErrorCode::FAIL)
            .with_message("no stock")
            .with_location("order.rs(12)");
        assert_eq!(failure.to_string(), "Error(3): no stock order.rs(12)");
    }

    #[test]
    fn failure_keeps_source() {
        let io = std::io::Error::other("disk gone");
        let failure = Failure::new(ErrorCode::SYSTEM).with_source(io);
        assert_eq!(failure.source().map(|s| s.to_string()).as_deref(), Some("disk gone"));
    }

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (Outcome::Success, 0),
            (Outcome::Recovered, 0),
            (Outcome::Fatal, 1),
        ];
        for (outcome, code) in cases {
            assert_eq!(to_exit_code(outcome), code);
        }
    }
}
