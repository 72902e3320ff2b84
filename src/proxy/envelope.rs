//! Error body returned when every attempt failed
//!
//! Requests belonging to a WebDriver session get a body the client bindings
//! understand; everything else gets a plain `{message, error}` object.

use hyper::StatusCode;
use serde::Serialize;

/// Status of responses synthesized by the tool, outside the range upstreams use
pub const CUSTOM_ERROR_RESPONSE_CODE: u16 = 599;
pub const REQ_FAILED_MSG: &str = "Request Failed At Requests Debugger";

const SESSION_PREFIX: &str = "/wd/hub/session/";
const SESSION_ERROR_STATUS: u8 = 13;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorValue {
    pub message: String,
    pub error: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ErrorEnvelope {
    Session {
        #[serde(rename = "sessionId")]
        session_id: String,
        status: u8,
        value: ErrorValue,
        state: &'static str,
    },
    Plain(ErrorValue),
}

/// Session id of a `/wd/hub/session/<id>` path, lowercase alphanumerics only
pub fn session_id(path: &str) -> Option<&str> {
    path.match_indices(SESSION_PREFIX).find_map(|(start, _)| {
        let rest = &path[start + SESSION_PREFIX.len()..];
        let end = rest
            .find(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit()))
            .unwrap_or(rest.len());
        (end > 0).then(|| &rest[..end])
    })
}

impl ErrorEnvelope {
    /// Frame the failure of a request to `path`
    pub fn frame(path: &str, error_message: &str) -> Self {
        let value = ErrorValue {
            message: format!("{}. {}", error_message, REQ_FAILED_MSG),
            error: REQ_FAILED_MSG,
        };

        match session_id(path) {
            Some(id) => ErrorEnvelope::Session {
                session_id: id.to_string(),
                status: SESSION_ERROR_STATUS,
                value,
                state: "error",
            },
            None => ErrorEnvelope::Plain(value),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(CUSTOM_ERROR_RESPONSE_CODE).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frames_session_requests() {
        let envelope = ErrorEnvelope::frame("/wd/hub/session/abc123/element", "connect ECONNREFUSED");
        assert_eq!(
            envelope.to_json(),
            json!({
                "sessionId": "abc123",
                "status": 13,
                "value": {
                    "message": "connect ECONNREFUSED. Request Failed At Requests Debugger",
                    "error": REQ_FAILED_MSG,
                },
                "state": "error",
            })
        );
        assert_eq!(envelope.status_code().as_u16(), 599);
    }

    #[test]
    fn test_frames_other_requests() {
        let envelope = ErrorEnvelope::frame("/wd/hub/status", "socket hang up");
        assert_eq!(
            envelope.to_json(),
            json!({
                "message": "socket hang up. Request Failed At Requests Debugger",
                "error": REQ_FAILED_MSG,
            })
        );
    }

    #[test]
    fn test_finds_session_in_absolute_paths() {
        assert_eq!(
            session_id("http://hub-cloud.browserstack.com/wd/hub/session/9f2e/url"),
            Some("9f2e")
        );
        assert_eq!(session_id("/wd/hub/session/abc123"), Some("abc123"));
        assert_eq!(session_id("/wd/hub/session/ABC"), None);
        assert_eq!(session_id("/wd/hub/session"), None);
    }
}
