//! Error types for the chat session engine.

use solace_core::error::SolaceError;

/// Errors from the session controller.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a send is already in progress")]
    SendInProgress,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("message not found: {0}")]
    MessageNotFound(uuid::Uuid),
    #[error("inference error: {0}")]
    Inference(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<SolaceError> for SessionError {
    fn from(err: SolaceError) -> Self {
        match err {
            SolaceError::Inference(message) => SessionError::Inference(message),
            SolaceError::Storage(message) => SessionError::Storage(message),
            // Remaining subsystem failures surface through the session
            // as storage-level faults, keeping their own prefix.
            other => SessionError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_session_error_display() {
        let err = SessionError::SendInProgress;
        assert_eq!(err.to_string(), "a send is already in progress");

        let err = SessionError::MessageTooLong(4000);
        assert_eq!(
            err.to_string(),
            "message exceeds maximum length of 4000 characters"
        );

        let id = Uuid::new_v4();
        let err = SessionError::MessageNotFound(id);
        assert_eq!(err.to_string(), format!("message not found: {}", id));

        let err = SessionError::Inference("backend unreachable".to_string());
        assert_eq!(err.to_string(), "inference error: backend unreachable");

        let err = SessionError::Storage("disk full".to_string());
        assert_eq!(err.to_string(), "storage error: disk full");
    }

    #[test]
    fn test_session_error_from_solace_error() {
        let storage_err = SolaceError::Storage("connection lost".to_string());
        let session_err: SessionError = storage_err.into();
        assert!(matches!(session_err, SessionError::Storage(_)));
        assert_eq!(session_err.to_string(), "storage error: connection lost");

        let inference_err = SolaceError::Inference("upstream 503".to_string());
        let session_err: SessionError = inference_err.into();
        assert!(matches!(session_err, SessionError::Inference(_)));
        assert_eq!(session_err.to_string(), "inference error: upstream 503");

        // Other subsystems fold into Storage with their prefix kept.
        let voice_err = SolaceError::Voice("session ended".to_string());
        let session_err: SessionError = voice_err.into();
        assert!(matches!(session_err, SessionError::Storage(_)));
        assert!(session_err.to_string().contains("Voice session error"));
    }

    #[test]
    fn test_errors_implement_debug() {
        let err = SessionError::SendInProgress;
        let dbg = format!("{:?}", err);
        assert!(dbg.contains("SendInProgress"));

        let err = SessionError::MessageNotFound(Uuid::nil());
        let dbg = format!("{:?}", err);
        assert!(dbg.contains("MessageNotFound"));
    }
}
