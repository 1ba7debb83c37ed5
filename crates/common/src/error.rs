use thiserror::Error;

/// Stable machine-readable error codes surfaced to clients.
///
/// The first block maps one-to-one onto HTTP status classes; the second
/// block carries domain-specific causes that still map onto one of the
/// generic statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    TooManyRequests,
    Internal,

    OtpExpired,
    OtpInvalid,
    OtpMaxAttempts,
    TokenInvalid,
    TokenExpired,
    MediaTooLarge,
    MediaInvalidType,
    ChatNotFound,
    NotChatMember,
    NotAdmin,
    AlreadyMember,
    UserBlocked,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::TooManyRequests => "TOO_MANY_REQUESTS",
            Self::Internal => "INTERNAL_ERROR",
            Self::OtpExpired => "OTP_EXPIRED",
            Self::OtpInvalid => "OTP_INVALID",
            Self::OtpMaxAttempts => "OTP_MAX_ATTEMPTS",
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::MediaTooLarge => "MEDIA_TOO_LARGE",
            Self::MediaInvalidType => "MEDIA_INVALID_TYPE",
            Self::ChatNotFound => "CHAT_NOT_FOUND",
            Self::NotChatMember => "NOT_CHAT_MEMBER",
            Self::NotAdmin => "NOT_ADMIN",
            Self::AlreadyMember => "ALREADY_MEMBER",
            Self::UserBlocked => "USER_BLOCKED",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest | Self::MediaInvalidType => 400,
            Self::Unauthorized
            | Self::OtpExpired
            | Self::OtpInvalid
            | Self::TokenInvalid
            | Self::TokenExpired => 401,
            Self::Forbidden | Self::NotAdmin | Self::UserBlocked => 403,
            Self::NotFound | Self::ChatNotFound | Self::NotChatMember => 404,
            Self::Conflict | Self::AlreadyMember => 409,
            Self::TooManyRequests | Self::OtpMaxAttempts => 429,
            Self::MediaTooLarge => 413,
            Self::Internal => 500,
        }
    }

    /// Whether a failed call carrying this code is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Internal | Self::TooManyRequests)
    }
}

/// Application error: a surface code plus a human-readable message and an
/// optional underlying cause.
#[derive(Error, Debug)]
#[error("{}: {message}", .code.as_str())]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    #[must_use]
    pub fn internal(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code: ErrorCode::Internal,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Internal error without an underlying cause.
    #[must_use]
    pub fn internal_msg(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_expected_statuses() {
        assert_eq!(ErrorCode::BadRequest.http_status(), 400);
        assert_eq!(ErrorCode::NotAdmin.http_status(), 403);
        assert_eq!(ErrorCode::AlreadyMember.http_status(), 409);
        assert_eq!(ErrorCode::OtpMaxAttempts.http_status(), 429);
        assert_eq!(ErrorCode::Internal.http_status(), 500);
    }

    #[test]
    fn transient_codes() {
        assert!(ErrorCode::Internal.is_transient());
        assert!(ErrorCode::TooManyRequests.is_transient());
        assert!(!ErrorCode::Forbidden.is_transient());
        assert!(!ErrorCode::NotFound.is_transient());
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = AppError::forbidden("not a chat member");
        assert_eq!(err.to_string(), "FORBIDDEN: not a chat member");
    }
}
