use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("internal server error")]
    Internal,
}

/// JSON body returned for every HTTP-level failure.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    status: u16,
    timestamp: String,
}

impl AppError {
    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) => 400,
            AppError::Unauthorized => 401,
            AppError::Forbidden => 403,
            AppError::NotFound => 404,
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => 500,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BadRequestError",
            AppError::Unauthorized => "UnauthorizedError",
            AppError::Forbidden => "ForbiddenError",
            AppError::NotFound => "NotFoundError",
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => "InternalError",
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        HttpResponse::build(status).json(ErrorBody {
            error: self.error_type(),
            message: self.to_string(),
            status: self.status_code(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }
}

// NOTE: No need to implement From<AppError> for actix_web::Error
// because actix-web provides a blanket impl for all ResponseError types.
