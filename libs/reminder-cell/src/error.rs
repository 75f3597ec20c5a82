use thiserror::Error;

use shared_models::error::AppError;
use sms_cell::SmsError;

#[derive(Error, Debug)]
pub enum ReminderError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Reminder not found: {0}")]
    NotFound(String),

    #[error("SMS delivery failed: {0}")]
    SmsError(#[from] SmsError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<anyhow::Error> for ReminderError {
    fn from(e: anyhow::Error) -> Self {
        ReminderError::DatabaseError(e.to_string())
    }
}

impl From<ReminderError> for AppError {
    fn from(e: ReminderError) -> Self {
        match e {
            ReminderError::NotFound(msg) => AppError::NotFound(msg),
            ReminderError::ValidationError(msg) => AppError::ValidationError(msg),
            ReminderError::SmsError(e) => AppError::ExternalService(e.to_string()),
            ReminderError::DatabaseError(msg) => AppError::Database(msg),
            ReminderError::SerializationError(e) => AppError::Internal(e.to_string()),
        }
    }
}
