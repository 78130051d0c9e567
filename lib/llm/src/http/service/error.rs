// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{classify, ErrorKind, HasErrorKind};
use crate::router::RouterError;
use crate::serving::ServeError;
use crate::slots::{CheckpointError, LifecycleError, SlotError};

/// The `error` object of a llama-server error body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

/// `{"error": {"code", "message", "type"}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorMessage {
    pub error: ErrorBody,
}

/// Every handler error ends up here. Typed component errors convert with `?`; the
/// status comes from their [`ErrorKind`] unless the error overrides it.
#[derive(Debug, Error)]
#[error("HTTP Error {code}: {message}")]
pub struct HttpError {
    pub code: u16,
    pub kind: ErrorKind,
    pub message: String,
}

impl HttpError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        HttpError {
            code: kind.status_code(),
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotSupported, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::AuthenticationError, "Invalid API Key")
    }

    /// Classify an error chain, see [`crate::error::classify`].
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let classified = classify(err);
        HttpError {
            code: classified.status,
            kind: classified.kind,
            message: format!("{err:#}"),
        }
    }

    fn from_typed<E: HasErrorKind + std::fmt::Display>(err: E) -> Self {
        let kind = err.kind();
        HttpError {
            code: err.status_code().unwrap_or_else(|| kind.status_code()),
            kind,
            message: err.to_string(),
        }
    }

    pub fn body(&self) -> ErrorMessage {
        ErrorMessage {
            error: ErrorBody {
                code: self.code,
                message: self.message.clone(),
                error_type: self.kind.error_type().to_string(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        if self.kind == ErrorKind::Internal {
            tracing::error!(code = self.code, message = %self.message, "request failed");
        } else {
            tracing::debug!(code = self.code, message = %self.message, "request rejected");
        }
        (self.status(), Json(self.body())).into_response()
    }
}

impl From<anyhow::Error> for HttpError {
    fn from(err: anyhow::Error) -> Self {
        HttpError::from_anyhow(&err)
    }
}

macro_rules! impl_from_typed {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for HttpError {
                fn from(err: $ty) -> Self {
                    HttpError::from_typed(err)
                }
            }
        )*
    };
}

impl_from_typed!(RouterError, SlotError, CheckpointError, LifecycleError, ServeError);

impl From<JsonRejection> for HttpError {
    fn from(rejection: JsonRejection) -> Self {
        HttpError::invalid_request(rejection.body_text())
    }
}

impl From<QueryRejection> for HttpError {
    fn from(rejection: QueryRejection) -> Self {
        HttpError::invalid_request(rejection.body_text())
    }
}

impl From<validator::ValidationErrors> for HttpError {
    fn from(errors: validator::ValidationErrors) -> Self {
        HttpError::invalid_request(errors.to_string())
    }
}
