// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy shared by the router, the slot manager and the HTTP layer.
//!
//! Components return their own `thiserror` enums. Each maps onto an [`ErrorKind`], and the
//! HTTP layer recovers the kind from an [`anyhow::Error`] with [`classify`].

use serde::Serialize;

use crate::router::RouterError;
use crate::serving::ServeError;
use crate::slots::{CheckpointError, LifecycleError, SlotError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown model, slot or file
    NotFound,
    /// Slot already occupied
    Conflict,
    /// No free slot, or at model capacity with nothing evictable
    ResourceExhausted,
    InvalidRequest,
    /// A required resource is absent, e.g. a strict-mode checkpoint
    Unavailable,
    AuthenticationError,
    NotSupported,
    Internal,
}

impl ErrorKind {
    /// Default HTTP status for this kind.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::ResourceExhausted => 503,
            ErrorKind::InvalidRequest => 400,
            ErrorKind::Unavailable => 503,
            ErrorKind::AuthenticationError => 401,
            ErrorKind::NotSupported => 501,
            ErrorKind::Internal => 500,
        }
    }

    /// The `error.type` string of the llama-server error body.
    pub fn error_type(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found_error",
            ErrorKind::Conflict => "conflict_error",
            ErrorKind::ResourceExhausted | ErrorKind::Unavailable => "unavailable_error",
            ErrorKind::InvalidRequest => "invalid_request_error",
            ErrorKind::AuthenticationError => "authentication_error",
            ErrorKind::NotSupported => "not_supported_error",
            ErrorKind::Internal => "server_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.error_type())
    }
}

/// Implemented by every typed error that can reach a client.
pub trait HasErrorKind {
    fn kind(&self) -> ErrorKind;

    /// Overrides [`ErrorKind::status_code`], used by strict-mode restore failures.
    fn status_code(&self) -> Option<u16> {
        None
    }
}

/// The kind and status recovered from an error chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified {
    pub kind: ErrorKind,
    pub status: u16,
}

impl Classified {
    fn from_typed(err: &dyn HasErrorKind) -> Self {
        let kind = err.kind();
        Classified {
            kind,
            status: err.status_code().unwrap_or_else(|| kind.status_code()),
        }
    }
}

/// Walk the error chain and return the first typed error's classification.
/// Untyped errors classify as [`ErrorKind::Internal`].
pub fn classify(err: &anyhow::Error) -> Classified {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<LifecycleError>() {
            return Classified::from_typed(e);
        }
        if let Some(e) = cause.downcast_ref::<RouterError>() {
            return Classified::from_typed(e);
        }
        if let Some(e) = cause.downcast_ref::<SlotError>() {
            return Classified::from_typed(e);
        }
        if let Some(e) = cause.downcast_ref::<CheckpointError>() {
            return Classified::from_typed(e);
        }
        if let Some(e) = cause.downcast_ref::<ServeError>() {
            return Classified::from_typed(e);
        }
    }
    Classified {
        kind: ErrorKind::Internal,
        status: ErrorKind::Internal.status_code(),
    }
}
