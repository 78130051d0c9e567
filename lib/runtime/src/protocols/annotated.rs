// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use super::maybe_error::MaybeError;
use crate::{error, Result};

const ERROR_EVENT: &str = "error";

/// A stream item that either carries data or an out-of-band event.
///
/// The serving pipeline yields `Annotated` items so that a failure after the first token
/// can still reach the client as an `error` event instead of tearing the connection down.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Annotated<R> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<R>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<Vec<String>>,
}

impl<R> Annotated<R> {
    pub fn from_error(error: String) -> Self {
        Self {
            data: None,
            id: None,
            event: Some(ERROR_EVENT.to_string()),
            comment: Some(vec![error]),
        }
    }

    pub fn from_data(data: R) -> Self {
        Self {
            data: Some(data),
            id: None,
            event: None,
            comment: None,
        }
    }

    /// A named event whose payload is the JSON encoding of `value`.
    pub fn from_annotation<S: Serialize>(
        name: impl Into<String>,
        value: &S,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(Self {
            data: None,
            id: None,
            event: Some(name.into()),
            comment: Some(vec![serde_json::to_string(value)?]),
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.event.as_deref() == Some(ERROR_EVENT)
    }

    pub fn is_event(&self) -> bool {
        self.event.is_some()
    }

    fn error_message(&self) -> String {
        match &self.comment {
            Some(comment) if !comment.is_empty() => comment.join(", "),
            _ => "unknown error".to_string(),
        }
    }

    /// Apply a fallible transformation to the data; a failure becomes an error item.
    pub fn map_data<U, F>(self, transform: F) -> Annotated<U>
    where
        F: FnOnce(R) -> std::result::Result<U, String>,
    {
        match self.data.map(transform).transpose() {
            Ok(data) => Annotated::<U> {
                data,
                id: self.id,
                event: self.event,
                comment: self.comment,
            },
            Err(e) => Annotated::from_error(e),
        }
    }

    /// `Ok(None)` for a data-less non-error event.
    pub fn into_result(self) -> Result<Option<R>> {
        if self.is_error() {
            return Err(error!(self.error_message()));
        }
        Ok(self.data)
    }
}

impl<R> MaybeError for Annotated<R> {
    fn from_err(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Annotated::from_error(err.to_string())
    }

    fn err(&self) -> Option<anyhow::Error> {
        if self.is_error() {
            Some(anyhow::Error::msg(self.error_message()))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_item() {
        let item = Annotated::<String>::from_error("slot 3 is busy".to_string());
        assert!(item.is_error());
        assert!(MaybeError::is_err(&item));
        assert_eq!(item.err().unwrap().to_string(), "slot 3 is busy");
        assert_eq!(
            item.into_result().unwrap_err().to_string(),
            "slot 3 is busy"
        );

        let item = Annotated::<String>::from_err(anyhow::anyhow!("boom").into());
        assert_eq!(item.err().unwrap().to_string(), "boom");
    }

    #[test]
    fn test_data_and_events() {
        let item = Annotated::from_data(5u32).with_id("r1");
        assert!(!item.is_event());
        assert_eq!(item.id.as_deref(), Some("r1"));
        assert_eq!(item.clone().into_result().unwrap(), Some(5));

        let doubled = item.map_data(|v| Ok::<_, String>(v * 2));
        assert_eq!(doubled.data, Some(10));

        let failed = Annotated::from_data(1u32).map_data(|_| Err::<u32, _>("bad".to_string()));
        assert!(failed.is_error());

        let event = Annotated::<u32>::from_annotation("timings", &serde_json::json!({"n": 1}))
            .unwrap();
        assert!(event.is_event());
        assert!(!event.is_error());
        assert_eq!(event.into_result().unwrap(), None);
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let item = Annotated::from_data("hi".to_string());
        assert_eq!(
            serde_json::to_value(&item).unwrap(),
            serde_json::json!({"data": "hi"})
        );
    }
}
