//! Socket frames and inbound classification.
//!
//! Every frame read from the socket is classified exactly once into an
//! [`Inbound`] variant. Text that is not JSON, or JSON that is neither a
//! response nor a notification, yields `None` and is dropped by the caller.

use bytes::Bytes;
use serde_json::Value;

use crate::protocol::{Notification, Request, Response};

/// A single socket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    /// Encode a request as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the params cannot be serialized.
    pub fn request(request: &Request) -> Result<Self, serde_json::Error> {
        serde_json::to_string(request).map(Frame::Text)
    }

    /// Encode a notification as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the params cannot be serialized.
    pub fn notification(notification: &Notification) -> Result<Self, serde_json::Error> {
        serde_json::to_string(notification).map(Frame::Text)
    }

    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Frame::Binary(_))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inbound frame after shape classification.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Has `id` and one of `result`/`error`.
    Response(Response),
    /// Has `method` and no `id`.
    Notification(Notification),
    /// Raw bytes.
    Binary(Bytes),
}

impl Inbound {
    /// Classify a frame, or `None` if it matches no known shape.
    #[must_use]
    pub fn classify(frame: Frame) -> Option<Self> {
        match frame {
            Frame::Binary(bytes) => Some(Inbound::Binary(bytes)),
            Frame::Text(text) => classify_text(&text),
        }
    }
}

fn classify_text(text: &str) -> Option<Inbound> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("Dropping unparseable frame: {e}");
            return None;
        }
    };

    let Some(obj) = value.as_object() else {
        tracing::debug!("Dropping non-object frame");
        return None;
    };

    let has_id = obj.get("id").is_some_and(|id| !id.is_null());
    let is_response = has_id && (obj.contains_key("result") || obj.contains_key("error"));
    let is_notification = !has_id && obj.get("method").is_some_and(Value::is_string);

    let classified = if is_response {
        serde_json::from_value(value).map(Inbound::Response)
    } else if is_notification {
        serde_json::from_value(value).map(Inbound::Notification)
    } else {
        tracing::debug!("Dropping frame with unknown shape");
        return None;
    };

    match classified {
        Ok(inbound) => Some(inbound),
        Err(e) => {
            tracing::debug!("Dropping malformed frame: {e}");
            None
        }
    }
}
