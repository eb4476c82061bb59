//! Wire protocol types.
//!
//! One JSON object per newline-terminated line, both directions. The first
//! inbound line of a connection must be a [`LoginRequest`]; every later
//! line is a [`Query`]. Unknown fields are ignored. Exactly one [`Reply`]
//! line goes back per request, even on policy errors.

use axon_core::UserInfo;
use serde::{Deserialize, Serialize};

/// First frame of every connection
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Post-login command frame.
///
/// Field use varies per command; `dimension` doubles as the result count
/// `k` on `SEARCH_TOPK` (kept for wire compatibility).
#[derive(Debug, Default, Deserialize)]
pub struct Query {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub space: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub new_user: Option<String>,
    #[serde(default)]
    pub delete_user: Option<String>,
    #[serde(default)]
    pub engine_type: Option<String>,
    #[serde(default)]
    pub dimension: Option<i64>,
    #[serde(default)]
    pub index_type: Option<String>,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub radius: Option<f64>,
    #[serde(default)]
    pub enable_wal: Option<bool>,
}

/// Reply frame; null fields are omitted on the wire
#[derive(Debug, Serialize)]
pub struct Reply {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spaces: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
}

impl Reply {
    pub fn ok_message(message: impl Into<String>) -> Self {
        Reply {
            status: "OK",
            message: Some(message.into()),
            value: None,
            spaces: None,
            user: None,
        }
    }

    pub fn ok_value(value: impl Into<String>) -> Self {
        Reply {
            status: "OK",
            message: None,
            value: Some(value.into()),
            spaces: None,
            user: None,
        }
    }

    pub fn ok_spaces(spaces: Vec<String>) -> Self {
        Reply {
            status: "OK",
            message: None,
            value: None,
            spaces: Some(spaces),
            user: None,
        }
    }

    pub fn ok_user(user: UserInfo) -> Self {
        Reply {
            status: "OK",
            message: None,
            value: None,
            spaces: None,
            user: Some(user),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply {
            status: "ERROR",
            message: Some(message.into()),
            value: None,
            spaces: None,
            user: None,
        }
    }

    /// Serialize as one wire line (without the trailing newline).
    pub fn to_line(&self) -> String {
        // Reply serialization cannot fail: every field is a plain string,
        // list or map type
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"status":"ERROR","message":"internal encoding failure"}"#.to_string()
        })
    }
}

/// One search hit in a `SEARCH_TOPK` / `RANGE_SEARCH` result array
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: i64,
    pub distance: f32,
}
