//! OMM JSON Message Types
//!
//! Wire shapes of the messages a session writes, and the envelope fields read
//! from every inbound message.
//!
//! # Outbound
//!
//! ```json
//! {"ID":1,"Domain":"Login","Key":{"NameType":"AuthnToken",
//!   "Elements":{"ApplicationId":"256","Position":"10.0.0.1","AuthenticationToken":"..."}}}
//! {"ID":2,"Key":{"Name":"/EUR="}}
//! {"ID":2,"Key":{"Name":["EUR=","JPY="],"Service":"ELEKTRON_DD"}}
//! {"Type":"Pong"}
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::session::{
    ItemRequest, LOGIN_DOMAIN, LOGIN_STREAM_ID, LoginKey, LoginRequest,
};

/// `NameType` of a token login.
pub const AUTHN_TOKEN_NAME_TYPE: &str = "AuthnToken";

// =============================================================================
// Login
// =============================================================================

/// Login request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginMessage {
    /// Stream id (always 1).
    #[serde(rename = "ID")]
    pub id: i64,
    /// `Login`.
    pub domain: String,
    /// Identity.
    pub key: LoginMessageKey,
    /// `false` on a login refresh, absent otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh: Option<bool>,
}

/// `Key` of a login request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginMessageKey {
    /// `AuthnToken` for token logins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_type: Option<String>,
    /// User name for direct logins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Login elements.
    pub elements: LoginElements,
}

/// `Key.Elements` of a login request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginElements {
    /// Application id.
    pub application_id: String,
    /// Client position.
    pub position: String,
    /// Access token for token logins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication_token: Option<String>,
}

impl From<&LoginRequest> for LoginMessage {
    fn from(request: &LoginRequest) -> Self {
        let (name_type, name, authentication_token) = match &request.key {
            LoginKey::Token(token) => (
                Some(AUTHN_TOKEN_NAME_TYPE.to_string()),
                None,
                Some(token.clone()),
            ),
            LoginKey::User(user) => (None, Some(user.clone()), None),
        };

        Self {
            id: LOGIN_STREAM_ID,
            domain: LOGIN_DOMAIN.to_string(),
            key: LoginMessageKey {
                name_type,
                name,
                elements: LoginElements {
                    application_id: request.application_id.clone(),
                    position: request.position.clone(),
                    authentication_token,
                },
            },
            refresh: request.refresh.then_some(false),
        }
    }
}

// =============================================================================
// Item Request
// =============================================================================

/// Market-price item request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemRequestMessage {
    /// Stream id.
    #[serde(rename = "ID")]
    pub id: i64,
    /// Requested items.
    #[serde(rename = "Key")]
    pub key: ItemKey,
}

/// `Key` of an item request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemKey {
    /// One name, or an array for a batch.
    pub name: ItemName,
    /// Service name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

/// A single item name or a batch of names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ItemName {
    /// `"Name": "/EUR="`.
    Single(String),
    /// `"Name": ["EUR=", "JPY="]`.
    Batch(Vec<String>),
}

impl From<&ItemRequest> for ItemRequestMessage {
    fn from(request: &ItemRequest) -> Self {
        let names = &request.subscription.names;
        let name = match names.as_slice() {
            [single] => ItemName::Single(single.clone()),
            _ => ItemName::Batch(names.clone()),
        };

        Self {
            id: request.id,
            key: ItemKey {
                name,
                service: request.subscription.service.clone(),
            },
        }
    }
}

// =============================================================================
// Pong
// =============================================================================

/// Keep-alive reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PongMessage {
    #[serde(rename = "Type")]
    kind: &'static str,
}

impl Default for PongMessage {
    fn default() -> Self {
        Self { kind: "Pong" }
    }
}

// =============================================================================
// Inbound Envelope
// =============================================================================

/// Fields read from every inbound message; the rest is kept as raw JSON.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundEnvelope {
    /// `Type`.
    #[serde(rename = "Type")]
    pub kind: String,
    /// `ID`.
    #[serde(rename = "ID", default)]
    pub id: Option<i64>,
    /// `Domain`.
    #[serde(rename = "Domain", default)]
    pub domain: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::session::{ITEM_STREAM_ID, ItemSubscription};

    fn login(key: LoginKey, refresh: bool) -> LoginRequest {
        LoginRequest {
            key,
            application_id: "256".into(),
            position: "10.0.0.1".into(),
            refresh,
        }
    }

    #[test]
    fn token_login_shape() {
        let message = LoginMessage::from(&login(LoginKey::Token("tok".into()), false));
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "ID": 1,
                "Domain": "Login",
                "Key": {
                    "NameType": "AuthnToken",
                    "Elements": {
                        "ApplicationId": "256",
                        "Position": "10.0.0.1",
                        "AuthenticationToken": "tok"
                    }
                }
            })
        );
    }

    #[test]
    fn login_refresh_carries_refresh_false() {
        let message = LoginMessage::from(&login(LoginKey::Token("tok".into()), true));
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["Refresh"], json!(false));
    }

    #[test]
    fn user_login_shape() {
        let message = LoginMessage::from(&login(LoginKey::User("rmds".into()), false));
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "ID": 1,
                "Domain": "Login",
                "Key": {
                    "Name": "rmds",
                    "Elements": { "ApplicationId": "256", "Position": "10.0.0.1" }
                }
            })
        );
    }

    #[test]
    fn single_and_batch_item_requests() {
        let single = ItemRequestMessage::from(&ItemRequest {
            id: ITEM_STREAM_ID,
            subscription: ItemSubscription::single("/EUR="),
        });
        let batch = ItemRequestMessage::from(&ItemRequest {
            id: ITEM_STREAM_ID,
            subscription: ItemSubscription::batch(["EUR=", "JPY="]).with_service("ELEKTRON_DD"),
        });

        assert_eq!(
            serde_json::to_value(&single).unwrap(),
            json!({ "ID": 2, "Key": { "Name": "/EUR=" } })
        );
        assert_eq!(
            serde_json::to_value(&batch).unwrap(),
            json!({ "ID": 2, "Key": { "Name": ["EUR=", "JPY="], "Service": "ELEKTRON_DD" } })
        );
    }

    #[test]
    fn pong_shape() {
        assert_eq!(
            serde_json::to_string(&PongMessage::default()).unwrap(),
            r#"{"Type":"Pong"}"#
        );
    }
}
