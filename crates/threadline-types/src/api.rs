use serde::{Deserialize, Serialize};

use crate::models::{MessageId, PrincipalId, ThreadId, Visibility};

// -- JWT Claims --

/// JWT claims shared by threadline-api (REST middleware) and
/// threadline-gateway (WebSocket Identify). `sub` is the principal id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: PrincipalId,
    pub exp: usize,
}

// -- Threads --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateThreadRequest {
    pub name: String,
    #[serde(default)]
    pub visibility: Visibility,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateThreadResponse {
    pub thread_id: ThreadId,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub message_id: MessageId,
}

// -- Membership --

#[derive(Debug, Serialize, Deserialize)]
pub struct MembershipResponse {
    pub thread_id: ThreadId,
    pub member: bool,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
