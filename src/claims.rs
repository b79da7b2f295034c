// src/claims.rs

use crate::model::{IdentityResult, UserName};
use serde_json::{Map, Value};

/// Maps verified claims, plus the optional name from the callback, onto an
/// [`IdentityResult`]. Tokens are left empty; see [`IdentityResult::with_tokens`].
pub fn extract(claims: Map<String, Value>, name: Option<&UserName>) -> IdentityResult {
    let id = claims.get("sub").and_then(Value::as_str).unwrap_or_default().to_string();
    let email = claims.get("email").and_then(Value::as_str).map(String::from);

    IdentityResult {
        id,
        name: name.and_then(display_name),
        email,
        email_verified: flag(claims.get("email_verified")),
        is_private_email: flag(claims.get("is_private_email")),
        raw_claims: claims,
        access_token: None,
        refresh_token: None,
        expires_in: None,
    }
}

/// "First Last" from whichever parts are non-empty.
fn display_name(name: &UserName) -> Option<String> {
    let parts: Vec<&str> = [name.first_name.as_deref(), name.last_name.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

// Apple sends these booleans as either JSON booleans or the strings "true"/"false".
fn flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
