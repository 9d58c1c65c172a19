// Request encoding
// Attaches the access token the way each verb expects it

use reqwest::{Method, Url};
use serde_json::{json, Value};

use super::types::EncodedRequest;

/// Encode an authenticated request.
///
/// Read verbs carry the token as a query parameter; write verbs carry it as a
/// `"token"` field merged into the JSON body. Callers pre-serialize their
/// payloads (sometimes through an opaque encryption step), so the merge must
/// never drop what they hand us, even when it is not valid JSON.
pub(crate) fn encode(
    method: Method,
    url: &Url,
    raw_body: Option<&str>,
    token: &str,
) -> EncodedRequest {
    if method == Method::GET || method == Method::HEAD {
        let mut url = url.clone();
        url.query_pairs_mut().append_pair("token", token);
        EncodedRequest {
            method,
            url,
            body: None,
        }
    } else {
        EncodedRequest {
            method,
            url: url.clone(),
            body: Some(merge_token_into_body(raw_body, token)),
        }
    }
}

/// Merge the token into a caller-supplied JSON body.
///
/// - empty or absent body: `{"token": ...}`
/// - JSON object: insert/overwrite the `"token"` key
/// - anything else (malformed JSON, or JSON that is not an object and so
///   cannot carry the key): wrap as `{"token": ..., "originalBody": raw}`
///
/// The object branch does not look inside the map, so an opaque encrypted
/// envelope that happens to be a JSON object passes through untouched apart
/// from the added key.
fn merge_token_into_body(raw_body: Option<&str>, token: &str) -> String {
    let raw = raw_body.unwrap_or("");
    if raw.is_empty() {
        return json!({ "token": token }).to_string();
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(mut map)) => {
            map.insert("token".to_string(), Value::String(token.to_string()));
            Value::Object(map).to_string()
        }
        _ => json!({ "token": token, "originalBody": raw }).to_string(),
    }
}
