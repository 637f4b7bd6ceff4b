//! Translation between the OpenAI-compatible surface and the Monica backend.
//!
//! Requests go out through [`request`]; the backend's SSE body comes back
//! through [`sse`] and is either re-streamed by [`streaming`] or folded into
//! one completion by [`response`]. Everything here is free of network I/O.

pub mod backend_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod sse;
pub mod streaming;

/// Random alphanumeric identifier of `len` characters (at most 32).
pub(crate) fn random_id(len: usize) -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(len);
    id
}
