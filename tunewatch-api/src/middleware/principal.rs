//! Caller identity from the fronting gateway.
//!
//! Authentication happens upstream. When a trusted header is configured, its
//! value becomes the request's [`Principal`] extension; otherwise requests are
//! anonymous. The header is only meaningful when the gateway strips any
//! client-supplied copy.

use axum::{
    extract::{Request, State},
    http::HeaderName,
    middleware::Next,
    response::Response,
};
use tunewatch_core::Principal;

#[derive(Debug, Clone, Default)]
pub struct TrustedPrincipalHeader(pub Option<HeaderName>);

pub async fn principal_middleware(
    State(header): State<TrustedPrincipalHeader>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(name) = header.0.as_ref() {
        let principal = request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(Principal::new);
        if let Some(principal) = principal {
            request.extensions_mut().insert(principal);
        }
    }
    next.run(request).await
}
