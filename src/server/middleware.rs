use axum::{body::Body, extract::MatchedPath, http::Request, middleware::Next, response::Response};

use crate::metrics::HTTP_REQUESTS_TOTAL;

/// Count ops requests by method, route and status.
pub async fn track_http_metrics(req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    // Route template, not the raw path, to bound label cardinality
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), path.as_str(), response.status().as_str()])
        .inc();

    response
}
