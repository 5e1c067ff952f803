//! Per-request correlation id, carried in a task-local so that code deep in the
//! call stack (the upstream client, log lines) can see it without threading it
//! through every signature.

use std::future::Future;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Run `fut` with `id` as the current request id.
pub async fn with_request_id<F>(id: String, fut: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(id, fut).await
}

/// The request id of the current task, if one is in scope.
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|id| id.clone()).ok()
}

pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
