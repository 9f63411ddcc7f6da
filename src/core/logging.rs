//! Logging utilities with call context support.
//!
//! The current call id is stored task-locally so that logs emitted deep inside
//! the pipeline or the upstream client can be correlated with the call record.

tokio::task_local! {
    /// Task-local storage for the current call id.
    pub static REQUEST_ID: String;
}

/// Get the current call id from context, if set.
///
/// Returns an empty string if no call id is set.
pub fn get_request_id() -> String {
    REQUEST_ID.try_with(|id| id.clone()).unwrap_or_default()
}

/// Generate a new unique call id using UUID v4.
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Execute an async block with the call id in scope.
///
/// ```ignore
/// with_request_id!(request_id, async {
///     // handler logic here
/// })
/// ```
#[macro_export]
macro_rules! with_request_id {
    ($request_id:expr, $body:expr) => {
        $crate::core::logging::REQUEST_ID
            .scope($request_id, $body)
            .await
    };
}
