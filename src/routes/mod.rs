//! HTTP routes for examdesk

pub mod health;
pub mod mcq;
pub mod response;
pub mod webhook;

pub use health::{health_check, readiness_check, version_info};
pub use mcq::{
    handle_dashboard, handle_generate, handle_last_attempted, handle_last_attempted_list,
    handle_progress, handle_results, handle_submit,
};
pub use response::{error_response, json_response, success_response, FullBody};
pub use webhook::handle_webhook;
