//! HTTP API handlers for lms-server
//!
//! Every JSON response is an [`lms_common::api::ApiEnvelope`]. Handlers
//! stay thin: extract, call one service method, wrap the result.

pub mod account;
pub mod catalog;
pub mod certificates;
pub mod enrollments;
pub mod events;
pub mod health;
pub mod import;
pub mod messages;
pub mod payments;
pub mod progress;
pub mod quizzes;
pub mod translations;

pub use account::{account_routes, public_auth_routes};
pub use catalog::catalog_routes;
pub use certificates::{certificate_routes, public_certificate_routes};
pub use enrollments::enrollment_routes;
pub use events::event_routes;
pub use health::health_routes;
pub use import::import_routes;
pub use messages::message_routes;
pub use payments::payment_routes;
pub use progress::progress_routes;
pub use quizzes::test_routes;
pub use translations::translation_routes;
