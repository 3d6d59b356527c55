pub mod auth;
pub mod logging;
pub mod request_id;

pub use logging::Logging;
pub use request_id::RequestId;
