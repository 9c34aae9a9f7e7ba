pub mod api;
pub mod error;
pub mod range;
pub mod stream;
pub mod svc;

pub use error::CoreError;
pub use svc::{router, serve_http, HttpEndpoint};
