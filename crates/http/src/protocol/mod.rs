//! HTTP protocol types: parsed request views, response construction,
//! problem-details bodies and the parse error hierarchy.

pub mod error;
pub mod problem;
pub mod request;
pub mod response;

pub use error::ParseError;
pub use problem::ProblemDetails;
pub use request::{Field, HeadersView, Request};
pub use response::{Body, Response};
