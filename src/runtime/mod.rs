//! Request/response surface for a farm front end.

pub mod api;

pub use api::{dispatch, FarmRequest, FarmResponse};
