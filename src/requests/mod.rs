mod error;
mod request;
mod response;

pub use error::ServerError;
pub use request::ApiRequest;
pub use response::{ApiResponse, FutureResponse};
