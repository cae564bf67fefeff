use std::error::Error;
use std::fmt::{Display, Formatter, Result as FormatResult};

use hyper::Error as HyperError;
use serde_json::Error as JsonError;

/// Failures below the API layer; request-level problems are answered with an `ErrorCode` instead.
#[derive(Debug)]
pub enum ServerError {
    Transport(HyperError),
    Json(JsonError),
}

impl Error for ServerError {}

impl Display for ServerError {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        match self {
            ServerError::Transport(err) => write!(f, "connection failed: {}", err),
            ServerError::Json(err) => write!(f, "bad JSON: {}", err),
        }
    }
}

impl From<HyperError> for ServerError {
    fn from(err: HyperError) -> ServerError {
        ServerError::Transport(err)
    }
}

impl From<JsonError> for ServerError {
    fn from(err: JsonError) -> ServerError {
        ServerError::Json(err)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_failures_convert() {
        let err = ServerError::from(serde_json::from_str::<u32>("[").unwrap_err());
        match err {
            ServerError::Json(_) => assert!(err.to_string().starts_with("bad JSON: ")),
            _ => panic!("expected json error"),
        }
    }
}
