use futures::Stream;
use futures::future::{self, Future};
use hyper::{Request, Uri, Method, Body, Error as HyperError};
use hyper::header::{AsHeaderName, AUTHORIZATION};
use uuid::Uuid;

use super::error::ServerError;

/// Larger bodies are discarded and so fail to parse.
pub const MAX_BODY_LEN: usize = 64 * 1024;

pub struct ApiRequest {
    request: Request<Body>,
    uuid: Uuid,
}

impl ApiRequest {
    pub fn new(request: Request<Body>) -> ApiRequest {
        ApiRequest { request, uuid: Uuid::new_v4() }
    }

    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    pub fn uri(&self) -> &Uri {
        self.request.uri()
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn header<'a, T>(&'a self, header: T) -> Option<&'a str> where T: 'a + AsHeaderName {
        self.request.headers()
            .get(header)
            .and_then(|header| header.to_str().ok())
    }

    pub fn authorization(&self) -> Option<&str> {
        self.header(AUTHORIZATION)
    }

    pub fn body_loaded(self) -> Box<dyn Future<Item=Vec<u8>, Error=ServerError> + Send> {
        let uuid = self.uuid;
        Box::new(
            self.request.into_body()
                .fold((Vec::new(), false), |(mut body, oversized), chunk| {
                    let oversized = oversized || body.len() + chunk.len() > MAX_BODY_LEN;
                    if oversized {
                        body.clear();
                    } else {
                        body.extend_from_slice(&*chunk);
                    }
                    future::ok::<_, HyperError>((body, oversized))
                })
                .map(move |(body, oversized)| {
                    if oversized {
                        warn!("Request body over {} bytes discarded [{}]", MAX_BODY_LEN, uuid);
                    }
                    body
                })
                .map_err(From::from)
        )
    }
}
