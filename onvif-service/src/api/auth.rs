use futures::future::{ready, Ready};

use actix_web::{dev::Payload, http::header, Error, FromRequest, HttpRequest};

use crate::auth::HttpCredentials;

impl FromRequest for HttpCredentials {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let uri = req
            .uri()
            .path_and_query()
            .map(|p| p.as_str().to_owned())
            .unwrap_or_else(|| req.path().to_owned());

        ready(Ok(HttpCredentials {
            method: req.method().as_str().to_owned(),
            uri,
            authorization: req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
        }))
    }
}
