use actix_web::http::{header, StatusCode};
use actix_web::{error::ResponseError, HttpResponse};
use thiserror::Error;

use crate::soap::{self, Fault};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Internal Server Error")]
    InternalServerError(#[from] anyhow::Error),

    #[error(transparent)]
    Fault(#[from] Fault),

    /// Authentication failed; `challenge` is the `WWW-Authenticate` value.
    #[error("Unauthorized")]
    Unauthorized { challenge: String },

    #[error("Not Found")]
    NotFound,
}

// Every SOAP-level error leaves as a fault envelope.
impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Fault(f) if f.is_sender() => StatusCode::BAD_REQUEST,
            ServiceError::Fault(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ServiceError::NotFound => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code());
        match self {
            ServiceError::InternalServerError(e) => {
                tracing::error!("{:?}", e);
                response
                    .content_type(soap::CONTENT_TYPE)
                    .body(Fault::receiver("ter:Action", "Internal Server Error, Please try later").to_xml())
            }
            ServiceError::Fault(fault) => response.content_type(soap::CONTENT_TYPE).body(fault.to_xml()),
            ServiceError::Unauthorized { challenge } => response
                .insert_header((header::WWW_AUTHENTICATE, challenge.as_str()))
                .content_type(soap::CONTENT_TYPE)
                .body(Fault::not_authorized().to_xml()),
            ServiceError::NotFound => response.finish(),
        }
    }
}
