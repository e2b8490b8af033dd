use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use actix_web::{
    middleware,
    web::{self, Bytes, Data, Query},
    App, HttpRequest, HttpResponse, HttpServer,
};
use anyhow::{anyhow, Context};
use serde::Deserialize;

use crate::auth::HttpCredentials;
use crate::model::Tls;
use crate::onvif::{Call, Onvif};
use crate::soap::{self, Envelope, Fault};
use crate::Result;

mod auth;
mod error;
pub mod host;
pub mod metadata;

pub use error::ServiceError;
use host::Endpoint;

#[derive(Deserialize)]
pub struct SubscriptionQuery {
    subscription: Option<String>,
}

fn base_url(req: &HttpRequest) -> String {
    let info = req.connection_info();
    format!("{}://{}", info.scheme(), info.host())
}

async fn soap_call(
    req: HttpRequest,
    body: Bytes,
    credentials: HttpCredentials,
    query: Query<SubscriptionQuery>,
    onvif: Data<Onvif>,
    endpoint: Data<Endpoint>,
) -> Result<HttpResponse, ServiceError> {
    let text = std::str::from_utf8(&body).map_err(|_| Fault::sender("ter:WellFormed", "request is not UTF-8"))?;
    let envelope = Envelope::parse(text)?;

    let (namespace, name) = envelope.operation();
    let (contract, operation) = endpoint
        .find(namespace, name)
        .ok_or_else(|| Fault::action_not_supported(name))?;

    let principal = match onvif.authenticator().check(operation.access, &credentials, &envelope).await {
        Ok(principal) => principal,
        Err(e) if e.is_challenge() => {
            tracing::info!("{} {}: {}", endpoint.path, operation.name, e);
            return Err(ServiceError::Unauthorized {
                challenge: onvif.authenticator().challenge(e.is_stale()),
            });
        }
        Err(e) => {
            tracing::info!("{} {}: {}", endpoint.path, operation.name, e);
            return Err(Fault::not_authorized().into());
        }
    };

    tracing::debug!(
        "{} {}::{} as {}",
        endpoint.path,
        contract.name,
        operation.name,
        principal.user_name.as_deref().unwrap_or("anonymous")
    );

    let call = Call {
        contract,
        operation,
        envelope: &envelope,
        principal,
        base_url: base_url(&req),
        subscription: query.into_inner().subscription,
    };

    let response = endpoint.service.call(&call).await.map_err(|fault| {
        tracing::debug!("{} {} faulted: {}", endpoint.path, operation.name, fault);
        fault
    })?;

    let header = soap::reply_header(&envelope, &contract.response_action(operation.name));
    Ok(HttpResponse::Ok()
        .content_type(soap::CONTENT_TYPE)
        .body(soap::envelope(&header, &response)))
}

async fn service_metadata(req: HttpRequest, endpoint: Data<Endpoint>) -> Result<HttpResponse, ServiceError> {
    if !metadata::is_metadata_query(req.query_string()) {
        return Err(ServiceError::NotFound);
    }
    Ok(HttpResponse::Ok()
        .content_type(metadata::CONTENT_TYPE)
        .body(metadata::wsdl(&endpoint, &base_url(&req))))
}

/// Builds the endpoint table once so every worker shares the same services.
pub fn endpoints(onvif: &Onvif) -> Result<Vec<Arc<Endpoint>>> {
    Ok(onvif
        .service_builder()?
        .build()
        .into_iter()
        .map(Arc::new)
        .collect())
}

/// Mounts every endpoint: POST dispatches SOAP, GET serves WSDL.
pub fn configure(cfg: &mut web::ServiceConfig, onvif: &Onvif, endpoints: &[Arc<Endpoint>]) {
    cfg.app_data(Data::new(onvif.clone()));
    for endpoint in endpoints {
        cfg.service(
            web::resource(endpoint.path)
                .app_data(Data::from(endpoint.clone()))
                .route(web::post().to(soap_call))
                .route(web::get().to(service_metadata)),
        );
    }
}

fn load_tls(tls: &Tls) -> Result<rustls::ServerConfig> {
    let mut certs = BufReader::new(
        File::open(&tls.certificate).with_context(|| format!("failed to open {}", tls.certificate.display()))?,
    );
    let certs = rustls_pemfile::certs(&mut certs).collect::<std::result::Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(anyhow!("no certificates in {}", tls.certificate.display()));
    }

    let mut key = BufReader::new(
        File::open(&tls.private_key).with_context(|| format!("failed to open {}", tls.private_key.display()))?,
    );
    let key = rustls_pemfile::private_key(&mut key)?
        .ok_or_else(|| anyhow!("no private key in {}", tls.private_key.display()))?;

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(config)
}

pub async fn start_server(onvif: Onvif) -> Result<()> {
    let endpoints = endpoints(&onvif)?;
    let config = onvif.config().clone();
    let address = config.discovery.ipv4_address.clone();

    let app_onvif = onvif.clone();
    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .configure(|cfg| configure(cfg, &app_onvif, &endpoints))
    });

    match &config.tls {
        Some(tls) => {
            server = server.bind_rustls_0_23((address.as_str(), config.discovery.https_port), load_tls(tls)?)?;
            tracing::info!("listening on {}", config.https_url());
        }
        None => tracing::warn!("no Tls section configured, {} is not served", config.https_url()),
    }

    server = server.bind((address.as_str(), config.discovery.http_port))?;
    tracing::info!("listening on {}", config.http_url());

    server.run().await?;
    Ok(())
}
