use onvif_service::{api, discovery, logger, model, onvif::Onvif, Result};

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();

    let file = if let Ok(f) = std::env::var("ONVIF_CONFIG") {
        f
    } else {
        "config.toml".to_owned()
    };

    let config = model::Config::load(&file).await?;
    for url in config.listen_urls() {
        tracing::info!("configured url {}", url);
    }

    let onvif = Onvif::new(config.clone())?;
    onvif.start_events();

    let discovery = match discovery::start(&config.discovery).await {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("discovery unavailable: {:?}", e);
            None
        }
    };

    let result = api::start_server(onvif).await;

    if let Some(discovery) = discovery {
        if let Err(e) = discovery.bye().await {
            tracing::warn!("discovery bye failed: {}", e);
        }
    }
    result
}
