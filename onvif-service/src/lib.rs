pub mod api;
pub mod auth;
pub mod discovery;
pub mod events;
pub mod logger;
pub mod model;
pub mod onvif;
pub mod repository;
pub mod soap;

pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
