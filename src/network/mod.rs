pub mod broadcast;
pub mod host;
pub mod http_api;
pub mod server;
