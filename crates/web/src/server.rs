//! Server builder facade tying a router to the runtime.

use crate::router::Router;
use crate::service::RouterService;
use peregrine_http::config::ServerConfig;
use peregrine_http::server::{HttpServer, ServerError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, Level};

pub struct ServerBuilder {
    config: ServerConfig,
    router: Option<Router>,
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("router must be set")]
    MissingRouter,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { config: ServerConfig::default(), router: None }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn workers(mut self, workers: u32) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let router = self.router.ok_or(ServerBuildError::MissingRouter)?;
        Ok(Server { config: self.config, router })
    }
}

/// A configured server; `run` blocks until SIGINT/SIGTERM.
pub struct Server {
    config: ServerConfig,
    router: Router,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn run(self) -> Result<(), ServerError> {
        let _ = tracing_subscriber::fmt().with_max_level(Level::INFO).try_init();

        let service = Arc::new(RouterService::new(self.router));
        let server = HttpServer::bind(self.config, service)?;
        info!(addr = %server.local_addr(), "listening");
        server.run()
    }
}
