pub mod connection;
pub mod handlers;
pub mod handshake;
pub mod hub;
pub mod presence;

use std::sync::Arc;

use axum::{Router, routing::get};

use zchat_service::ChatServices;
use zchat_service::store::UserStore;

use crate::handshake::{OriginPolicy, TokenVerifier};
use crate::hub::Hub;
use crate::presence::Presence;

/// Everything a socket connection needs, shared across all of them.
#[derive(Clone)]
pub struct Gateway {
    hub: Hub,
    services: ChatServices,
    presence: Presence,
    verifier: Arc<dyn TokenVerifier>,
    origins: OriginPolicy,
}

impl Gateway {
    pub fn new(
        hub: Hub,
        services: ChatServices,
        users: Arc<dyn UserStore>,
        verifier: Arc<dyn TokenVerifier>,
        origins: OriginPolicy,
    ) -> Self {
        Self {
            presence: Presence::new(hub.clone(), users),
            hub,
            services,
            verifier,
            origins,
        }
    }

    /// `GET /ws`
    pub fn routes(self) -> Router {
        Router::new()
            .route("/ws", get(handshake::upgrade))
            .with_state(self)
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn services(&self) -> &ChatServices {
        &self.services
    }

    pub fn verifier(&self) -> Arc<dyn TokenVerifier> {
        self.verifier.clone()
    }

    pub fn origins(&self) -> &OriginPolicy {
        &self.origins
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }
}
