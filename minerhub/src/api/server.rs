//! HTTP server plumbing: shared handler state, error mapping, and the
//! serve loop.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use super::v0;
use crate::api_client::types::ErrorBody;
use crate::controls::ControlSet;
use crate::error::{Error, Result};
use crate::fleet::{DeviceId, FleetDispatcher, FleetRegistry};
use crate::tracing::prelude::*;

/// State shared by every request handler.
#[derive(Clone)]
pub struct SharedState {
    pub dispatcher: FleetDispatcher,
    controls: Arc<RwLock<HashMap<DeviceId, Arc<ControlSet>>>>,
}

impl SharedState {
    pub fn new(dispatcher: FleetDispatcher) -> Self {
        Self {
            dispatcher,
            controls: Arc::default(),
        }
    }

    pub fn registry(&self) -> &Arc<FleetRegistry> {
        self.dispatcher.registry()
    }

    /// Publish the controls registered for a device.
    pub fn install_controls(&self, controls: ControlSet) {
        let id = controls.device().clone();
        self.controls.write().insert(id, Arc::new(controls));
    }

    pub fn controls(&self, id: &DeviceId) -> Option<Arc<ControlSet>> {
        self.controls.read().get(id).cloned()
    }

    /// Stop polling a device and drop its controls.
    pub async fn remove_device(&self, id: &DeviceId) -> Result<()> {
        let removed = self.registry().remove(id).await;
        self.controls.write().remove(id);
        if removed {
            Ok(())
        } else {
            Err(Error::Resolution(id.clone()))
        }
    }
}

/// Build the full router with tracing middleware.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .nest("/api/v0", v0::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `bind` until `shutdown` is cancelled.
pub async fn serve(bind: &str, state: SharedState, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(address = %listener.local_addr()?, "API server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("API server stopped");
    Ok(())
}

impl Error {
    /// HTTP status for an error surfaced to an API caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Resolution(_) => StatusCode::NOT_FOUND,
            Error::Range { .. } | Error::InvalidOption { .. } => StatusCode::BAD_REQUEST,
            Error::CapabilityUnsupported { .. } => StatusCode::CONFLICT,
            Error::NotReady(_) | Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Connect { .. } | Error::Fetch { .. } | Error::Command { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(error = %self, "Request failed");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}
