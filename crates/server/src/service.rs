//! Tower service mapping wire requests onto [`ImportServer`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use keyhost_proto::{ErrorResponse, Request, RequestPayload, ResponsePayload};
use tower_service::Service;
use tracing::{Instrument, debug, info_span, warn};

use crate::server::ImportServer;

/// Per-connection request handler.
///
/// Cheap to clone; every connection shares the same [`ImportServer`], so
/// instances configured on one connection are reachable from any other.
#[derive(Debug, Clone)]
pub struct ImportService {
	server: Arc<ImportServer>,
}

impl ImportService {
	/// Creates a service backed by `server`.
	#[must_use]
	pub fn new(server: Arc<ImportServer>) -> Self {
		Self { server }
	}
}

impl Service<Request> for ImportService {
	type Response = ResponsePayload;
	type Error = ErrorResponse;
	type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

	fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
		Poll::Ready(Ok(()))
	}

	fn call(&mut self, req: Request) -> Self::Future {
		let server = self.server.clone();
		let span = info_span!("import.request", id = req.id.0);

		Box::pin(
			async move {
				let result = match req.payload {
					RequestPayload::Ping => Ok(ResponsePayload::Pong),
					RequestPayload::Configure { config } => server
						.configure(&config)
						.await
						.map(|instance_id| ResponsePayload::Configured { instance_id }),
					RequestPayload::Get { requests } => server
						.get(requests)
						.await
						.map(|responses| ResponsePayload::Got { responses }),
					RequestPayload::Close { instance_id } => {
						server.close(instance_id).await;
						Ok(ResponsePayload::Closed)
					}
				};

				match result {
					Ok(payload) => {
						debug!("request served");
						Ok(payload)
					}
					Err(e) => {
						warn!(code = ?e.code(), error = %e, "request failed");
						Err(e.into())
					}
				}
			}
			.instrument(span),
		)
	}
}
