//! Server main loop driver.

use std::future::{Future, poll_fn};
use std::ops::ControlFlow;
use std::pin::{Pin, pin};
use std::task::{Context, Poll, ready};

use futures::{StreamExt, stream};
use pin_project_lite::pin_project;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tower_service::Service;
use tracing::{debug, error, warn};

use crate::protocol::{Inbound, Protocol};

/// Service main loop driver for one connection.
///
/// Every inbound request is handed to the service and its future runs on a
/// [`JoinSet`], so requests on one connection execute concurrently and their
/// responses are written in completion order.
pub struct MainLoop<P: Protocol, S> {
	/// Wire format binding.
	protocol: P,
	/// The wrapped request service.
	service: S,
	/// Concurrent request handlers in flight.
	tasks: JoinSet<P::Response>,
}

impl<P, S> MainLoop<P, S>
where
	P: Protocol,
	S: Service<P::Request, Response = P::ReqResult, Error = P::ReqError>,
	S::Future: Send + 'static,
{
	/// Creates a main loop serving `service` over `protocol`.
	#[must_use]
	pub fn new(protocol: P, service: S) -> Self {
		Self {
			protocol,
			service,
			tasks: JoinSet::new(),
		}
	}

	/// Get a reference to the inner service.
	#[must_use]
	pub fn get_ref(&self) -> &S {
		&self.service
	}

	/// Drive the main loop until the peer disconnects.
	///
	/// In-flight requests are drained and answered before returning after a
	/// clean disconnect.
	///
	/// # Errors
	///
	/// Returns the protocol's loop error when reading or writing fails for any
	/// reason other than a disconnect recognized by [`Protocol::is_disconnect`].
	pub async fn run<I, O>(self, input: I, output: O) -> Result<(), P::LoopError>
	where
		I: AsyncBufRead + Unpin + Send,
		O: AsyncWrite + Unpin + Send,
	{
		self.run_until(input, output, std::future::pending()).await
	}

	/// Drive the main loop until the peer disconnects or `shutdown` resolves.
	///
	/// Once `shutdown` resolves no further frames are read; requests already
	/// in flight are still answered before the output is shut down.
	///
	/// # Errors
	///
	/// As [`MainLoop::run`].
	pub async fn run_until<I, O, F>(mut self, input: I, mut output: O, shutdown: F) -> Result<(), P::LoopError>
	where
		I: AsyncBufRead + Unpin + Send,
		O: AsyncWrite + Unpin + Send,
		F: Future<Output = ()> + Send,
	{
		let mut shutdown = pin!(shutdown);
		// The pending read lives inside the stream, so losing a select race never drops a partial frame.
		let frames = stream::unfold((self.protocol.clone(), input), |(reader, mut input)| async move {
			let msg = reader.read_message(&mut input).await;
			Some((msg, (reader, input)))
		});
		let mut frames = pin!(frames);

		let ret = loop {
			let ctl = tokio::select! {
				biased;

				() = &mut shutdown => {
					debug!(backlog = self.tasks.len(), "rpc.mainloop.shutdown");
					ControlFlow::Break(Ok(()))
				}

				Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => match joined {
					Ok(resp) => Self::settle(send::<P, O>(&self.protocol, &mut output, resp).await),
					Err(e) => {
						error!(error = %e, "request task panicked or was cancelled");
						ControlFlow::Continue(())
					}
				},

				msg = frames.next() => match msg {
					Some(Ok(msg)) => Self::settle(self.dispatch_message(msg, &mut output).await),
					Some(Err(e)) => Self::settle(Err(e)),
					None => ControlFlow::Break(Ok(())),
				},
			};

			if let ControlFlow::Break(ret) = ctl {
				break ret;
			}
		};

		if ret.is_ok() {
			debug!(backlog = self.tasks.len(), "rpc.mainloop.drain");
			while let Some(joined) = self.tasks.join_next().await {
				match joined {
					Ok(resp) => {
						if let ControlFlow::Break(_) =
							Self::settle(send::<P, O>(&self.protocol, &mut output, resp).await)
						{
							break;
						}
					}
					Err(e) => error!(error = %e, "request task panicked or was cancelled"),
				}
			}
		}

		if let Err(e) = output.shutdown().await {
			debug!(error = %e, "output shutdown failed");
		}
		ret
	}

	/// Routes an incoming message to the service.
	async fn dispatch_message<O>(&mut self, msg: P::Message, output: &mut O) -> Result<(), P::LoopError>
	where
		O: AsyncWrite + Unpin + Send,
	{
		match P::split_inbound(msg) {
			Inbound::Request(req) => {
				let id = P::request_id(&req);
				if let Err(err) = poll_fn(|cx| self.service.poll_ready(cx)).await {
					return send::<P, O>(&self.protocol, output, P::response_err(id, err)).await;
				}
				let fut = self.service.call(req);
				self.tasks.spawn(RequestFuture::<P, S::Future> { fut, id: Some(id) });
			}
			Inbound::Response(_) => {
				warn!("dropping unsolicited response frame");
			}
		}
		Ok(())
	}

	/// Maps an IO outcome onto loop control, treating disconnects as a clean stop.
	fn settle(res: Result<(), P::LoopError>) -> ControlFlow<Result<(), P::LoopError>> {
		match res {
			Ok(()) => ControlFlow::Continue(()),
			Err(e) if P::is_disconnect(&e) => {
				debug!(error = %e, "peer disconnected");
				ControlFlow::Break(Ok(()))
			}
			Err(e) => ControlFlow::Break(Err(e)),
		}
	}
}

async fn send<P, O>(protocol: &P, output: &mut O, resp: P::Response) -> Result<(), P::LoopError>
where
	P: Protocol,
	O: AsyncWrite + Unpin + Send,
{
	let msg = P::wrap_response(resp);
	protocol.write_message(output, &msg).await
}

pin_project! {
	struct RequestFuture<P: Protocol, Fut> {
		#[pin]
		fut: Fut,
		id: Option<P::Id>,
	}
}

impl<P, Fut> Future for RequestFuture<P, Fut>
where
	P: Protocol,
	Fut: Future<Output = Result<P::ReqResult, P::ReqError>>,
{
	type Output = P::Response;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.project();
		let result = ready!(this.fut.poll(cx));
		let id = this.id.take().expect("Future is consumed");
		Poll::Ready(match result {
			Ok(v) => P::response_ok(id, v),
			Err(e) => P::response_err(id, e),
		})
	}
}
