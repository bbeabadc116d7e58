//! Protocol abstraction for wire formats and message semantics.

use std::fmt::Debug;

use tokio::io::{AsyncBufRead, AsyncWrite};

/// Classification of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<Req, Resp> {
	/// An incoming request.
	Request(Req),
	/// An incoming response. Servers never originate requests, so these are dropped.
	Response(Resp),
}

/// Protocol binding between the generic pump and a concrete message format.
///
/// Framing methods take `&self` so the pump can keep a reader and a writer
/// alive at the same time; per-connection state belongs in the service.
pub trait Protocol: Clone + Send + Sync + 'static {
	/// Identifier type for requests/responses.
	type Id: Clone + Debug + Send + 'static;

	/// The wire message type.
	type Message: Send + 'static;

	/// Request message type.
	type Request: Send + 'static;

	/// Response message type.
	type Response: Send + 'static;

	/// Successful result type from request handlers.
	type ReqResult: Send + 'static;

	/// Error type from request handlers.
	type ReqError: Send + 'static;

	/// Error type for IO/codec/protocol violations in the loop.
	type LoopError: From<std::io::Error> + std::fmt::Display + Send + 'static;

	/// Read a complete message from the input stream.
	fn read_message(
		&self,
		input: &mut (impl AsyncBufRead + Unpin + Send),
	) -> impl std::future::Future<Output = std::result::Result<Self::Message, Self::LoopError>> + Send;

	/// Write a message to the output stream.
	fn write_message(
		&self,
		output: &mut (impl AsyncWrite + Unpin + Send),
		msg: &Self::Message,
	) -> impl std::future::Future<Output = std::result::Result<(), Self::LoopError>> + Send;

	/// Classify an inbound message.
	fn split_inbound(msg: Self::Message) -> Inbound<Self::Request, Self::Response>;

	/// Get the ID from a request.
	fn request_id(req: &Self::Request) -> Self::Id;

	/// Wrap a response into a wire message.
	fn wrap_response(resp: Self::Response) -> Self::Message;

	/// Create a successful response message.
	fn response_ok(id: Self::Id, result: Self::ReqResult) -> Self::Response;

	/// Create an error response.
	fn response_err(id: Self::Id, error: Self::ReqError) -> Self::Response;

	/// Returns true if the loop error represents a clean disconnect.
	fn is_disconnect(_err: &Self::LoopError) -> bool {
		false
	}
}
