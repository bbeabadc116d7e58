//! Length-prefixed postcard framing for [`keyhost_rpc`].

use std::io::{Error as IoError, ErrorKind};

use keyhost_rpc::{Inbound, Protocol};
use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::types::{ErrorCode, ErrorResponse, IpcFrame, Request, RequestId, Response, ResponsePayload};

/// Largest frame accepted unless configured otherwise (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Import protocol binding: `u32` little-endian length, then a postcard [`IpcFrame`].
#[derive(Debug, Clone, Copy)]
pub struct ImportProtocol {
	max_frame_len: usize,
}

impl ImportProtocol {
	/// Creates a protocol instance with the default frame limit.
	#[must_use]
	pub const fn new() -> Self {
		Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
	}

	/// Creates a protocol instance rejecting frames larger than `max_frame_len` bytes.
	#[must_use]
	pub const fn with_max_frame_len(max_frame_len: usize) -> Self {
		Self { max_frame_len }
	}

	/// Returns the configured frame limit.
	#[must_use]
	pub const fn max_frame_len(&self) -> usize {
		self.max_frame_len
	}

	/// Reads one frame.
	///
	/// # Errors
	///
	/// Returns `UnexpectedEof` on disconnect and `InvalidData` for oversized or
	/// undecodable frames.
	pub async fn read_frame(&self, input: &mut (impl AsyncBufRead + Unpin + Send)) -> std::io::Result<IpcFrame> {
		let len = input.read_u32_le().await? as usize;
		if len > self.max_frame_len {
			return Err(IoError::new(
				ErrorKind::InvalidData,
				format!("frame of {len} bytes exceeds limit of {}", self.max_frame_len),
			));
		}
		let mut buf = vec![0u8; len];
		input.read_exact(&mut buf).await?;
		postcard::from_bytes(&buf).map_err(|e| IoError::new(ErrorKind::InvalidData, e.to_string()))
	}

	/// Writes one frame and flushes.
	///
	/// # Errors
	///
	/// Returns `InvalidData` if the frame cannot be encoded or exceeds the limit.
	pub async fn write_frame(&self, output: &mut (impl AsyncWrite + Unpin + Send), frame: &IpcFrame) -> std::io::Result<()> {
		let buf = self.encode(frame)?;
		Self::write_encoded(output, &buf).await
	}

	/// Encodes `frame`, failing before any byte is written when it exceeds the limit.
	fn encode(&self, frame: &IpcFrame) -> std::io::Result<Vec<u8>> {
		let buf = postcard::to_allocvec(frame).map_err(|e| IoError::new(ErrorKind::InvalidData, e.to_string()))?;
		if buf.len() > self.max_frame_len {
			return Err(IoError::new(
				ErrorKind::InvalidData,
				format!("frame of {} bytes exceeds limit of {}", buf.len(), self.max_frame_len),
			));
		}
		Ok(buf)
	}

	async fn write_encoded(output: &mut (impl AsyncWrite + Unpin + Send), buf: &[u8]) -> std::io::Result<()> {
		output.write_u32_le(buf.len() as u32).await?;
		output.write_all(buf).await?;
		output.flush().await
	}
}

/// Error frame answering `request_id` in place of a response that could not be framed.
fn undeliverable(request_id: RequestId, err: &IoError) -> IpcFrame {
	IpcFrame::Response(Response {
		request_id,
		payload: None,
		error: Some(ErrorResponse {
			code: ErrorCode::Internal,
			message: format!("response could not be sent: {err}"),
		}),
	})
}

impl Default for ImportProtocol {
	fn default() -> Self {
		Self::new()
	}
}

impl Protocol for ImportProtocol {
	type Id = RequestId;
	type Message = IpcFrame;
	type Request = Request;
	type Response = Response;
	type ReqResult = ResponsePayload;
	type ReqError = ErrorResponse;
	type LoopError = IoError;

	async fn read_message(&self, input: &mut (impl AsyncBufRead + Unpin + Send)) -> std::io::Result<IpcFrame> {
		self.read_frame(input).await
	}

	/// A response that cannot be framed, e.g. one over the frame limit, is
	/// replaced by a call-level error so the connection and its other calls
	/// survive.
	async fn write_message(&self, output: &mut (impl AsyncWrite + Unpin + Send), msg: &IpcFrame) -> std::io::Result<()> {
		match (self.encode(msg), msg) {
			(Ok(buf), _) => Self::write_encoded(output, &buf).await,
			(Err(e), IpcFrame::Response(resp)) => {
				warn!(request_id = resp.request_id.0, error = %e, "response replaced by error");
				self.write_frame(output, &undeliverable(resp.request_id, &e)).await
			}
			(Err(e), IpcFrame::Request(_)) => Err(e),
		}
	}

	fn split_inbound(msg: IpcFrame) -> Inbound<Request, Response> {
		match msg {
			IpcFrame::Request(req) => Inbound::Request(req),
			IpcFrame::Response(resp) => Inbound::Response(resp),
		}
	}

	fn request_id(req: &Request) -> RequestId {
		req.id
	}

	fn wrap_response(resp: Response) -> IpcFrame {
		IpcFrame::Response(resp)
	}

	fn response_ok(id: RequestId, result: ResponsePayload) -> Response {
		Response {
			request_id: id,
			payload: Some(result),
			error: None,
		}
	}

	fn response_err(id: RequestId, error: ErrorResponse) -> Response {
		Response {
			request_id: id,
			payload: None,
			error: Some(error),
		}
	}

	fn is_disconnect(err: &IoError) -> bool {
		matches!(
			err.kind(),
			ErrorKind::UnexpectedEof | ErrorKind::BrokenPipe | ErrorKind::ConnectionReset
		)
	}
}
