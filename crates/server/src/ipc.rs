//! IPC serving over Unix domain sockets and stdio.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use keyhost_proto::ImportProtocol;
use keyhost_rpc::MainLoop;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::server::ImportServer;
use crate::service::ImportService;

/// Serve the import protocol on a Unix domain socket until `shutdown` fires.
///
/// Every connection shares `server`. On shutdown the listener stops
/// accepting, open connections stop reading and answer their in-flight
/// calls, and only once they are gone is every live instance closed and the
/// socket file removed.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound or if filesystem operations
/// on the socket path fail.
pub async fn serve(
	socket_path: impl AsRef<Path>,
	server: Arc<ImportServer>,
	protocol: ImportProtocol,
	shutdown: CancellationToken,
) -> std::io::Result<()> {
	let path = socket_path.as_ref();
	if path.exists() {
		tokio::fs::remove_file(path).await?;
	}

	let listener = UnixListener::bind(path)?;
	tracing::info!(path = %path.display(), "import server listening");

	let connections = TaskTracker::new();
	loop {
		tokio::select! {
			_ = shutdown.cancelled() => {
				tracing::info!(open = connections.len(), "import server shutting down");
				break;
			}
			res = listener.accept() => {
				match res {
					Ok((stream, _addr)) => {
						connections.spawn(handle_connection(stream, server.clone(), protocol, shutdown.child_token()));
					}
					Err(e) => {
						tracing::error!(error = %e, "failed to accept connection");
					}
				}
			}
		}
	}

	drop(listener);
	connections.close();
	connections.wait().await;

	server.shutdown().await;
	if let Err(e) = tokio::fs::remove_file(path).await {
		tracing::debug!(error = %e, "socket file already gone");
	}
	Ok(())
}

/// Serve a single host over stdin/stdout, closing every instance when it disconnects.
///
/// # Errors
///
/// Returns an error when the stream fails for a reason other than disconnect.
pub async fn serve_stdio(server: Arc<ImportServer>, protocol: ImportProtocol) -> std::io::Result<()> {
	let result = run_connection(
		tokio::io::stdin(),
		tokio::io::stdout(),
		server.clone(),
		protocol,
		std::future::pending(),
	)
	.await;
	server.shutdown().await;
	result
}

/// Handle a single IPC connection from a host until it disconnects or `shutdown` fires.
pub(crate) async fn handle_connection(
	stream: UnixStream,
	server: Arc<ImportServer>,
	protocol: ImportProtocol,
	shutdown: CancellationToken,
) {
	tracing::info!("new import connection");

	let (reader, writer) = stream.into_split();
	if let Err(e) = run_connection(reader, writer, server, protocol, shutdown.cancelled_owned()).await {
		tracing::error!(error = %e, "import connection error");
	}

	tracing::info!("import connection closed");
}

async fn run_connection(
	reader: impl AsyncRead + Unpin + Send,
	writer: impl AsyncWrite + Unpin + Send,
	server: Arc<ImportServer>,
	protocol: ImportProtocol,
	shutdown: impl Future<Output = ()> + Send,
) -> std::io::Result<()> {
	let main_loop = MainLoop::new(protocol, ImportService::new(server));
	main_loop.run_until(BufReader::new(reader), writer, shutdown).await
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use async_trait::async_trait;
	use keyhost_proto::{
		ErrorCode, InstanceId, IpcFrame, Request, RequestId, RequestPayload, Response, ResponsePayload,
		WireGetRequest, WireKey, WireMapEntry, WireValue,
	};
	use keyhost_sdk::{GetReq, GetResult, Import, Map, Value};
	use pretty_assertions::assert_eq;

	use super::*;

	/// Returns the configured `greeting`, repeated `repeat` times, for every key.
	#[derive(Default)]
	struct Greeter {
		greeting: String,
	}

	#[async_trait]
	impl Import for Greeter {
		async fn configure(&mut self, config: Map) -> keyhost_sdk::Result<()> {
			self.greeting = config
				.get("greeting")
				.and_then(Value::as_str)
				.ok_or_else(|| keyhost_sdk::Error::Config("greeting is required".into()))?
				.repeat(config.get("repeat").and_then(Value::as_i64).unwrap_or(1).max(0) as usize);
			Ok(())
		}

		async fn get(&self, reqs: Vec<GetReq>) -> keyhost_sdk::Result<Vec<GetResult>> {
			Ok(reqs
				.iter()
				.map(|req| GetResult::for_request(req, Value::from(self.greeting.as_str())))
				.collect())
		}
	}

	fn test_server() -> Arc<ImportServer> {
		Arc::new(ImportServer::new(Arc::new(|| Box::new(Greeter::default()) as Box<dyn Import>)))
	}

	async fn roundtrip(stream: &mut UnixStream, id: u64, payload: RequestPayload) -> std::io::Result<Response> {
		let protocol = ImportProtocol::new();
		protocol
			.write_frame(stream, &IpcFrame::Request(Request::new(id, payload)))
			.await?;
		let mut reader = BufReader::new(&mut *stream);
		match protocol.read_frame(&mut reader).await? {
			IpcFrame::Response(resp) => Ok(resp),
			other => panic!("expected response frame, got {other:?}"),
		}
	}

	fn greeting(text: &str) -> WireValue {
		WireValue::Map(vec![WireMapEntry::new("greeting", WireValue::String(text.into()))])
	}

	#[tokio::test]
	async fn ping_roundtrip() -> std::io::Result<()> {
		let (mut client, server_stream) = UnixStream::pair()?;
		let server_task = tokio::spawn(handle_connection(server_stream, test_server(), ImportProtocol::new(), CancellationToken::new()));

		let resp = roundtrip(&mut client, 1, RequestPayload::Ping).await?;
		assert_eq!(resp.request_id, RequestId(1));
		assert_eq!(resp.payload, Some(ResponsePayload::Pong));
		assert!(resp.error.is_none());

		drop(client);
		server_task.await.expect("server task panicked");
		Ok(())
	}

	#[tokio::test]
	async fn configure_get_close_over_the_wire() -> std::io::Result<()> {
		let (mut client, server_stream) = UnixStream::pair()?;
		let server = test_server();
		let server_task = tokio::spawn(handle_connection(server_stream, server.clone(), ImportProtocol::new(), CancellationToken::new()));

		let resp = roundtrip(&mut client, 1, RequestPayload::Configure { config: greeting("hi") }).await?;
		assert_eq!(
			resp.payload,
			Some(ResponsePayload::Configured {
				instance_id: InstanceId(1)
			})
		);

		let requests = vec![WireGetRequest {
			instance_id: InstanceId(1),
			exec_id: "e".into(),
			exec_deadline: 0,
			key_id: "k".into(),
			keys: vec![WireKey::new("anything")],
		}];
		let resp = roundtrip(&mut client, 2, RequestPayload::Get { requests: requests.clone() }).await?;
		match resp.payload {
			Some(ResponsePayload::Got { responses }) => {
				assert_eq!(responses.len(), 1);
				assert_eq!(responses[0].value, WireValue::String("hi".into()));
				assert_eq!(responses[0].keys, vec!["anything".to_string()]);
			}
			other => panic!("unexpected payload: {other:?}"),
		}

		let resp = roundtrip(
			&mut client,
			3,
			RequestPayload::Close {
				instance_id: InstanceId(1),
			},
		)
		.await?;
		assert_eq!(resp.payload, Some(ResponsePayload::Closed));

		let resp = roundtrip(&mut client, 4, RequestPayload::Get { requests }).await?;
		assert!(resp.payload.is_none());
		assert_eq!(resp.error.map(|e| e.code), Some(ErrorCode::UnknownInstance));

		drop(client);
		server_task.await.expect("server task panicked");
		assert!(server.registry().is_empty());
		Ok(())
	}

	#[tokio::test]
	async fn plugin_config_error_is_call_level() -> std::io::Result<()> {
		let (mut client, server_stream) = UnixStream::pair()?;
		let server = test_server();
		let server_task = tokio::spawn(handle_connection(server_stream, server.clone(), ImportProtocol::new(), CancellationToken::new()));

		let resp = roundtrip(
			&mut client,
			1,
			RequestPayload::Configure {
				config: WireValue::Map(Vec::new()),
			},
		)
		.await?;
		assert!(resp.payload.is_none());
		let err = resp.error.expect("configure must fail");
		assert_eq!(err.code, ErrorCode::PluginConfig);
		assert_eq!(err.message, "invalid configuration: greeting is required");
		assert!(server.registry().is_empty());

		drop(client);
		server_task.await.expect("server task panicked");
		Ok(())
	}

	#[tokio::test]
	async fn instances_are_shared_across_connections() -> std::io::Result<()> {
		let server = test_server();
		let (mut first, first_stream) = UnixStream::pair()?;
		let (mut second, second_stream) = UnixStream::pair()?;
		let first_task = tokio::spawn(handle_connection(first_stream, server.clone(), ImportProtocol::new(), CancellationToken::new()));
		let second_task = tokio::spawn(handle_connection(second_stream, server.clone(), ImportProtocol::new(), CancellationToken::new()));

		roundtrip(&mut first, 1, RequestPayload::Configure { config: greeting("shared") }).await?;
		let resp = roundtrip(
			&mut second,
			1,
			RequestPayload::Close {
				instance_id: InstanceId(1),
			},
		)
		.await?;
		assert_eq!(resp.payload, Some(ResponsePayload::Closed));
		assert!(server.registry().is_empty());

		drop(first);
		drop(second);
		first_task.await.expect("server task panicked");
		second_task.await.expect("server task panicked");
		Ok(())
	}

	#[tokio::test]
	async fn disconnect_during_write_is_clean() -> std::io::Result<()> {
		let (mut client, server_stream) = UnixStream::pair()?;
		let server_task = tokio::spawn(handle_connection(server_stream, test_server(), ImportProtocol::new(), CancellationToken::new()));

		ImportProtocol::new()
			.write_frame(&mut client, &IpcFrame::Request(Request::new(9, RequestPayload::Ping)))
			.await?;

		// Drop immediately: server will attempt to write the response into a closed socket.
		drop(client);

		server_task.await.expect("server task panicked");
		Ok(())
	}

	#[tokio::test]
	async fn oversized_result_is_a_call_error() -> std::io::Result<()> {
		let (mut client, server_stream) = UnixStream::pair()?;
		let protocol = ImportProtocol::with_max_frame_len(512);
		let server_task = tokio::spawn(handle_connection(server_stream, test_server(), protocol, CancellationToken::new()));

		let config = WireValue::Map(vec![
			WireMapEntry::new("greeting", WireValue::String("hello ".into())),
			WireMapEntry::new("repeat", WireValue::Int(200)),
		]);
		let resp = roundtrip(&mut client, 1, RequestPayload::Configure { config }).await?;
		assert_eq!(
			resp.payload,
			Some(ResponsePayload::Configured {
				instance_id: InstanceId(1)
			})
		);

		let requests = vec![WireGetRequest {
			instance_id: InstanceId(1),
			exec_id: "e".into(),
			exec_deadline: 0,
			key_id: "k".into(),
			keys: vec![WireKey::new("big")],
		}];
		let resp = roundtrip(&mut client, 2, RequestPayload::Get { requests }).await?;
		assert_eq!(resp.request_id, RequestId(2));
		assert!(resp.payload.is_none());
		assert_eq!(resp.error.map(|e| e.code), Some(ErrorCode::Internal));

		// The connection survives the failed call.
		let resp = roundtrip(&mut client, 3, RequestPayload::Ping).await?;
		assert_eq!(resp.payload, Some(ResponsePayload::Pong));

		drop(client);
		server_task.await.expect("server task panicked");
		Ok(())
	}

	#[tokio::test]
	async fn shutdown_waits_for_open_connections() -> std::io::Result<()> {
		let dir = tempfile::tempdir()?;
		let socket_path = dir.path().join("keyhost.sock");
		let server = test_server();
		let shutdown = CancellationToken::new();

		let serve_task = tokio::spawn(serve(
			socket_path.clone(),
			server.clone(),
			ImportProtocol::new(),
			shutdown.clone(),
		));
		let mut client = loop {
			match UnixStream::connect(&socket_path).await {
				Ok(stream) => break stream,
				Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
			}
		};
		roundtrip(&mut client, 1, RequestPayload::Configure { config: greeting("first") }).await?;

		// The client keeps its socket open across shutdown.
		shutdown.cancel();
		serve_task.await.expect("serve task panicked")?;
		assert!(server.registry().is_empty());

		let late = roundtrip(&mut client, 2, RequestPayload::Configure { config: greeting("late") }).await;
		assert!(late.is_err(), "connection must be closed after shutdown: {late:?}");
		assert!(server.registry().is_empty(), "no instance outlives shutdown");
		Ok(())
	}

	#[tokio::test]
	async fn serve_accepts_and_shuts_down() -> std::io::Result<()> {
		let dir = tempfile::tempdir()?;
		let socket_path = dir.path().join("keyhost.sock");
		let server = test_server();
		let shutdown = CancellationToken::new();

		let serve_task = tokio::spawn(serve(
			socket_path.clone(),
			server.clone(),
			ImportProtocol::new(),
			shutdown.clone(),
		));

		let mut client = loop {
			match UnixStream::connect(&socket_path).await {
				Ok(stream) => break stream,
				Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
			}
		};
		roundtrip(&mut client, 1, RequestPayload::Configure { config: greeting("bye") }).await?;
		assert_eq!(server.registry().len(), 1);

		shutdown.cancel();
		serve_task.await.expect("serve task panicked")?;

		assert!(server.registry().is_empty(), "shutdown closes live instances");
		assert!(!socket_path.exists());
		Ok(())
	}
}
