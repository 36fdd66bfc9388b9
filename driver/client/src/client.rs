//! Cloneable client handle.
//!
//! `Client` is a thin sender over the driver task's op channel. Handles
//! are cheap to clone and share; every handle talks to the same
//! connection, the same request-id counter, and the same event stream.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use bytes::Bytes;
use rmpv::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

use tnt_wire::RequestCode;

use crate::config::Config;
use crate::connection::{Connection, Op};
use crate::error::DriverError;

const EVENT_CAPACITY: usize = 64;

/// Connection lifecycle notifications.
///
/// Delivered over a broadcast channel; slow subscribers lose the oldest
/// events rather than blocking the driver task.
#[derive(Debug, Clone)]
pub enum Event {
    /// A transport was established and (when configured) authenticated.
    Connected {
        /// Host of the endpoint that accepted the connection.
        host: String,
        /// Port of the endpoint that accepted the connection.
        port: u16,
    },
    /// A transport or protocol error occurred.
    Error(DriverError),
    /// The transport closed, either by request or by failure.
    Closed,
}

/// Handle to a driver connection.
#[derive(Clone)]
pub struct Client {
    ops: mpsc::UnboundedSender<Op>,
    pub(crate) ids: Arc<AtomicU32>,
    events: broadcast::Sender<Event>,
}

impl Client {
    /// Spawn the driver task for `config` and return a handle to it.
    ///
    /// Unless [`Config::lazy_connect`] is set, the connect cycle starts
    /// immediately in the background; await [`Client::connect`] to
    /// observe its outcome.
    pub fn new(config: Config) -> Result<Self, DriverError> {
        let endpoints = config.endpoints()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let ids = Arc::new(AtomicU32::new(0));
        let lazy = config.lazy_connect;

        let connection = Connection::new(config, endpoints, events.clone(), ids.clone());
        tokio::spawn(connection.run(ops_rx));

        let client = Self {
            ops: ops_tx,
            ids,
            events,
        };
        if !lazy {
            let (reply, _) = oneshot::channel();
            let _ = client.ops.send(Op::Connect { reply });
        }
        Ok(client)
    }

    /// Connect using `addr` in `[user[:pass]@]host[:port]` form.
    pub fn from_addr(addr: &str) -> Result<Self, DriverError> {
        Self::new(Config::from_addr(addr)?)
    }

    /// Wait until the connection is ready, starting a connect cycle if
    /// none is in flight.
    pub async fn connect(&self) -> Result<(), DriverError> {
        let (reply, rx) = oneshot::channel();
        self.ops
            .send(Op::Connect { reply })
            .map_err(|_| DriverError::ConnectionClosed)?;
        rx.await.map_err(|_| DriverError::ConnectionClosed)?
    }

    /// Close the connection, rejecting every pending request.
    pub async fn disconnect(&self) -> Result<(), DriverError> {
        let (reply, rx) = oneshot::channel();
        self.ops
            .send(Op::Disconnect { reply })
            .map_err(|_| DriverError::ConnectionClosed)?;
        rx.await.map_err(|_| DriverError::ConnectionClosed)
    }

    /// Subscribe to connection lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Submit an encoded request and await its correlated response.
    pub(crate) async fn issue(
        &self,
        code: RequestCode,
        sync: u32,
        frame: Bytes,
    ) -> Result<Value, DriverError> {
        let (reply, rx) = oneshot::channel();
        self.ops
            .send(Op::Request {
                code,
                sync,
                frame,
                reply,
            })
            .map_err(|_| DriverError::ConnectionClosed)?;
        rx.await.map_err(|_| DriverError::ConnectionClosed)?
    }

    pub(crate) async fn cached_space_id(&self, name: &str) -> Option<u32> {
        let (reply, rx) = oneshot::channel();
        self.ops
            .send(Op::SpaceLookup {
                name: name.to_string(),
                reply,
            })
            .ok()?;
        rx.await.ok().flatten()
    }

    pub(crate) async fn cached_index_id(&self, space_id: u32, name: &str) -> Option<u32> {
        let (reply, rx) = oneshot::channel();
        self.ops
            .send(Op::IndexLookup {
                space_id,
                name: name.to_string(),
                reply,
            })
            .ok()?;
        rx.await.ok().flatten()
    }

    pub(crate) fn store_space(&self, name: &str, id: u32) {
        let _ = self.ops.send(Op::StoreSpace {
            name: name.to_string(),
            id,
        });
    }

    pub(crate) fn store_index(&self, space_id: u32, name: &str, id: u32) {
        let _ = self.ops.send(Op::StoreIndex {
            space_id,
            name: name.to_string(),
            id,
        });
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connected_ops_channel", &!self.ops.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use tnt_wire::constants::body_key;
    use tnt_wire::{decode_request, encode_response, ReadBuffer, GREETING_SIZE, SALT_LEN};

    const TEST_SALT: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";

    fn greeting() -> [u8; GREETING_SIZE] {
        let mut banner = [b' '; GREETING_SIZE];
        banner[..16].copy_from_slice(b"tuple-store 1.0 ");
        banner[63] = b'\n';
        banner[64..64 + SALT_LEN].copy_from_slice(TEST_SALT.as_bytes());
        banner[127] = b'\n';
        banner
    }

    fn test_config(addr: SocketAddr) -> Config {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        Config {
            host: addr.ip().to_string(),
            port: addr.port(),
            lazy_connect: true,
            ..Config::default()
        }
    }

    fn ok_response(sync: u32, schema_id: u32, data: Option<Value>) -> Bytes {
        encode_response(sync, 0, schema_id, data, None).unwrap()
    }

    fn body_field(body: &Option<Value>, key: u64) -> Option<Value> {
        let Some(Value::Map(entries)) = body.as_ref() else {
            return None;
        };
        entries
            .iter()
            .find(|(k, _)| k.as_u64() == Some(key))
            .map(|(_, v)| v.clone())
    }

    /// Accept one connection, greet it, then answer every decoded
    /// request through `handler`.
    async fn mock_server<F>(mut handler: F) -> (SocketAddr, JoinHandle<()>)
    where
        F: FnMut(RequestCode, u32, Option<Value>) -> Option<Bytes> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&greeting()).await.unwrap();
            let mut buffer = ReadBuffer::new();
            let mut scratch = [0u8; 4096];
            loop {
                let n = match socket.read(&mut scratch).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                buffer.append(&scratch[..n]);
                while let Some(frame) = buffer.try_take_frame().unwrap() {
                    let (code, sync, body) = decode_request(&frame).unwrap();
                    if let Some(reply) = handler(code, sync, body) {
                        if socket.write_all(&reply).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        (addr, task)
    }

    #[tokio::test]
    async fn test_ping_round_trip() {
        let (addr, _server) =
            mock_server(|_, sync, _| Some(ok_response(sync, 1, None))).await;
        let client = Client::new(test_config(addr)).unwrap();
        client.connect().await.unwrap();
        assert!(client.ping().await.unwrap());
    }

    #[tokio::test]
    async fn test_lazy_connect_on_first_command() {
        let (addr, _server) =
            mock_server(|_, sync, _| Some(ok_response(sync, 1, None))).await;
        let client = Client::new(test_config(addr)).unwrap();
        // No explicit connect; the first command brings the link up.
        assert!(client.ping().await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_while_ready_is_rejected() {
        let (addr, _server) =
            mock_server(|_, sync, _| Some(ok_response(sync, 1, None))).await;
        let client = Client::new(test_config(addr)).unwrap();
        client.connect().await.unwrap();
        assert!(matches!(
            client.connect().await,
            Err(DriverError::AlreadyConnecting)
        ));
    }

    #[tokio::test]
    async fn test_responses_correlate_out_of_order() {
        // Hold both requests, then answer them in reverse order inside a
        // single write so frame splitting is exercised too.
        let mut held: Vec<(u32, String)> = Vec::new();
        let (addr, _server) = mock_server(move |_, sync, body| {
            let name = body_field(&body, body_key::FUNCTION_NAME)?
                .as_str()?
                .to_string();
            held.push((sync, name));
            if held.len() < 2 {
                return None;
            }
            let mut batch = Vec::new();
            for (sync, name) in held.drain(..).rev() {
                let data = Value::Array(vec![Value::from(name)]);
                batch.extend_from_slice(&ok_response(sync, 1, Some(data)));
            }
            Some(Bytes::from(batch))
        })
        .await;

        let client = Client::new(test_config(addr)).unwrap();
        client.connect().await.unwrap();
        let (alpha, beta) = tokio::join!(
            client.call("alpha", Value::Nil),
            client.call("beta", Value::Nil),
        );
        assert_eq!(
            alpha.unwrap(),
            Value::Array(vec![Value::from("alpha")])
        );
        assert_eq!(beta.unwrap(), Value::Array(vec![Value::from("beta")]));
    }

    #[tokio::test]
    async fn test_auth_round_trip() {
        let expected = tnt_wire::scramble("sesame", TEST_SALT).unwrap();
        let (addr, _server) = mock_server(move |code, sync, body| {
            if code == RequestCode::Auth {
                let username = body_field(&body, body_key::USERNAME)?;
                assert_eq!(username.as_str(), Some("notguest"));
                let tuple = body_field(&body, body_key::TUPLE)?;
                let parts = tuple.as_array()?;
                assert_eq!(parts[0].as_str(), Some("chap-sha1"));
                assert_eq!(parts[1].as_slice(), Some(expected.as_slice()));
            }
            Some(ok_response(sync, 1, None))
        })
        .await;

        let mut config = test_config(addr);
        config.username = Some("notguest".to_string());
        config.password = Some("sesame".to_string());
        let client = Client::new(config).unwrap();
        client.connect().await.unwrap();
        assert!(client.ping().await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_password_is_not_retried() {
        let expected = tnt_wire::scramble("sesame", TEST_SALT).unwrap();
        let (addr, _server) = mock_server(move |code, sync, body| {
            assert_eq!(code, RequestCode::Auth);
            let tuple = body_field(&body, body_key::TUPLE)?;
            let scramble = tuple.as_array()?[1].as_slice()?.to_vec();
            assert_ne!(scramble, expected);
            Some(
                encode_response(
                    sync,
                    0x8000 | 47,
                    1,
                    None,
                    Some("Incorrect password supplied for user"),
                )
                .unwrap(),
            )
        })
        .await;

        let mut config = test_config(addr);
        config.username = Some("notguest".to_string());
        config.password = Some("open-says-me".to_string());
        // Would retry forever on transport loss; a rejected handshake
        // must close instead of consulting the strategy.
        config.retry_strategy = Some(Arc::new(|_| Some(Duration::from_millis(1))));
        let client = Client::new(config).unwrap();
        assert!(matches!(
            client.connect().await,
            Err(DriverError::AuthenticationFailed(_))
        ));
        assert!(matches!(
            client.ping().await,
            Err(DriverError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_retry_exhaustion_closes_connection() {
        // Reserve a port no server is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = test_config(addr);
        config.retry_strategy = Some(Arc::new(|attempt| {
            (attempt < 3).then(|| Duration::from_millis(5))
        }));
        let client = Client::new(config).unwrap();
        assert!(matches!(
            client.connect().await,
            Err(DriverError::ConnectionClosed)
        ));
        assert!(matches!(
            client.ping().await,
            Err(DriverError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_offline_queue_replays_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = test_config(addr);
        config.retry_strategy = Some(Arc::new(|_| Some(Duration::from_millis(20))));
        let client = Client::new(config).unwrap();

        // The server comes up only after the first attempts have failed
        // and the calls below are parked on the offline queue.
        let server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            let listener = TcpListener::bind(addr).await.unwrap();
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&greeting()).await.unwrap();
            let mut buffer = ReadBuffer::new();
            let mut scratch = [0u8; 4096];
            let mut order = Vec::new();
            while order.len() < 3 {
                let n = socket.read(&mut scratch).await.unwrap();
                buffer.append(&scratch[..n]);
                while let Some(frame) = buffer.try_take_frame().unwrap() {
                    let (_, sync, body) = decode_request(&frame).unwrap();
                    let name = body_field(&body, body_key::FUNCTION_NAME)
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap();
                    order.push(name);
                    socket
                        .write_all(&ok_response(sync, 1, None))
                        .await
                        .unwrap();
                }
            }
            order
        });

        let (a, b, c) = tokio::join!(
            client.call("first", Value::Nil),
            client.call("second", Value::Nil),
            client.call("third", Value::Nil),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();
        assert_eq!(server.await.unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_symbolic_names_resolve_and_cache() {
        let lookups = Arc::new(AtomicU32::new(0));
        let seen = lookups.clone();
        let (addr, _server) = mock_server(move |code, sync, body| {
            if code == RequestCode::Select {
                let space = body_field(&body, body_key::SPACE_ID)?.as_u64()?;
                if space == u64::from(tnt_wire::system::SPACE_SPACE) {
                    seen.fetch_add(1, Ordering::SeqCst);
                    let row = Value::Array(vec![Value::from(512u32), Value::from("users")]);
                    return Some(ok_response(sync, 1, Some(Value::Array(vec![row]))));
                }
                if space == u64::from(tnt_wire::system::SPACE_INDEX) {
                    let row = Value::Array(vec![
                        Value::from(512u32),
                        Value::from(1u32),
                        Value::from("name"),
                    ]);
                    return Some(ok_response(sync, 1, Some(Value::Array(vec![row]))));
                }
            }
            Some(ok_response(sync, 1, None))
        })
        .await;

        let client = Client::new(test_config(addr)).unwrap();
        client.connect().await.unwrap();
        client
            .select("users", "name", 1, 0, tnt_wire::IteratorType::Eq, Value::from(1))
            .await
            .unwrap();
        client
            .select("users", "name", 1, 0, tnt_wire::IteratorType::Eq, Value::from(2))
            .await
            .unwrap();
        // Second select reuses the cached ids.
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_schema_change_forces_name_re_resolution() {
        let lookups = Arc::new(AtomicU32::new(0));
        let seen = lookups.clone();
        let mut replies: u32 = 0;
        let (addr, _server) = mock_server(move |code, sync, body| {
            // Bump the schema version from the third reply onwards.
            replies += 1;
            let schema_id = if replies >= 3 { 2 } else { 1 };
            if code == RequestCode::Select {
                let space = body_field(&body, body_key::SPACE_ID)?.as_u64()?;
                if space == u64::from(tnt_wire::system::SPACE_SPACE) {
                    seen.fetch_add(1, Ordering::SeqCst);
                    let row = Value::Array(vec![Value::from(512u32), Value::from("users")]);
                    return Some(ok_response(sync, schema_id, Some(Value::Array(vec![row]))));
                }
            }
            Some(ok_response(sync, schema_id, None))
        })
        .await;

        let client = Client::new(test_config(addr)).unwrap();
        client.connect().await.unwrap();
        let row = Value::Array(vec![Value::from(1), Value::from("a")]);
        client.insert("users", row.clone()).await.unwrap(); // lookup + insert
        client.insert("users", row.clone()).await.unwrap(); // cached; reply bumps schema
        client.insert("users", row).await.unwrap(); // must resolve again
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disconnect_closes_and_rejects_later_requests() {
        let (addr, _server) =
            mock_server(|_, sync, _| Some(ok_response(sync, 1, None))).await;
        let client = Client::new(test_config(addr)).unwrap();
        client.connect().await.unwrap();
        let mut events = client.subscribe();

        client.disconnect().await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), Event::Closed));
        assert!(matches!(
            client.ping().await,
            Err(DriverError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_connected_event_carries_endpoint() {
        let (addr, _server) =
            mock_server(|_, sync, _| Some(ok_response(sync, 1, None))).await;
        let client = Client::new(test_config(addr)).unwrap();
        let mut events = client.subscribe();
        client.connect().await.unwrap();

        match events.recv().await.unwrap() {
            Event::Connected { host, port } => {
                assert_eq!(host, addr.ip().to_string());
                assert_eq!(port, addr.port());
            }
            other => panic!("expected Connected, got {other:?}"),
        }
    }
}
