use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use lkv_client::{ClientConfig, ClientError, Connection, ConnectionState, KVClient, Payload};
use lkv_common::{DecodeError, PushNotification};

const STEP: Duration = Duration::from_secs(5);

/// Server side of a scripted connection.
struct Peer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Peer {
    async fn next_command(&mut self) -> Option<String> {
        let mut line = String::new();
        let bytes = self.reader.read_line(&mut line).await.expect("read");
        if bytes == 0 {
            return None;
        }
        Some(line.trim_end_matches('\n').to_string())
    }

    async fn expect(&mut self, command: &str) {
        let line = self.next_command().await.expect("client hung up");
        assert_eq!(line, command);
    }

    async fn write_raw(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.expect("write");
        self.writer.flush().await.expect("flush");
    }

    async fn reply(&mut self, line: &str) {
        self.write_raw(format!("{}\n", line).as_bytes()).await;
    }

    async fn push(&mut self, channel: &str, discriminant: i64, content: Value) {
        let line = PushNotification {
            channel: channel.to_string(),
            discriminant,
            content,
        }
        .to_line()
        .expect("push line");
        self.reply(&line).await;
    }

    /// Keeps the socket open until the client goes away.
    async fn wait_for_hangup(mut self) {
        while self.next_command().await.is_some() {}
    }
}

async fn spawn_peer<F, Fut>(script: F) -> (String, JoinHandle<()>)
where
    F: FnOnce(Peer) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let (read_half, write_half) = stream.into_split();
        script(Peer {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
        .await;
    });

    (addr, handle)
}

fn config_for(addr: String) -> ClientConfig {
    ClientConfig {
        connect_timeout: Some(Duration::from_secs(1)),
        ..ClientConfig::with_addr(addr)
    }
}

async fn client_for(addr: String) -> KVClient {
    KVClient::with_config(config_for(addr)).await.expect("client")
}

#[tokio::test]
async fn client_set_get_roundtrip() {
    let (addr, peer) = spawn_peer(|mut peer| async move {
        peer.expect("SET k 1").await;
        peer.reply("OK").await;
        peer.expect("GET missing").await;
        peer.reply("(nil)").await;
        peer.expect("SET greeting \"Hello, Redis!\"").await;
        peer.reply("OK").await;
        peer.expect("GET greeting").await;
        peer.reply("Hello, Redis!").await;
        peer.wait_for_hangup().await;
    })
    .await;

    let client = client_for(addr).await;
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.send("SET k 1\n").await.unwrap(), "OK");
    assert_eq!(client.get("missing").await.unwrap(), None);
    client.set("greeting", "Hello, Redis!").await.unwrap();
    assert_eq!(
        client.get("greeting").await.unwrap(),
        Some("Hello, Redis!".to_string())
    );

    client.close().await.unwrap();
    timeout(STEP, peer).await.unwrap().unwrap();
}

#[tokio::test]
async fn typed_commands_decode_responses() {
    let (addr, peer) = spawn_peer(|mut peer| async move {
        peer.expect("SET number 42").await;
        peer.reply("OK").await;
        peer.expect("LPUSH my_list first second").await;
        peer.reply("2").await;
        peer.expect("RPUSH my_list third fourth").await;
        peer.reply("4").await;
        peer.expect("LPOP my_list").await;
        peer.reply("second").await;
        peer.expect("RPOP empty").await;
        peer.reply("(nil)").await;
        peer.expect("SADD my_set apple banana apple cherry").await;
        peer.reply("3").await;
        peer.expect("SMEMBERS my_set").await;
        peer.reply("apple banana cherry").await;
        peer.expect("SMEMBERS nothing").await;
        peer.reply("(nil)").await;
        peer.expect("HSET user:1 age 30").await;
        peer.reply("OK").await;
        peer.expect("HGET user:1 age").await;
        peer.reply("30").await;
        peer.expect("HGET user:1 email").await;
        peer.reply("(nil)").await;
        peer.wait_for_hangup().await;
    })
    .await;

    let client = client_for(addr).await;
    client.set_int("number", 42).await.unwrap();
    assert_eq!(client.lpush("my_list", &["first", "second"]).await.unwrap(), 2);
    assert_eq!(client.rpush("my_list", &["third", "fourth"]).await.unwrap(), 4);
    assert_eq!(client.lpop("my_list").await.unwrap(), Some("second".to_string()));
    assert_eq!(client.rpop("empty").await.unwrap(), None);
    assert_eq!(
        client
            .sadd("my_set", &["apple", "banana", "apple", "cherry"])
            .await
            .unwrap(),
        3
    );
    assert_eq!(
        client.smembers("my_set").await.unwrap(),
        Some(vec![
            "apple".to_string(),
            "banana".to_string(),
            "cherry".to_string()
        ])
    );
    assert_eq!(client.smembers("nothing").await.unwrap(), None);
    client.hset("user:1", "age", "30").await.unwrap();
    assert_eq!(client.hget("user:1", "age").await.unwrap(), Some("30".to_string()));
    assert_eq!(client.hget("user:1", "email").await.unwrap(), None);

    client.close().await.unwrap();
    timeout(STEP, peer).await.unwrap().unwrap();
}

#[tokio::test]
async fn unexpected_responses_are_errors() {
    let (addr, _peer) = spawn_peer(|mut peer| async move {
        peer.expect("LPUSH list a").await;
        peer.reply("(nil)").await;
        peer.expect("HSET h f v").await;
        peer.reply("ERR wrong type").await;
        peer.wait_for_hangup().await;
    })
    .await;

    let client = client_for(addr).await;
    let err = client.lpush("list", &["a"]).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Decode(DecodeError::InvalidInteger(ref response)) if response == "(nil)"
    ));
    let err = client.hset("h", "f", "v").await.unwrap_err();
    assert!(matches!(err, ClientError::UnexpectedResponse { command: "HSET", .. }));

    let empty: [&str; 0] = [];
    assert!(matches!(
        client.rpush("list", &empty).await,
        Err(ClientError::InvalidCommand(_))
    ));
    client.close().await.unwrap();
}

#[tokio::test]
async fn sequential_commands_correlate_by_position() {
    const COMMANDS: usize = 50;
    let (addr, peer) = spawn_peer(|mut peer| async move {
        for idx in 0..COMMANDS {
            peer.expect(&format!("ECHO {}", idx)).await;
            peer.reply(&format!("reply-{}", idx)).await;
        }
        peer.wait_for_hangup().await;
    })
    .await;

    let client = client_for(addr).await;
    for idx in 0..COMMANDS {
        let response = client.send(&format!("ECHO {}", idx)).await.unwrap();
        assert_eq!(response, format!("reply-{}", idx));
    }
    client.close().await.unwrap();
    timeout(STEP, peer).await.unwrap().unwrap();
}

#[tokio::test]
async fn concurrent_callers_are_serialized() {
    let (addr, _peer) = spawn_peer(|mut peer| async move {
        while let Some(command) = peer.next_command().await {
            let arg = command.trim_start_matches("ECHO ").to_string();
            peer.reply(&arg).await;
        }
    })
    .await;

    let client = Arc::new(client_for(addr).await);
    let mut tasks = Vec::new();
    for idx in 0..16 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            for round in 0..8 {
                let token = format!("t{}-{}", idx, round);
                let response = client.send(&format!("ECHO {}", token)).await.unwrap();
                assert_eq!(response, token);
            }
        }));
    }
    for task in tasks {
        timeout(STEP, task).await.unwrap().unwrap();
    }
    client.close().await.unwrap();
}

#[tokio::test]
async fn push_reaches_callbacks_in_registration_order() {
    let (addr, _peer) = spawn_peer(|mut peer| async move {
        peer.expect("SUBSCRIBE news").await;
        peer.reply("OK").await;
        peer.expect("SUBSCRIBE news").await;
        peer.reply("OK").await;
        peer.expect("PUBLISH news hello").await;
        peer.push("news", 0, json!("hello")).await;
        peer.reply("OK").await;
        peer.wait_for_hangup().await;
    })
    .await;

    let client = client_for(addr).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    for id in 1..=2 {
        let seen = seen.clone();
        client
            .subscribe("news", move |payload: &Payload| {
                seen.lock().push((id, payload.clone()))
            })
            .await
            .unwrap();
    }
    assert_eq!(client.connection().subscriber_count("news"), 2);

    client.publish("news", "hello").await.unwrap();
    // The push line precedes the acknowledgement, so both callbacks have run.
    assert_eq!(
        *seen.lock(),
        vec![
            (1, Payload::Text("hello".to_string())),
            (2, Payload::Text("hello".to_string())),
        ]
    );
    client.close().await.unwrap();
}

#[tokio::test]
async fn binary_payload_round_trips() {
    let (addr, _peer) = spawn_peer(|mut peer| async move {
        peer.expect("SUBSCRIBE bin").await;
        peer.reply("OK").await;

        let command = peer.next_command().await.expect("publish");
        let encoded = command.strip_prefix("PUBLISH_BIN bin ").expect("verb");
        let bytes = STANDARD.decode(encoded).expect("base64");
        peer.push("bin", 2, json!(bytes)).await;
        peer.reply("OK").await;
        peer.wait_for_hangup().await;
    })
    .await;

    let client = client_for(addr).await;
    let received = Arc::new(Mutex::new(None));
    let sink = received.clone();
    client
        .subscribe("bin", move |payload: &Payload| {
            *sink.lock() = payload.as_bytes().map(<[u8]>::to_vec);
        })
        .await
        .unwrap();

    client.publish_binary("bin", &[0x42, 0x69, 0x6E]).await.unwrap();
    assert_eq!(*received.lock(), Some(vec![0x42, 0x69, 0x6E]));
    client.close().await.unwrap();
}

#[tokio::test]
async fn every_payload_kind_is_decoded() {
    let (addr, _peer) = spawn_peer(|mut peer| async move {
        for channel in ["s", "i", "j", "a"] {
            peer.expect(&format!("SUBSCRIBE {}", channel)).await;
            peer.reply("OK").await;
        }
        peer.expect("PUBLISH_INT i 42").await;
        peer.push("i", 1, json!(42)).await;
        peer.reply("OK").await;
        peer.expect(r#"PUBLISH_JSON j {"nested":{"value":42}}"#).await;
        peer.push("j", 3, json!({"nested": {"value": 42}})).await;
        peer.reply("OK").await;
        peer.expect(r#"PUBLISH_ARRAY a [1,"two",{"three":3},[4,5]]"#).await;
        peer.push("a", 4, json!([1, "two", {"three": 3}, [4, 5]])).await;
        peer.reply("OK").await;
        peer.wait_for_hangup().await;
    })
    .await;

    let client = client_for(addr).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    for channel in ["s", "i", "j", "a"] {
        let seen = seen.clone();
        client
            .subscribe(channel, move |payload: &Payload| seen.lock().push(payload.clone()))
            .await
            .unwrap();
    }

    client.publish_int("i", 42).await.unwrap();
    client
        .publish_json("j", &json!({"nested": {"value": 42}}))
        .await
        .unwrap();
    client
        .publish_array("a", &[json!(1), json!("two"), json!({"three": 3}), json!([4, 5])])
        .await
        .unwrap();

    let seen = seen.lock();
    assert_eq!(seen[0], Payload::Integer(42));
    assert_eq!(seen[1].as_json().unwrap()["nested"]["value"], json!(42));
    assert_eq!(seen[2].as_array().map(|items| items.len()), Some(4));
    drop(seen);
    client.close().await.unwrap();
}

#[tokio::test]
async fn malformed_and_orphan_pushes_do_not_disturb_responses() {
    let (addr, _peer) = spawn_peer(|mut peer| async move {
        peer.expect("SUBSCRIBE chan").await;
        peer.reply("OK").await;
        peer.expect("GET k").await;
        peer.reply("Message chan {bad json").await;
        peer.push("nobody", 0, json!("ignored")).await;
        peer.push("chan", 99, json!("unknown kind")).await;
        peer.reply("value").await;
        peer.expect("GET k2").await;
        peer.reply("second").await;
        peer.wait_for_hangup().await;
    })
    .await;

    let client = client_for(addr).await;
    let calls = Arc::new(Mutex::new(0usize));
    let counter = calls.clone();
    client
        .subscribe("chan", move |_: &Payload| *counter.lock() += 1)
        .await
        .unwrap();

    assert_eq!(client.get("k").await.unwrap(), Some("value".to_string()));
    assert_eq!(client.get("k2").await.unwrap(), Some("second".to_string()));
    assert_eq!(*calls.lock(), 0);
    assert_eq!(client.state(), ConnectionState::Connected);
    client.close().await.unwrap();
}

#[tokio::test]
async fn panicking_callback_keeps_reader_alive() {
    let (addr, _peer) = spawn_peer(|mut peer| async move {
        peer.expect("SUBSCRIBE boom").await;
        peer.reply("OK").await;
        peer.expect("SUBSCRIBE boom").await;
        peer.reply("OK").await;
        peer.expect("GET k").await;
        peer.push("boom", 1, json!(1)).await;
        peer.reply("still here").await;
        peer.wait_for_hangup().await;
    })
    .await;

    let client = client_for(addr).await;
    let after = Arc::new(Mutex::new(Vec::new()));
    client
        .subscribe("boom", |_: &Payload| panic!("subscriber bug"))
        .await
        .unwrap();
    let sink = after.clone();
    client
        .subscribe("boom", move |payload: &Payload| sink.lock().push(payload.clone()))
        .await
        .unwrap();

    assert_eq!(client.get("k").await.unwrap(), Some("still here".to_string()));
    assert_eq!(*after.lock(), vec![Payload::Integer(1)]);
    assert_eq!(client.state(), ConnectionState::Connected);
    client.close().await.unwrap();
}

#[tokio::test]
async fn fragmented_writes_are_reassembled() {
    let (addr, _peer) = spawn_peer(|mut peer| async move {
        peer.expect("SUBSCRIBE frag").await;
        peer.reply("OK").await;
        peer.expect("GET k").await;
        let line = b"Message frag {\"Type\":0,\"Content\":\"Binary Data \xF0\x9F\x9A\x80\"}\nva";
        for chunk in line.chunks(3) {
            peer.write_raw(chunk).await;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        peer.write_raw(b"lue\n").await;
        peer.wait_for_hangup().await;
    })
    .await;

    let client = client_for(addr).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client
        .subscribe("frag", move |payload: &Payload| sink.lock().push(payload.clone()))
        .await
        .unwrap();

    assert_eq!(client.get("k").await.unwrap(), Some("value".to_string()));
    assert_eq!(*seen.lock(), vec![Payload::Text("Binary Data 🚀".to_string())]);
    client.close().await.unwrap();
}

#[tokio::test]
async fn close_wakes_pending_command_and_is_idempotent() {
    let (received_tx, received_rx) = oneshot::channel();
    let (addr, peer) = spawn_peer(|mut peer| async move {
        peer.expect("GET slow").await;
        let _ = received_tx.send(());
        // Never answer; wait for the client to hang up.
        peer.wait_for_hangup().await;
    })
    .await;

    let client = Arc::new(client_for(addr).await);
    let waiter = {
        let client = client.clone();
        tokio::spawn(async move { client.get("slow").await })
    };

    timeout(STEP, received_rx).await.unwrap().unwrap();
    timeout(STEP, client.close()).await.unwrap().unwrap();

    let result = timeout(STEP, waiter).await.unwrap().unwrap();
    assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    assert_eq!(client.state(), ConnectionState::Closed);

    client.close().await.unwrap();
    assert!(matches!(
        client.get("k").await,
        Err(ClientError::NotConnected(ConnectionState::Closed))
    ));
    timeout(STEP, peer).await.unwrap().unwrap();
}

#[tokio::test]
async fn peer_hangup_fails_pending_command() {
    let (addr, _peer) = spawn_peer(|mut peer| async move {
        peer.expect("GET k").await;
        // Dropping the peer closes the socket without a reply.
    })
    .await;

    let client = client_for(addr).await;
    let result = timeout(STEP, client.get("k")).await.unwrap();
    assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    assert_eq!(client.state(), ConnectionState::Closed);
    client.close().await.unwrap();
}

#[tokio::test]
async fn response_timeout_closes_connection() {
    let (addr, _peer) = spawn_peer(|mut peer| async move {
        peer.expect("GET k").await;
        peer.wait_for_hangup().await;
    })
    .await;

    let config = ClientConfig {
        response_timeout: Some(Duration::from_millis(100)),
        ..config_for(addr)
    };
    let client = KVClient::with_config(config).await.unwrap();
    let result = timeout(STEP, client.get("k")).await.unwrap();
    assert!(matches!(result, Err(ClientError::Timeout)));
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(matches!(
        client.get("k").await,
        Err(ClientError::NotConnected(ConnectionState::Closed))
    ));
    client.close().await.unwrap();
}

#[tokio::test]
async fn cancelled_command_closes_connection() {
    let (addr, peer) = spawn_peer(|mut peer| async move {
        peer.expect("GET a").await;
        // The caller gives up before any reply; nothing else may be written.
        assert_eq!(peer.next_command().await, None);
    })
    .await;

    let client = client_for(addr).await;
    assert!(timeout(Duration::from_millis(100), client.get("a")).await.is_err());
    assert_eq!(client.state(), ConnectionState::Connected);

    let result = timeout(STEP, client.get("b")).await.unwrap();
    assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(matches!(
        client.get("b").await,
        Err(ClientError::NotConnected(ConnectionState::Closed))
    ));

    client.close().await.unwrap();
    timeout(STEP, peer).await.unwrap().unwrap();
}

#[tokio::test]
async fn late_response_to_cancelled_command_is_never_delivered() {
    let (addr, peer) = spawn_peer(|mut peer| async move {
        peer.expect("GET a").await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = peer.writer.write_all(b"value-of-a\n").await;
        assert_eq!(peer.next_command().await, None);
    })
    .await;

    let client = client_for(addr).await;
    assert!(timeout(Duration::from_millis(50), client.get("a")).await.is_err());
    tokio::time::sleep(Duration::from_millis(400)).await;

    let result = timeout(STEP, client.get("b")).await.unwrap();
    assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    client.close().await.unwrap();
    timeout(STEP, peer).await.unwrap().unwrap();
}

#[tokio::test]
async fn connect_failure_leaves_connection_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let conn = Connection::new(config_for(addr));
    let err = conn.connect().await.unwrap_err();
    assert!(matches!(err, ClientError::Connect { .. }));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(matches!(
        conn.send("GET k").await,
        Err(ClientError::NotConnected(ConnectionState::Disconnected))
    ));
}

#[tokio::test]
async fn connect_is_only_valid_once() {
    let (addr, _peer) = spawn_peer(|peer| async move {
        peer.wait_for_hangup().await;
    })
    .await;

    let conn = Connection::new(config_for(addr));
    conn.connect().await.unwrap();
    assert!(matches!(
        conn.connect().await,
        Err(ClientError::AlreadyStarted(ConnectionState::Connected))
    ));
    conn.close().await.unwrap();
    assert!(matches!(
        conn.connect().await,
        Err(ClientError::AlreadyStarted(ConnectionState::Closed))
    ));
}

#[tokio::test]
async fn subscribe_validates_channel_and_acknowledgement() {
    let (addr, _peer) = spawn_peer(|mut peer| async move {
        peer.expect("SUBSCRIBE locked").await;
        peer.reply("ERR not allowed").await;
        peer.wait_for_hangup().await;
    })
    .await;

    let client = client_for(addr).await;
    assert!(matches!(
        client.subscribe("two words", |_: &Payload| {}).await,
        Err(ClientError::InvalidChannel(_))
    ));
    assert!(matches!(
        client.subscribe("locked", |_: &Payload| {}).await,
        Err(ClientError::UnexpectedResponse { command: "SUBSCRIBE", .. })
    ));
    client.close().await.unwrap();
}
