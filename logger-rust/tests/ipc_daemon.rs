//! IPC server and daemon dispatch, end to end over localhost TCP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;

use wx_logger::store::Store;
use wx_logger::{Daemon, Settings};
use wx_simulator::SimulatedPort;
use wx_types::StationFamily;

struct IpcClient {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl IpcClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn send(&mut self, msg: Value) {
        self.send_raw(&msg.to_string()).await;
    }

    async fn read(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(10), self.lines.next_line())
            .await
            .expect("timed out waiting for IPC line")
            .unwrap()
            .expect("connection closed");
        serde_json::from_str(&line).unwrap()
    }

    async fn request(&mut self, msg: Value) -> Value {
        self.send(msg).await;
        self.read().await
    }
}

async fn start_daemon() -> (Arc<Daemon>, SocketAddr) {
    let store = Arc::new(Store::open(":memory:").await.unwrap());
    let settings = Settings {
        db_path: ":memory:".to_string(),
        ipc_port: 0, // ephemeral
        serial_timeout: Duration::from_secs(2),
    };
    let daemon = Daemon::new(settings, store);
    daemon.start_ipc().await.unwrap();
    let addr = daemon.ipc.local_addr().await.unwrap();
    (daemon, addr)
}

#[tokio::test]
async fn status_works_disconnected() {
    let (_daemon, addr) = start_daemon().await;
    let mut client = IpcClient::connect(addr).await;

    let reply = client.request(json!({"cmd": "status"})).await;
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["data"]["connected"], false);
    assert_eq!(reply["data"]["type_name"], "Not connected");
    assert_eq!(reply["data"]["type_code"], -1);
    assert_eq!(reply["data"]["link_revision"], "unknown");
}

#[tokio::test]
async fn invalid_json_keeps_the_connection() {
    let (_daemon, addr) = start_daemon().await;
    let mut client = IpcClient::connect(addr).await;

    client.send_raw("this is not json").await;
    let reply = client.read().await;
    assert_eq!(reply["ok"], false);
    assert_eq!(reply["error"], "Invalid JSON");

    // Connection still serves requests afterwards.
    let reply = client.request(json!({"cmd": "status"})).await;
    assert_eq!(reply["ok"], true);
}

#[tokio::test]
async fn unknown_command_is_an_error() {
    let (_daemon, addr) = start_daemon().await;
    let mut client = IpcClient::connect(addr).await;

    let reply = client.request(json!({"cmd": "launch_rockets"})).await;
    assert_eq!(reply["ok"], false);
    assert!(reply["error"].as_str().unwrap().contains("Unknown command"));
}

#[tokio::test]
async fn device_commands_fail_fast_while_disconnected() {
    let (_daemon, addr) = start_daemon().await;
    let mut client = IpcClient::connect(addr).await;

    for cmd in [
        "read_station_time",
        "sync_station_time",
        "read_config",
        "clear_rain_daily",
        "clear_rain_yearly",
        "force_archive",
    ] {
        let reply = client.request(json!({"cmd": cmd})).await;
        assert_eq!(reply["ok"], false, "{cmd} should fail while disconnected");
        assert_eq!(reply["error"], "Not connected");
    }
}

#[tokio::test]
async fn connected_daemon_reports_station_and_serves_commands() {
    let (daemon, addr) = start_daemon().await;
    daemon.store.set_config("poll_interval", "1").await.unwrap();

    let (port, _station) = SimulatedPort::new(StationFamily::Monitor);
    let family = daemon
        .connect_with_device(Box::new(port), "sim")
        .await
        .unwrap();
    assert_eq!(family, StationFamily::Monitor);

    let mut client = IpcClient::connect(addr).await;

    let reply = client.request(json!({"cmd": "status"})).await;
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["data"]["connected"], true);
    assert_eq!(reply["data"]["type_name"], "Weather Monitor II");
    assert_eq!(reply["data"]["type_code"], 2);
    assert_eq!(reply["data"]["link_revision"], "D");

    let reply = client.request(json!({"cmd": "read_config"})).await;
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["data"]["archive_period"], 30);
    assert_eq!(reply["data"]["sample_period"], 8);
    assert_eq!(reply["data"]["calibration"]["rain_cal"], 100);

    let reply = client
        .request(json!({"cmd": "write_config", "archive_period": 45}))
        .await;
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["data"]["results"]["archive_period"], "ok");

    let reply = client
        .request(json!({"cmd": "write_config", "archive_period": 200}))
        .await;
    assert_eq!(reply["ok"], false); // out of range surfaces verbatim

    let reply = client.request(json!({"cmd": "force_archive"})).await;
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["data"]["success"], true);

    daemon.teardown().await;
}

#[tokio::test]
async fn poller_persists_and_broadcasts_to_subscribers() {
    let (daemon, addr) = start_daemon().await;
    daemon.store.set_config("poll_interval", "1").await.unwrap();

    let (port, _station) = SimulatedPort::new(StationFamily::Monitor);
    daemon
        .connect_with_device(Box::new(port), "sim")
        .await
        .unwrap();

    let mut sub_a = IpcClient::connect(addr).await;
    let mut sub_b = IpcClient::connect(addr).await;

    let ack = sub_a.request(json!({"cmd": "subscribe"})).await;
    assert_eq!(ack["subscribed"], true);
    let ack = sub_b.request(json!({"cmd": "subscribe"})).await;
    assert_eq!(ack["subscribed"], true);

    // Both subscribers receive the next sensor_update.
    let update_a = sub_a.read().await;
    let update_b = sub_b.read().await;
    assert_eq!(update_a["type"], "sensor_update");
    assert_eq!(update_b["type"], "sensor_update");
    assert_eq!(update_a["data"]["station_type"], "Weather Monitor II");
    assert!(update_a["data"]["temperature"]["outside"]["value"].is_number());

    // Every broadcast corresponds to a persisted row.
    assert!(daemon.store.reading_count().await.unwrap() >= 1);

    // One subscriber drops; the other keeps receiving.
    drop(sub_a);
    let update = sub_b.read().await;
    assert_eq!(update["type"], "sensor_update");

    // The dead subscriber has been evicted.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(daemon.ipc.subscriber_count().await, 1);

    daemon.teardown().await;
}

#[tokio::test]
async fn unsubscribe_stops_the_stream() {
    let (daemon, addr) = start_daemon().await;
    let mut client = IpcClient::connect(addr).await;

    let ack = client.request(json!({"cmd": "subscribe"})).await;
    assert_eq!(ack["subscribed"], true);
    assert_eq!(daemon.ipc.subscriber_count().await, 1);

    let reply = client.request(json!({"cmd": "unsubscribe"})).await;
    assert_eq!(reply["ok"], true);
    assert_eq!(daemon.ipc.subscriber_count().await, 0);
}

#[tokio::test]
async fn sync_station_time_round_trips() {
    let (daemon, addr) = start_daemon().await;
    daemon.store.set_config("poll_interval", "60").await.unwrap();

    let (port, _station) = SimulatedPort::new(StationFamily::Monitor);
    daemon
        .connect_with_device(Box::new(port), "sim")
        .await
        .unwrap();

    let mut client = IpcClient::connect(addr).await;

    let reply = client.request(json!({"cmd": "sync_station_time"})).await;
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["data"]["success"], true);
    let synced_to = reply["data"]["synced_to"].as_str().unwrap().to_string();
    let written_hour: u64 = synced_to[..2].parse().unwrap();

    // The simulated clock holds still, so read-back matches the write.
    let reply = client.request(json!({"cmd": "read_station_time"})).await;
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["data"]["hour"].as_u64().unwrap(), written_hour);

    daemon.teardown().await;
}
