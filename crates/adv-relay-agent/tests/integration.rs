use adv_relay_proto::{encode_envelope, TelemetryRecord};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

fn parse_mqtt_url(url: &str) -> (String, u16) {
    let url = url
        .strip_prefix("tcp://")
        .or_else(|| url.strip_prefix("mqtt://"))
        .unwrap_or(url);

    let parts: Vec<&str> = url.split(':').collect();

    let host = parts.first().copied().unwrap_or("localhost").to_string();
    let port = parts.get(1).and_then(|p| p.parse().ok()).unwrap_or(1883);

    (host, port)
}

async fn spawn_eventloop(mut eventloop: EventLoop) {
    loop {
        if eventloop.poll().await.is_err() {
            break;
        }
    }
}

fn sample_records() -> Vec<TelemetryRecord> {
    vec![
        TelemetryRecord {
            timestamp: 1_700_000_000,
            latitude: 52_520_008,
            longitude: 13_404_954,
            temperature: 2150,
            tilt_x: 1,
            tilt_y: -2,
            tilt_z: 90,
            core_voltage: 33,
            liion_voltage: 41,
        },
        TelemetryRecord {
            timestamp: 1_700_000_060,
            latitude: -33_868_820,
            longitude: 151_209_296,
            temperature: -450,
            tilt_x: 0,
            tilt_y: 0,
            tilt_z: -90,
            core_voltage: 32,
            liion_voltage: 39,
        },
    ]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn relays_records_end_to_end() {
    if std::env::var("ADV_RELAY_INTEGRATION").is_err() {
        eprintln!("Skipping integration test; set ADV_RELAY_INTEGRATION=1 to run");
        return;
    }

    let broker = std::env::var("ADV_RELAY_MQTT_BROKER")
        .unwrap_or_else(|_| "tcp://localhost:1883".to_string());
    let (host, port) = parse_mqtt_url(&broker);

    let device_id = Uuid::new_v4().simple().to_string();
    let inbound = format!("adv/{device_id}/data");
    let outbound = format!("integration/{device_id}/records");

    // Both sides of the relay on the same broker
    let config = serde_json::json!({
        "brokers": {
            "source": {
                "host": host,
                "port": port,
                "client_id": format!("relay-src-{}", Uuid::new_v4()),
            },
            "target": { "host": host, "port": port },
        },
        "subscriptions": [{ "topic": "adv/+/data", "qos": 1 }],
        "routing": [{ "to": "integration/{device}/records" }],
        "devices": [],
        "skip_unknown": false,
    });
    let mut config_file = tempfile::NamedTempFile::new().unwrap();
    config_file
        .write_all(config.to_string().as_bytes())
        .unwrap();

    let mut agent = Command::new(env!("CARGO_BIN_EXE_adv-relay-agent"))
        .env("ADV_RELAY_CONFIG", config_file.path())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();

    let mut sub_opts = MqttOptions::new(format!("sub-{}", Uuid::new_v4()), host.clone(), port);
    sub_opts.set_keep_alive(Duration::from_secs(5));
    let (sub_client, mut sub_eventloop) = AsyncClient::new(sub_opts, 10);
    sub_client
        .subscribe(&outbound, QoS::AtLeastOnce)
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    tokio::spawn(async move {
        loop {
            match sub_eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if tx.send(publish.payload.to_vec()).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    let mut pub_opts = MqttOptions::new(format!("dev-{}", Uuid::new_v4()), host, port);
    pub_opts.set_keep_alive(Duration::from_secs(5));
    let (pub_client, pub_eventloop) = AsyncClient::new(pub_opts, 10);
    tokio::spawn(spawn_eventloop(pub_eventloop));

    // Give the agent time to connect and subscribe
    tokio::time::sleep(Duration::from_secs(2)).await;

    let records = sample_records();
    let envelope = encode_envelope(&records).unwrap();
    let body = serde_json::json!({ "data": STANDARD.encode(&envelope) });

    pub_client
        .publish(&inbound, QoS::AtLeastOnce, false, body.to_string())
        .await
        .unwrap();

    let mut received = Vec::new();
    for _ in 0..records.len() {
        let payload = timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timeout waiting for relayed record")
            .expect("subscriber dropped");
        received.push(String::from_utf8(payload).unwrap());
    }

    let expected: Vec<String> = records
        .iter()
        .map(|record| record.to_output().to_json().unwrap())
        .collect();
    assert_eq!(received, expected);

    agent.kill().await.unwrap();
}
