//! Loads a configuration against an instrument simulated on a local TCP
//! socket, using the bundled transports.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use common::{ScriptedFactory, SCRIPTED_DEFINITION, SCRIPTED_IDN, SCRIPTED_OBJECT};
use labrig_core::{arguments, ErrorKind, Value};
use labrig_hardware::config::TransportSettings;
use labrig_hardware::{ConfigDocument, ConfigEntry, DriverRegistry, ResourceManager, TransportBinder};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// Answers `*IDN?`, remembers `HEADER value` settings and answers `HEADER?`
/// from them. Returns every line received once the client disconnects.
async fn serve_one(listener: TcpListener) -> Vec<String> {
    let (socket, _) = listener.accept().await.unwrap();
    let mut socket = BufReader::new(socket);
    let mut settings: HashMap<String, String> = HashMap::new();
    let mut received = Vec::new();

    loop {
        let mut line = String::new();
        if socket.read_line(&mut line).await.unwrap() == 0 {
            break;
        }
        let line = line.trim_end().to_string();
        received.push(line.clone());

        if line == "*IDN?" {
            let reply = format!("{}\n", SCRIPTED_IDN);
            socket.get_mut().write_all(reply.as_bytes()).await.unwrap();
        } else if let Some(header) = line.strip_suffix('?') {
            let value = settings.get(header).cloned().unwrap_or_else(|| "0".into());
            socket
                .get_mut()
                .write_all(format!("{}\n", value).as_bytes())
                .await
                .unwrap();
        } else if let Some((header, value)) = line.split_once(' ') {
            settings.insert(header.to_string(), value.to_string());
        }
    }
    received
}

fn manager() -> ResourceManager {
    let mut registry = DriverRegistry::new();
    registry
        .register(SCRIPTED_DEFINITION, SCRIPTED_OBJECT, Arc::new(ScriptedFactory::new()))
        .unwrap();
    let binder = TransportBinder::with_defaults(&TransportSettings::default());
    ResourceManager::new(Arc::new(registry), Arc::new(binder))
}

#[tokio::test]
async fn test_load_call_and_close_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let received = Arc::new(Mutex::new(Vec::new()));
    let server = {
        let received = received.clone();
        tokio::spawn(async move {
            let lines = serve_one(listener).await;
            *received.lock().unwrap() = lines;
        })
    };

    let address = format!("TCPIP0::127.0.0.1::{}::SOCKET", port);
    let document = ConfigDocument::new().with(
        "psu",
        ConfigEntry::new(SCRIPTED_OBJECT, SCRIPTED_DEFINITION, &address)
            .step("set_voltage", arguments! { "voltage" => 2.5 })
            .step("off", arguments! {}),
    );

    let (table, errors) = manager().load(&document).await;
    assert!(errors.is_none(), "{:?}", errors);

    let psu = table.get("psu").unwrap();
    assert_eq!(psu.idn(), Some(SCRIPTED_IDN));
    assert_eq!(psu.address(), address);
    assert_eq!(
        psu.call("get_voltage", arguments! {}).await.unwrap(),
        Value::Float(2.5)
    );

    assert!(table.close_all().await.is_empty());
    server.await.unwrap();
    assert_eq!(
        *received.lock().unwrap(),
        vec!["*IDN?", "VOLT 2.5", "OUTP 0", "VOLT?"]
    );
}

#[tokio::test]
async fn test_closed_port_is_a_channel_open_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let document = ConfigDocument::new()
        .with(
            "gone",
            ConfigEntry::new(
                SCRIPTED_OBJECT,
                SCRIPTED_DEFINITION,
                format!("TCPIP0::127.0.0.1::{}::SOCKET", port),
            ),
        )
        .with(
            "usb",
            ConfigEntry::new(SCRIPTED_OBJECT, SCRIPTED_DEFINITION, "USB0::1::2::3::INSTR"),
        );

    let (table, errors) = manager().load(&document).await;

    assert!(table.is_empty());
    let errors = errors.unwrap();
    assert_eq!(errors.error_for("gone").unwrap().kind(), ErrorKind::ChannelOpen);
    // no USB transport is bundled
    assert_eq!(errors.error_for("usb").unwrap().kind(), ErrorKind::ChannelOpen);
}
