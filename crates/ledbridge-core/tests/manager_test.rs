// Integration tests for `DeviceManager` against a wiremock device.

use std::net::IpAddr;
use std::time::Duration;

use serde_json::{Value, json};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ledbridge_core::{
    BridgeConfig, CONNECTION_STATE, ChannelDiscovery, CoreError, Delivery, DeviceManager,
    DiscoveredDevice, MacAddress,
};

const MAC: &str = "a4cf12fdae01";

// ── Helpers ─────────────────────────────────────────────────────────

fn localhost() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn device_body() -> Value {
    json!({
        "state": {
            "on": true,
            "bri": 128,
            "nl": { "on": false, "dur": 60 },
            "seg": [{
                "id": 0,
                "start": 0,
                "stop": 30,
                "fx": 0,
                "col": [[255, 0, 0], [0, 0, 0], [0, 0, 255]]
            }]
        },
        "info": {
            "ver": "0.14.0",
            "name": "Desk",
            "mac": MAC,
            "ws": 0,
            "leds": { "count": 30 }
        },
        "effects": ["Solid", "Blink"],
        "palettes": ["Default"]
    })
}

fn config_for(server: &MockServer) -> BridgeConfig {
    BridgeConfig {
        poll_interval: Duration::from_millis(50),
        max_retries: 1,
        websocket_enabled: false,
        discovery_enabled: false,
        device_port: server.address().port(),
        ..BridgeConfig::default()
    }
}

async fn mount_device(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_body()))
        .mount(server)
        .await;
}

/// A manager that has run one HTTP check against the mock device.
async fn connected_manager() -> (MockServer, DeviceManager) {
    let server = MockServer::start().await;
    mount_device(&server).await;

    let manager = DeviceManager::new(config_for(&server));
    let mac = manager.connect_once(localhost()).await.unwrap();
    assert_eq!(mac.as_str(), MAC);
    (server, manager)
}

fn state(manager: &DeviceManager, id: &str) -> Value {
    manager.tree().get_state(id).unwrap().val
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

// ── Initialization ──────────────────────────────────────────────────

#[tokio::test]
async fn test_first_check_builds_device_tree() {
    let (_server, manager) = connected_manager().await;

    assert_eq!(state(&manager, &format!("{MAC}.bri")), json!(128));
    assert_eq!(state(&manager, &format!("{MAC}.seg.0.col.2_HEX")), json!("#0000ff"));
    assert_eq!(state(&manager, &format!("{MAC}._info._online")), json!(true));
    assert_eq!(state(&manager, CONNECTION_STATE), json!(true));

    let devices = manager.devices();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].name, "Desk");
    assert!(devices[0].initialized);
    assert!(devices[0].connected);
}

#[tokio::test]
async fn test_missing_mac_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": { "on": true },
            "info": { "name": "Nameless" }
        })))
        .mount(&server)
        .await;

    let manager = DeviceManager::new(config_for(&server));
    let err = manager.connect_once(localhost()).await.unwrap_err();
    assert!(matches!(err, CoreError::MalformedResponse { .. }), "got {err:?}");
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_http_command_is_acknowledged() {
    let (server, manager) = connected_manager().await;

    Mock::given(method("POST"))
        .and(path("/json"))
        .and(body_json(json!({ "bri": 64 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let id = format!("{MAC}.bri");
    manager.tree().write_user(&id, json!(64)).unwrap();
    let delivery = manager.deliver(&id, &json!(64)).await.unwrap();

    assert_eq!(delivery, Delivery::Http { acknowledged: true });
    let stored = manager.tree().get_state(&id).unwrap();
    assert_eq!(stored.val, json!(64));
    assert!(stored.ack);
}

#[tokio::test]
async fn test_unconfirmed_command_stays_pending() {
    let (server, manager) = connected_manager().await;

    Mock::given(method("POST"))
        .and(path("/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": false })))
        .mount(&server)
        .await;

    let id = format!("{MAC}.on");
    manager.tree().write_user(&id, json!(false)).unwrap();
    let delivery = manager.deliver(&id, &json!(false)).await.unwrap();

    assert_eq!(delivery, Delivery::Http { acknowledged: false });
    assert!(!manager.tree().get_state(&id).unwrap().ack);
}

#[tokio::test]
async fn test_hex_colour_write_sends_all_slots() {
    let (server, manager) = connected_manager().await;

    Mock::given(method("POST"))
        .and(path("/json"))
        .and(body_json(json!({
            "seg": [{ "id": 0, "col": [[0, 255, 0], [0, 0, 0], [0, 0, 255]] }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let delivery = manager
        .deliver(&format!("{MAC}.seg.0.col.0_HEX"), &json!("#00ff00"))
        .await
        .unwrap();
    assert_eq!(delivery, Delivery::Http { acknowledged: true });
}

#[tokio::test]
async fn test_colour_write_without_sibling_sends_nothing() {
    let (server, manager) = connected_manager().await;

    Mock::given(method("POST"))
        .and(path("/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(0)
        .mount(&server)
        .await;

    manager.sync().remove_path(&format!("{MAC}.seg.0.col.1_HEX"));
    let err = manager
        .deliver(&format!("{MAC}.seg.0.col.0_HEX"), &json!("#00ff00"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)), "got {err:?}");
}

#[tokio::test]
async fn test_raw_command_uses_legacy_endpoint() {
    let (server, manager) = connected_manager().await;

    Mock::given(method("GET"))
        .and(path("/win"))
        .and(query_param("A", "128"))
        .and(query_param("FX", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<vs><ac>128</ac></vs>"))
        .expect(1)
        .mount(&server)
        .await;

    let id = format!("{MAC}.rawCommand");
    let delivery = manager.deliver(&id, &json!("A=128&FX=2")).await.unwrap();

    assert_eq!(delivery, Delivery::Raw);
    assert!(manager.tree().get_state(&id).unwrap().ack);
}

#[tokio::test]
async fn test_command_for_unknown_device_fails() {
    let (_server, manager) = connected_manager().await;
    let err = manager
        .deliver("001122334455.bri", &json!(10))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::DeviceNotFound { .. }));
}

// ── Admin commands ──────────────────────────────────────────────────

#[tokio::test]
async fn test_add_segment_posts_segment() {
    let (server, manager) = connected_manager().await;

    Mock::given(method("POST"))
        .and(path("/json"))
        .and(body_json(json!({
            "seg": [{ "id": 1, "start": 30, "stop": 60, "bri": 200, "on": true }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let response = manager
        .handle_message(
            "addSegment",
            &json!({ "deviceId": MAC, "segmentId": "1", "start": 30, "stop": 60, "bri": 200, "on": true }),
        )
        .await;
    assert!(response.success, "{:?}", response.error);
}

#[tokio::test]
async fn test_delete_segment_removes_tree_entries() {
    let (server, manager) = connected_manager().await;

    Mock::given(method("POST"))
        .and(path("/json"))
        .and(body_json(json!({ "seg": [{ "id": 0, "stop": 0 }] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    assert!(manager.tree().get_state(&format!("{MAC}.seg.0.fx")).is_some());
    let response = manager
        .handle_message("deleteSegment", &json!({ "deviceId": MAC, "segmentId": 0 }))
        .await;

    assert!(response.success, "{:?}", response.error);
    assert!(manager.tree().get_state(&format!("{MAC}.seg.0.fx")).is_none());
    assert!(manager.tree().get_state(&format!("{MAC}.bri")).is_some());
}

#[tokio::test]
async fn test_delete_device_clears_everything() {
    let (_server, manager) = connected_manager().await;

    let response = manager
        .handle_message("deleteDevice", &json!({ "deviceId": MAC }))
        .await;
    assert!(response.success);
    assert!(manager.registry().is_empty());
    assert!(manager.tree().get_object(MAC).is_none());
    assert_eq!(state(&manager, CONNECTION_STATE), json!(false));

    let again = manager
        .handle_message("deleteDevice", &json!({ "deviceId": MAC }))
        .await;
    assert!(!again.success);
}

#[tokio::test]
async fn test_rename_survives_later_checks() {
    let (_server, manager) = connected_manager().await;

    let response = manager
        .handle_message("renameDevice", &json!({ "deviceId": MAC, "name": "Porch" }))
        .await;
    assert!(response.success, "{:?}", response.error);
    assert_eq!(manager.tree().get_object(MAC).unwrap().common.name, "Porch");

    manager.connect_once(localhost()).await.unwrap();
    assert_eq!(manager.tree().get_object(MAC).unwrap().common.name, "Porch");
    assert_eq!(state(&manager, &format!("{MAC}.bri")), json!(128));
}

#[tokio::test]
async fn test_list_devices_reports_registry() {
    let (_server, manager) = connected_manager().await;

    let response = manager.handle_message("listDevices", &json!({})).await;
    let devices = response.devices.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].mac, Some(MacAddress::new(MAC)));
}

// ── Watchdog ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unreachable_device_is_latched_offline() {
    let server = MockServer::start().await;
    mount_device(&server).await;

    let manager = DeviceManager::new(config_for(&server));
    assert!(manager.add_device(localhost()));
    assert!(!manager.add_device(localhost()));

    let bri = format!("{MAC}.bri");
    wait_until("first check", || {
        manager.tree().get_state(&bri).is_some_and(|s| s.val == json!(128))
    })
    .await;

    server.reset().await;

    wait_until("device marked offline", || {
        manager.tree().get_state(&bri).is_some_and(|s| s.val == json!(0))
    })
    .await;

    assert_eq!(state(&manager, &format!("{MAC}.on")), json!(false));
    assert_eq!(state(&manager, &format!("{MAC}._info._online")), json!(false));
    assert_eq!(state(&manager, CONNECTION_STATE), json!(false));
    assert!(!manager.devices()[0].connected);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_known_devices_are_contacted_on_start() {
    let server = MockServer::start().await;
    mount_device(&server).await;

    let manager = DeviceManager::new(BridgeConfig {
        known_devices: vec![localhost()],
        ..config_for(&server)
    });
    manager.start(None).await.unwrap();

    assert_eq!(manager.registry().len(), 1);
    assert!(manager.devices()[0].connected);
    assert_eq!(state(&manager, CONNECTION_STATE), json!(true));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_user_write_is_relayed_to_device() {
    let server = MockServer::start().await;
    mount_device(&server).await;
    Mock::given(method("POST"))
        .and(path("/json"))
        .and(body_json(json!({ "nl": { "dur": 30 } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let manager = DeviceManager::new(BridgeConfig {
        known_devices: vec![localhost()],
        poll_interval: Duration::from_secs(60),
        ..config_for(&server)
    });
    manager.start(None).await.unwrap();

    let id = format!("{MAC}.nl.dur");
    manager.tree().write_user(&id, json!(30)).unwrap();

    wait_until("relayed write acknowledged", || {
        manager.tree().get_state(&id).is_some_and(|s| s.ack && s.val == json!(30))
    })
    .await;

    manager.shutdown().await;
}

#[tokio::test]
async fn test_check_in_flight_does_not_restore_deleted_device() {
    let server = MockServer::start().await;
    // First check answers at once, later ones are slow enough to overlap the delete
    Mock::given(method("GET"))
        .and(path("/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_body()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(device_body())
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let manager = DeviceManager::new(config_for(&server));
    assert!(manager.add_device(localhost()));

    let bri = format!("{MAC}.bri");
    wait_until("first check", || manager.tree().get_state(&bri).is_some()).await;

    // Second check starts after one poll interval and is still waiting
    tokio::time::sleep(Duration::from_millis(120)).await;
    manager.remove_device(&MacAddress::new(MAC)).unwrap();
    assert!(manager.tree().get_object(MAC).is_none());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(manager.tree().get_object(MAC).is_none());
    assert!(manager.tree().get_state(&bri).is_none());
    assert!(manager.tree().get_state(&format!("{MAC}._info._online")).is_none());
    assert!(manager.registry().is_empty());

    manager.shutdown().await;
}

// ── Discovery ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_discovered_device_is_registered_and_checked() {
    let server = MockServer::start().await;
    mount_device(&server).await;

    let manager = DeviceManager::new(BridgeConfig {
        poll_interval: Duration::from_secs(60),
        ..config_for(&server)
    });
    let (source, announce) = ChannelDiscovery::new();
    manager.start(Some(Box::new(source))).await.unwrap();
    assert!(manager.registry().is_empty());

    announce
        .send(DiscoveredDevice {
            name: "wled-desk".into(),
            ip: localhost(),
            mac: Some(MacAddress::new(MAC)),
        })
        .await
        .unwrap();

    wait_until("discovered device initialized", || {
        manager.devices().first().is_some_and(|d| d.initialized && d.connected)
    })
    .await;
    assert_eq!(state(&manager, &format!("{MAC}.bri")), json!(128));
    assert_eq!(manager.devices()[0].name, "Desk");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_known_mac_at_new_ip_is_relocated() {
    let server = MockServer::start().await;
    mount_device(&server).await;

    let manager = DeviceManager::new(BridgeConfig {
        known_devices: vec![localhost()],
        poll_interval: Duration::from_secs(60),
        ..config_for(&server)
    });
    let (source, announce) = ChannelDiscovery::new();
    manager.start(Some(Box::new(source))).await.unwrap();

    let mac = MacAddress::new(MAC);
    assert_eq!(manager.registry().ip_for(&mac), Some(localhost()));

    let moved = IpAddr::from([127, 0, 0, 2]);
    announce
        .send(DiscoveredDevice {
            name: "wled-desk".into(),
            ip: moved,
            mac: Some(mac.clone()),
        })
        .await
        .unwrap();

    wait_until("device relocated", || manager.registry().ip_for(&mac) == Some(moved)).await;
    assert_eq!(manager.registry().len(), 1);
    assert!(!manager.registry().contains(localhost()));

    // Announcing the same address again changes nothing
    announce
        .send(DiscoveredDevice {
            name: "wled-desk".into(),
            ip: moved,
            mac: Some(mac.clone()),
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.registry().len(), 1);
    assert_eq!(manager.registry().ip_for(&mac), Some(moved));

    manager.shutdown().await;
}

// ── Capability downgrade ────────────────────────────────────────────

#[tokio::test]
async fn test_missing_websocket_endpoint_downgrades_to_http() {
    let server = MockServer::start().await;
    mount_device(&server).await;
    Mock::given(method("GET"))
        .and(path("/ws"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/json"))
        .and(body_json(json!({ "bri": 42 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let manager = DeviceManager::new(BridgeConfig {
        websocket_enabled: true,
        ..config_for(&server)
    });
    assert!(manager.add_device(localhost()));

    wait_until("upgrade refused", || {
        manager.devices().first().is_some_and(|d| d.initialized && !d.ws_ping_supported)
    })
    .await;

    // Several more polls pass without another upgrade attempt
    tokio::time::sleep(Duration::from_millis(250)).await;
    let requests = server.received_requests().await.unwrap();
    let upgrades = requests.iter().filter(|r| r.url.path() == "/ws").count();
    let checks = requests.iter().filter(|r| r.url.path() == "/json").count();
    assert_eq!(upgrades, 1);
    assert!(checks > 1);

    let device = &manager.devices()[0];
    assert!(device.connected);
    assert!(!device.ws_connected);

    let delivery = manager.deliver(&format!("{MAC}.bri"), &json!(42)).await.unwrap();
    assert_eq!(delivery, Delivery::Http { acknowledged: true });

    manager.shutdown().await;
}
