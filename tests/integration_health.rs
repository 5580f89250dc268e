use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use runbox::config::{Config, ConfigStore};
use runbox::server::Server;
use runbox::session::{ExitInfo, SessionMode, SpawnSpec};

fn test_config() -> Config {
    let mut config = Config::default();
    config.server.bind_addr = "127.0.0.1:0".to_string();
    config.server.shutdown_timeout_seconds = 1;
    config
}

#[tokio::test]
async fn test_health_integration() {
    let config_store = ConfigStore::new(test_config(), PathBuf::from("/tmp/test-config.toml"));
    let mut server = Server::new(&config_store);

    // Bind before spawning so the port is ours when the client connects.
    let addr = server.try_bind().await.expect("Failed to bind");
    let handle = server.handle();
    let running = tokio::spawn(async move { server.run().await });

    let client = Client::new();
    let resp = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );

    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "runbox");

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_graceful_shutdown_kills_sessions() {
    let config_store = ConfigStore::new(test_config(), PathBuf::from("/tmp/test-config.toml"));
    let mut server = Server::new(&config_store);
    let addr = server.try_bind().await.expect("Failed to bind");
    let registry = server.registry();
    let handle = server.handle();
    let running = tokio::spawn(async move { server.run().await });

    let pid = registry
        .create(
            SessionMode::Text,
            SpawnSpec::new("/bin/sh").arg("-c").arg("sleep 30"),
        )
        .unwrap();

    let client = Client::new();
    let resp = client
        .get(format!("http://{addr}/program?pid={pid}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();

    let session = registry.get(pid).unwrap();
    let exit = tokio::time::timeout(Duration::from_secs(5), session.wait())
        .await
        .expect("session survived shutdown");
    assert_eq!(exit, Some(ExitInfo::Killed { signal: 9 }));
}

#[tokio::test]
async fn test_run_requires_bind() {
    let config_store = ConfigStore::new(test_config(), PathBuf::from("/tmp/test-config.toml"));
    let server = Server::new(&config_store);
    let err = server.run().await.unwrap_err();
    assert!(err.to_string().contains("try_bind"));
}
