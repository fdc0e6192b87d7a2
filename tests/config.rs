/*
 * Copyright 2024 Google LLC
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use tokio::{io::AsyncReadExt, sync::mpsc, time::timeout};

use switchyard::{
    config::Config,
    discovery::{ListenerManager, UpdateResponse},
    filters::{Echo, StaticFilter},
    listener::{Filter, FilterChain, ListenerRegistry},
    signal::{channel, ShutdownKind},
    test::{available_addr, connect, listener},
    Server,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn config(port: u16, greeting: &str) -> String {
    let mut config = Config::default();
    config.listeners.push(listener(
        "greeter",
        port,
        vec![FilterChain::named("greeting").with_filter(Filter {
            name: Echo::NAME.into(),
            config: Some(serde_json::json!({ "greeting": greeting })),
        })],
    ));
    serde_yaml::to_string(&config).unwrap()
}

async fn greeting(port: u16, expected: &str) -> bool {
    let mut stream = connect(([127, 0, 0, 1], port).into()).await;
    let mut received = vec![0; expected.len()];
    match timeout(TIMEOUT, stream.read_exact(&mut received)).await {
        Ok(Ok(_)) => received == expected.as_bytes(),
        _ => false,
    }
}

#[tokio::test]
async fn file_changes_reach_new_connections() {
    let port = available_addr().port();
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("switchyard.yaml");
    std::fs::write(&path, config(port, "first\n")).unwrap();

    let registry = Arc::new(ListenerRegistry::default());
    let (updates_tx, updates_rx) = mpsc::channel(8);
    let (responses_tx, mut responses_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = channel(ShutdownKind::Testing);

    tokio::spawn(ListenerManager::new(registry.clone(), responses_tx).run(updates_rx));
    tokio::spawn(switchyard::config::watch::fs(path.clone(), updates_tx));
    let server = tokio::spawn(Server::new(registry.clone()).run(shutdown_rx));

    let response = timeout(TIMEOUT, responses_rx.recv()).await.unwrap().unwrap();
    assert!(response.is_ack(), "{response:?}");
    assert!(greeting(port, "first\n").await);

    // give the watcher time to settle before changing the file.
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(&path, config(port, "second\n")).unwrap();

    let mut updated = false;
    for _ in 0..50 {
        if greeting(port, "second\n").await {
            updated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(updated);

    // an invalid listener is rejected and the last configuration keeps serving.
    std::fs::write(
        &path,
        serde_yaml::to_string(&Config {
            listeners: vec![listener("greeter", port, vec![])],
            ..<_>::default()
        })
        .unwrap(),
    )
    .unwrap();

    let rejected = timeout(TIMEOUT, async {
        loop {
            match responses_rx.recv().await {
                Some(UpdateResponse::Nack { error, .. }) => return error,
                Some(_) => continue,
                None => panic!("responses closed"),
            }
        }
    })
    .await
    .unwrap();
    assert!(rejected.contains("greeter"), "{rejected}");
    assert!(greeting(port, "second\n").await);

    shutdown_tx.send(ShutdownKind::Testing).unwrap();
    server.await.unwrap().unwrap();
    assert_eq!(0, registry.snapshot().len());
}
