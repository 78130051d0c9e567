// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use slotrouter_llm::config::ServerConfig;
use slotrouter_llm::http::service::service_v2::HttpService;
use slotrouter_llm::router::ModelSpec;
use slotrouter_runtime::CancellationToken;
use tokio::task::JoinHandle;

use super::ports::{get_random_port, wait_for_service_ready};

/// A running service on a random port, with model files and checkpoints in a temp dir.
pub struct TestServer {
    pub base: String,
    pub client: reqwest::Client,
    pub dir: tempfile::TempDir,
    cancel: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

/// Create empty model files named `<id>.gguf` and return their specs.
pub fn model_files(dir: &tempfile::TempDir, ids: &[&str]) -> Vec<ModelSpec> {
    ids.iter()
        .map(|id| {
            let path = dir.path().join(format!("{id}.gguf"));
            std::fs::write(&path, b"GGUF").unwrap();
            ModelSpec::new(*id, path)
        })
        .collect()
}

impl TestServer {
    /// `configure` receives a config with the models registered and the port set.
    pub async fn start(ids: &[&str], configure: impl FnOnce(&mut ServerConfig, PathBuf)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let port = get_random_port().await;
        let mut config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port,
            n_ctx: 256,
            n_slots: 2,
            temperature: 0.0,
            models: model_files(&dir, ids),
            ..Default::default()
        };
        configure(&mut config, dir.path().join("slots"));

        let service = HttpService::builder().config(config).build().unwrap();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { service.run(token).await });
        wait_for_service_ready(port).await;

        TestServer {
            base: format!("http://127.0.0.1:{port}"),
            client: reqwest::Client::new(),
            dir,
            cancel,
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn get(&self, path: &str) -> (u16, Value) {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    pub async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let response = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    /// A greedy, EOS-free completion on a fixed slot.
    pub async fn complete(&self, model: &str, prompt: &str, id_slot: i64) -> (u16, Value) {
        self.post(
            "/completion",
            serde_json::json!({
                "model": model,
                "prompt": prompt,
                "n_predict": 4,
                "id_slot": id_slot,
                "ignore_eos": true,
            }),
        )
        .await
    }

    /// POST a streaming request and return the JSON payload of every `data:` line.
    pub async fn stream(&self, path: &str, body: Value) -> Vec<String> {
        let response = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let text = response.text().await.unwrap();
        text.lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|data| data.trim().to_string())
            .filter(|data| !data.is_empty())
            .collect()
    }

    pub async fn model_status(&self, model: &str) -> String {
        let (_, body) = self.get("/models").await;
        body["data"]
            .as_array()
            .unwrap()
            .iter()
            .find(|m| m["id"] == model)
            .map(|m| m["status"]["value"].as_str().unwrap().to_string())
            .unwrap()
    }

    pub async fn wait_for_status(&self, model: &str, status: &str, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.model_status(model).await == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("model {model} did not reach status {status}");
    }

    /// Stop the service and hand back the temp dir, which outlives the server.
    pub async fn shutdown(self) -> tempfile::TempDir {
        self.cancel.cancel();
        self.task.await.unwrap().unwrap();
        self.dir
    }
}
