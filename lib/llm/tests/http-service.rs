// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};

#[path = "common/ports.rs"]
mod ports;
#[path = "common/server.rs"]
mod server;

use server::TestServer;

#[tokio::test]
async fn test_health_live_and_props() {
    let server = TestServer::start(&["tiny"], |_, _| {}).await;

    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    let (status, _) = server.get("/live").await;
    assert_eq!(status, 200);

    let (status, props) = server.get("/props").await;
    assert_eq!(status, 200);
    assert_eq!(props["model_alias"], "tiny");
    assert_eq!(props["total_slots"], 2);
    assert_eq!(props["default_generation_settings"]["n_ctx"], 128);
    assert_eq!(props["slot_lifecycle_mode"], "conservative");

    let (status, body) = server.get("/props?model=nope").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["type"], "not_found_error");

    server.shutdown().await;
}

#[tokio::test]
async fn test_completion_reuses_slot_prefix() {
    let server = TestServer::start(&["tiny"], |_, _| {}).await;

    let (status, first) = server.complete("tiny", "hello there", 0).await;
    assert_eq!(status, 200, "{first}");
    assert_eq!(first["id_slot"], 0);
    assert_eq!(first["stop"], true);
    assert_eq!(first["tokens_predicted"], 4);
    assert_eq!(first["timings"]["prompt_n"], 12);
    assert_eq!(first["timings"]["cache_n"], 0);
    assert_eq!(first["slot_lifecycle"]["enabled"], false);
    assert_eq!(first["slot_lifecycle"]["save_decision"], "skipped_disabled");

    let (status, second) = server.complete("tiny", "hello there", 0).await;
    assert_eq!(status, 200, "{second}");
    assert_eq!(second["timings"]["cache_n"], 11);
    assert_eq!(second["timings"]["prompt_n"], 1);
    assert_eq!(second["content"], first["content"]);

    let (_, slots) = server.get("/slots").await;
    let slot = &slots.as_array().unwrap()[0];
    assert_eq!(slot["id"], 0);
    assert_eq!(slot["is_processing"], false);
    assert_eq!(slot["n_past"], 15);
    assert!(slot.get("params").is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn test_completion_validation_errors() {
    let server = TestServer::start(&["tiny"], |_, _| {}).await;

    let response = server
        .client
        .post(server.url("/completion"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let (status, body) = server.complete("tiny", "hi", 7).await;
    assert_eq!(status, 404, "{body}");

    let long_prompt = "x".repeat(300);
    let (status, body) = server.complete("tiny", &long_prompt, 0).await;
    assert_eq!(status, 400, "{body}");
    assert_eq!(body["error"]["type"], "invalid_request_error");

    server.shutdown().await;
}

#[tokio::test]
async fn test_completion_stream_carries_summary_on_last_chunk() {
    let server = TestServer::start(&["tiny"], |_, _| {}).await;

    let events = server
        .stream(
            "/completion",
            json!({"prompt": "stream me", "n_predict": 3, "stream": true, "ignore_eos": true}),
        )
        .await;
    assert!(!events.iter().any(|e| e == "[DONE]"));

    let chunks: Vec<Value> = events
        .iter()
        .map(|e| serde_json::from_str(e).unwrap())
        .collect();
    let (last, deltas) = chunks.split_last().unwrap();
    let n_tokens: usize = deltas
        .iter()
        .map(|chunk| {
            assert_eq!(chunk["stop"], false);
            assert!(chunk.get("slot_lifecycle").is_none());
            chunk["tokens"].as_array().unwrap().len()
        })
        .sum();
    assert_eq!(n_tokens, 3);
    assert_eq!(last["stop"], true);
    assert_eq!(last["tokens_predicted"], 3);
    assert!(last["slot_lifecycle"].is_object());

    server.shutdown().await;
}

#[tokio::test]
async fn test_chat_completion_unary_and_stream() {
    let server = TestServer::start(&["tiny"], |_, _| {}).await;

    let request = json!({
        "model": "tiny",
        "messages": [{"role": "user", "content": "hi"}],
        "max_tokens": 3,
        "ignore_eos": true,
    });
    let (status, body) = server.post("/v1/chat/completions", request.clone()).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "tiny");
    assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["usage"]["completion_tokens"], 3);

    let mut request = request;
    request["stream"] = json!(true);
    let events = server.stream("/chat/completions", request).await;
    assert_eq!(events.last().unwrap(), "[DONE]");
    let chunks: Vec<Value> = events[..events.len() - 1]
        .iter()
        .map(|e| serde_json::from_str(e).unwrap())
        .collect();
    assert!(chunks.iter().all(|c| c["object"] == "chat.completion.chunk"));
    let last = chunks.last().unwrap();
    assert_eq!(last["choices"][0]["finish_reason"], "length");
    assert!(last["slot_lifecycle"].is_object());

    server.shutdown().await;
}

#[tokio::test]
async fn test_api_key() {
    let server = TestServer::start(&["tiny"], |config, _| {
        config.api_key = Some("sekret".to_string());
    })
    .await;

    // public routes
    let (status, _) = server.get("/health").await;
    assert_eq!(status, 200);
    let (status, _) = server.get("/v1/models").await;
    assert_eq!(status, 200);

    let (status, body) = server.get("/slots").await;
    assert_eq!(status, 401);
    assert_eq!(body["error"]["type"], "authentication_error");

    let response = server
        .client
        .get(server.url("/slots"))
        .header("authorization", "Bearer wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = server
        .client
        .get(server.url("/slots"))
        .bearer_auth("sekret")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = server
        .client
        .post(server.url("/completion"))
        .header("x-api-key", "sekret")
        .json(&json!({"prompt": "hi", "n_predict": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    server.shutdown().await;
}

#[tokio::test]
async fn test_manual_save_erase_restore() {
    let server = TestServer::start(&["tiny"], |config, slots| {
        config.slot_save_path = Some(slots);
        config.slot_lifecycle = "off".parse().unwrap();
        config.checkpoint_interval = 4;
    })
    .await;
    let slots_dir = server.dir.path().join("slots");

    let (status, _) = server.complete("tiny", "remember this", 1).await;
    assert_eq!(status, 200);

    let (status, saved) = server
        .post("/slots/1?action=save", json!({"filename": "manual.bin"}))
        .await;
    assert_eq!(status, 200, "{saved}");
    assert_eq!(saved["id_slot"], 1);
    assert_eq!(saved["filename"], "manual.bin");
    let n_saved = saved["n_saved"].as_u64().unwrap();
    assert!(n_saved > 0);
    assert!(saved["n_checkpoints"].as_u64().unwrap() > 0);
    assert!(slots_dir.join("manual.bin").is_file());
    assert!(slots_dir.join("manual.bin.ctxchk").is_file());

    let (status, erased) = server.post("/slots/1?action=erase", json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(erased["n_erased"].as_u64().unwrap(), n_saved);

    let (status, restored) = server
        .post("/slots/1?action=restore", json!({"filename": "manual.bin"}))
        .await;
    assert_eq!(status, 200, "{restored}");
    assert_eq!(restored["n_restored"].as_u64().unwrap(), n_saved);
    assert_eq!(restored["restore_quality"], "full");

    // without the sidecar only the primary file is used
    std::fs::remove_file(slots_dir.join("manual.bin.ctxchk")).unwrap();
    let (status, restored) = server
        .post("/slots/1?action=restore", json!({"filename": "manual.bin"}))
        .await;
    assert_eq!(status, 200, "{restored}");
    assert_eq!(restored["restore_quality"], "partial_legacy");
    assert_eq!(restored["n_restored"].as_u64().unwrap(), n_saved);

    // canonical filename when none is given
    let (status, saved) = server.post("/slots/0?action=save", json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(saved["filename"], "tiny.slot-0.bin");

    let (status, body) = server
        .post("/slots/0?action=restore", json!({"filename": "../escape.bin"}))
        .await;
    assert_eq!(status, 400, "{body}");

    let (status, body) = server
        .post("/slots/0?action=restore", json!({"filename": "absent.bin"}))
        .await;
    assert_eq!(status, 404, "{body}");

    let (status, body) = server.post("/slots/0?action=shuffle", json!({})).await;
    assert_eq!(status, 400, "{body}");

    let (_, diagnostics) = server.get("/slots?diagnostics=1").await;
    assert_eq!(diagnostics["diagnostics"]["n_slot_save_total"], 2);
    assert_eq!(diagnostics["diagnostics"]["n_slot_restore_total"], 2);
    assert_eq!(diagnostics["diagnostics"]["n_slots_processing"], 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_restore_into_other_slot_keeps_source() {
    let server = TestServer::start(&["tiny"], |config, slots| {
        config.slot_save_path = Some(slots);
        config.slot_lifecycle = "off".parse().unwrap();
    })
    .await;

    let (status, _) = server.complete("tiny", "shared prefix", 1).await;
    assert_eq!(status, 200);
    let (status, saved) = server
        .post("/slots/1?action=save", json!({"filename": "copy.bin"}))
        .await;
    assert_eq!(status, 200);

    let (status, restored) = server
        .post("/slots/0?action=restore", json!({"filename": "copy.bin"}))
        .await;
    assert_eq!(status, 200, "{restored}");
    assert_eq!(restored["n_restored"], saved["n_saved"]);

    // both slots now serve the prompt from cache
    for id_slot in [1, 0] {
        let (status, body) = server.complete("tiny", "shared prefix", id_slot).await;
        assert_eq!(status, 200);
        assert_eq!(body["timings"]["prompt_n"], 1, "slot {id_slot}: {body}");
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_disabled_endpoints_are_not_supported() {
    let server = TestServer::start(&["tiny"], |config, _| {
        config.endpoint_props = false;
    })
    .await;

    let (status, body) = server.post("/slots/0?action=save", json!({})).await;
    assert_eq!(status, 501, "{body}");
    assert_eq!(body["error"]["type"], "not_supported_error");

    let (status, _) = server.get("/props").await;
    assert_eq!(status, 501);

    let (status, _) = server.get("/metrics").await;
    assert_eq!(status, 501);

    server.shutdown().await;

    let server = TestServer::start(&["tiny"], |config, _| {
        config.endpoint_slots = false;
    })
    .await;
    let (status, _) = server.get("/slots").await;
    assert_eq!(status, 501);
    server.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_bootstraps_checkpoint() {
    let server = TestServer::start(&["tiny"], |config, slots| {
        config.slot_save_path = Some(slots);
    })
    .await;

    let (status, body) = server.complete("tiny", "first contact", 0).await;
    assert_eq!(status, 200, "{body}");
    let lifecycle = &body["slot_lifecycle"];
    assert_eq!(lifecycle["enabled"], true);
    assert_eq!(lifecycle["restore_attempted"], true);
    assert_eq!(lifecycle["restore_success"], false);
    assert_eq!(lifecycle["restore_quality"], "missing");
    assert_eq!(lifecycle["save_decision"], "save_succeeded");
    assert!(server
        .dir
        .path()
        .join("slots")
        .join("tiny.slot-0.bin")
        .is_file());

    // warm slot: no restore, high reuse, saved again
    let (_, body) = server.complete("tiny", "first contact", 0).await;
    let lifecycle = &body["slot_lifecycle"];
    assert_eq!(lifecycle["restore_attempted"], false);
    assert_eq!(lifecycle["save_decision"], "save_succeeded");

    // warm slot, unrelated prompt: reuse guard skips the save
    let (_, body) = server.complete("tiny", "zzzzzzzzzzzz", 0).await;
    assert_eq!(
        body["slot_lifecycle"]["save_decision"],
        "skipped_guard_low_reuse"
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_strict_lifecycle_requires_checkpoint() {
    let server = TestServer::start(&["tiny"], |config, slots| {
        config.slot_save_path = Some(slots);
        config.slot_lifecycle = "strict".parse().unwrap();
    })
    .await;

    let (status, body) = server.complete("tiny", "no checkpoint yet", 0).await;
    assert_eq!(status, 503, "{body}");
    assert_eq!(body["error"]["type"], "unavailable_error");

    // a manual save seeds the checkpoint and strict serving succeeds
    let (status, _) = server.post("/slots/0?action=save", json!({})).await;
    assert_eq!(status, 200);
    let (status, body) = server.complete("tiny", "no checkpoint yet", 0).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["slot_lifecycle"]["restore_success"], true);

    server.shutdown().await;
}

#[tokio::test]
async fn test_metrics_exposition() {
    let server = TestServer::start(&["tiny"], |config, slots| {
        config.slot_save_path = Some(slots);
        config.endpoint_metrics = true;
    })
    .await;

    let (status, _) = server.complete("tiny", "count me", 0).await;
    assert_eq!(status, 200);

    let response = server.client.get(server.url("/metrics")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let text = response.text().await.unwrap();
    assert!(text.contains("slotrouter:slot_save_total 1"), "{text}");
    assert!(text.contains("slotrouter:slot_restore_total"), "{text}");
    assert!(text.contains("slotrouter_requests_total"), "{text}");
    assert!(text.contains("slotrouter_models_resident 1"), "{text}");

    server.shutdown().await;
}

#[tokio::test]
async fn test_client_disconnect_releases_slot() {
    let server = TestServer::start(&["tiny"], |config, slots| {
        config.slot_save_path = Some(slots);
        config.mock_decode_us_per_token = 20_000;
    })
    .await;

    let response = server
        .client
        .post(server.url("/completion"))
        .json(&json!({
            "prompt": "long answer",
            "n_predict": 100,
            "stream": true,
            "id_slot": 0,
            "ignore_eos": true,
        }))
        .send()
        .await
        .unwrap();
    let mut body = response.bytes_stream();
    let first = body.next().await.unwrap().unwrap();
    assert!(!first.is_empty());
    drop(body);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let (_, slots) = server.get("/slots").await;
        let slot = &slots.as_array().unwrap()[0];
        if slot["is_processing"] == false && slot["lifecycle"]["last"].is_object() {
            assert_eq!(
                slot["lifecycle"]["last"]["save_decision"],
                "skipped_cancelled"
            );
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "slot was not released: {slot}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!server
        .dir
        .path()
        .join("slots")
        .join("tiny.slot-0.bin")
        .exists());

    server.shutdown().await;
}
