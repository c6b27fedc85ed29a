//! Two-context echo walkthrough.
//!
//! Run with: cargo run --example echo
//!
//! Wires a host emitter and an embedded receiver over the in-memory
//! transport, performs the handshake, and exercises:
//! 1. echo - round-trip request over the dedicated channel
//! 2. fail - remote-reported error payload
//! 3. unknown type - code-501 refusal
//! 4. disconnect - guarded requests fail fast afterwards

use serde_json::json;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use framelink::channel::HandlerRegistry;
use framelink::config::{EmitterConfig, ReceiverConfig};
use framelink::emitter::Emitter;
use framelink::receiver::Receiver;
use framelink::transport::embedded_pair;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    println!("=== Framelink Echo Demo ===\n");

    let (target, handle) = embedded_pair();

    // The embedded context serves echo and fail.
    let handlers = HandlerRegistry::new()
        .register("echo", |data, responder| async move {
            responder.success(data);
            Ok(())
        })
        .register("fail", |_data, responder| async move {
            responder.error(Some("refused by the embedded context".to_string()), Some(400));
            Ok(())
        });
    let receiver = Receiver::new(handle, handlers, ReceiverConfig::default());

    let emitter = Emitter::new(target, HandlerRegistry::new(), EmitterConfig::default());

    // Handshake: the embedded context loads, announces readiness, and the
    // host upgrades the shared surface into a dedicated channel.
    receiver.mark_loaded();
    let ready = {
        let receiver = receiver.clone();
        tokio::spawn(async move { receiver.ready().await })
    };
    emitter.connect(false).await?;
    ready.await??;
    println!("Handshake complete, connected: {}\n", emitter.connected());

    // Test 1: echo
    println!("Test 1: echo");
    let response = emitter
        .post_formatted_request("echo", Some(json!({"foo": "bar"})), None)
        .await?;
    println!("Response: {}\n", serde_json::to_string_pretty(&response.data)?);

    // Test 2: remote-reported error
    println!("Test 2: fail");
    match emitter.post_formatted_request("fail", None, None).await {
        Ok(_) => println!("Unexpected success\n"),
        Err(error) => println!("Rejected as expected: {error}\n"),
    }

    // Test 3: unknown request type
    println!("Test 3: unknown request type");
    match emitter.post_formatted_request("mystery", None, None).await {
        Ok(_) => println!("Unexpected success\n"),
        Err(error) => println!("Rejected as expected: {error}\n"),
    }

    // Test 4: disconnect
    println!("Test 4: disconnect");
    emitter.disconnect();
    match emitter.post_formatted_request("echo", None, None).await {
        Ok(_) => println!("Unexpected success"),
        Err(error) => println!("Rejected as expected: {error}"),
    }

    Ok(())
}
