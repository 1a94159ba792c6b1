//! Portfolio session example
//!
//! Usage:
//!   cargo run --example portfolio_session
//!
//! Seed the session from the environment (tokens are issued by the FolioSim
//! sign-in flow, which is outside this crate):
//!   FOLIOSIM_ENDPOINT=http://localhost:8080 \
//!   FOLIOSIM_ACCESS_TOKEN=<jwt> FOLIOSIM_REFRESH_TOKEN=<token> \
//!   cargo run --example portfolio_session

use std::sync::Arc;

use foliosim_rs_client::{
    AuthHttpClient, MemoryTokenStore, RefreshServiceHttp, SessionContext, SessionState, TokenStore,
};
use reqwest::Method;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Configuration
    let endpoint =
        std::env::var("FOLIOSIM_ENDPOINT").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let access_token = std::env::var("FOLIOSIM_ACCESS_TOKEN").unwrap_or_default();
    let refresh_token = std::env::var("FOLIOSIM_REFRESH_TOKEN").unwrap_or_default();

    println!("=== FolioSim Rust Client Example ===");
    println!("Endpoint: {}", endpoint);
    println!();

    // Seed the store with the session issued at sign-in
    let store = MemoryTokenStore::new();
    if !access_token.is_empty() {
        store.set_tokens(&access_token, &refresh_token)?;
        println!("✓ Session tokens loaded from environment");
    } else {
        println!("! No FOLIOSIM_ACCESS_TOKEN set; requests will be sent anonymously");
    }
    println!();

    // Session context with deduplicated refresh (returns Arc for cheap cloning)
    let session = SessionContext::new(store, RefreshServiceHttp::new(endpoint.clone()));

    // Validation snapshot before any request
    let validation = session.manager().validate();
    println!("Token validation:");
    println!("  valid:             {}", validation.is_valid);
    println!("  expired:           {}", validation.is_expired);
    println!("  seconds remaining: {}", validation.seconds_remaining);
    if let Some(reason) = validation.reason {
        println!("  reason:            {}", reason);
    }
    println!();

    // Proactive refresh task (stops on logout; abort the handle to tear down)
    let refresh_task = session.spawn_auto_refresh();
    println!("✓ Auto-refresh task started");
    println!();

    // Authenticated client: injects the token, refreshes and retries once on 401
    let client = AuthHttpClient::new(Arc::clone(&session));

    println!("Fetching portfolio...");
    match client
        .send(client.request(Method::GET, format!("{endpoint}/portfolio")))
        .await
    {
        Ok(response) => {
            println!("✓ Response status: {}", response.status());
            let body = response.text().await.unwrap_or_default();
            if !body.is_empty() {
                println!("  Body: {}", body);
            }
        }
        Err(e) => {
            println!("! Request failed: {}", e);
            println!("  (This is expected if no FolioSim server is running)");
        }
    }
    println!();

    match session.state() {
        SessionState::Active => println!("Session is still active."),
        SessionState::LoggedOut => {
            println!("Session was logged out (refresh no longer possible).");
            println!("The surrounding app would now navigate to sign-in.");
        }
    }

    refresh_task.abort();
    println!();
    println!("Done!");

    Ok(())
}
