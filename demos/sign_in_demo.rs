//! Walks through a Sign in with Apple login from the command line.
//!
//! ```text
//! # 1. Print the authorization URL and the state to keep.
//! cargo run --example sign_in_demo -- demos/apple_config.yaml
//!
//! # 2. Complete the login with the body Apple posted to the redirect URI.
//! cargo run --example sign_in_demo -- demos/apple_config.yaml '<form body>' '<state json>'
//! ```
//!
//! Set `RUST_LOG=nila_apple_signin=debug` to follow the verification steps.

use nila_apple_signin::prelude::*;
use std::env;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        error!("Sign in failed: {}", e);
        if e.downcast_ref::<NilaAppleError>().is_some_and(NilaAppleError::is_retryable) {
            error!("The provider could not be reached; the login may be retried.");
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| "demos/apple_config.yaml".to_string());
    let form_body = args.next();
    let state_json = args.next();

    let config = ConfigBuilder::from_yaml_file(&config_path)?.build()?;
    info!("Loaded configuration for client '{}' from {}", config.client_id, config_path);

    let client = AuthFlowClient::with_key_cache(config, KeySetCache::shared()?)?;

    let Some(form_body) = form_body else {
        let request = client.authorization_request();
        println!("Open this URL to sign in:\n\n  {}\n", request.url);
        if let Some(state) = &request.state {
            println!("Keep this state for the callback:\n\n  {}\n", serde_json::to_string(state)?);
        }
        return Ok(());
    };

    let params = CallbackParams::from_form(&form_body)?;
    let expected: Option<AuthState> = state_json.as_deref().map(serde_json::from_str).transpose()?;

    let identity = client.callback(params, expected).await?;
    println!("{}", serde_json::to_string_pretty(&identity)?);
    Ok(())
}
