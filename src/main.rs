use std::process::ExitCode;

use axum::body::Bytes;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Request, StatusCode};
use lambda_stdio::config::{self, Config};
use lambda_stdio::proxy::{EVENT_HEADER, ProxyHandler, ResponseCollector};
use log::{error, info, warn};
use serde_json::json;

/// Reflects the incoming request back as JSON.
fn echo(request: Request<Bytes>, response: &mut ResponseCollector) {
    let headers: serde_json::Map<String, serde_json::Value> = request
        .headers()
        .iter()
        .filter(|(name, _)| name.as_str() != EVENT_HEADER)
        .map(|(name, value)| {
            (
                name.to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned().into(),
            )
        })
        .collect();
    let body = json!({
        "method": request.method().as_str(),
        "uri": request.uri().to_string(),
        "headers": headers,
        "body": String::from_utf8_lossy(request.body()),
    });

    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response.write_header(StatusCode::OK);
    if let Err(e) = serde_json::to_writer(response, &body) {
        warn!("failed to write echo body: {}", e);
    }
}

fn main() -> ExitCode {
    // the env file may set RUST_LOG and LAMBDA_STDIO_*, so seed it before
    // anything else reads the environment
    let env_file = Config::from_env()
        .map(|c| c.env_file)
        .unwrap_or_else(|_| config::ENV_FILE.into());
    let seeded = config::load_env_file(&env_file);
    if let Ok(vars) = &seeded {
        config::apply_env(vars);
    }

    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    match seeded {
        Ok(vars) if !vars.is_empty() => info!("seeded {} env vars from {}", vars.len(), env_file.display()),
        Ok(_) => {}
        Err(e) => warn!("ignoring env file: {}", e),
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let handler = ProxyHandler::new(echo, config.text_content_types.clone());
    match runtime.block_on(lambda_stdio::run_stdio(handler, &config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
