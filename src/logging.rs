use std::collections::HashMap;

use serde_json::Value;
use tracing::{Span, info_span};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

const SENSITIVE_KEYS: [&str; 6] = ["password", "otp", "token", "pin", "secret", "authorization"];
const REDACTED: &str = "****";

/// Installs the global subscriber. `RUST_LOG` wins over the default filter.
pub fn init(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("notification_service=info,tower_http=info"));

    let registry = tracing_subscriber::registry().with(filter);

    if config.log_format.eq_ignore_ascii_case("json") {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

/// Span carried by every task of the process.
pub fn root_span(config: &Config) -> Span {
    info_span!(
        "service",
        service = %config.service_name,
        environment = %config.environment,
        version = %config.version
    )
}

/// Template data with secret-looking values masked, for logging only.
pub fn redact(data: &HashMap<String, Value>) -> Value {
    let masked = data
        .iter()
        .map(|(key, value)| {
            let lowered = key.to_ascii_lowercase();
            let value = if SENSITIVE_KEYS.iter().any(|s| lowered.contains(s)) {
                Value::String(REDACTED.to_string())
            } else {
                value.clone()
            };
            (key.clone(), value)
        })
        .collect();

    Value::Object(masked)
}
