//! Config file loading and secret resolution.
//!
//! Credentials and URLs may reference environment variables as `${NAME}`.
//! They are expanded after parsing, so secrets never have to live in the file.

use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;

use quoteflow_core::{Credentials, EngineConfig};

pub fn load(path: &Path) -> Result<EngineConfig> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    let mut config: EngineConfig = toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    resolve_secrets(&mut config, |name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

pub fn resolve_secrets<F>(config: &mut EngineConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    for provider in &mut config.providers {
        let id = provider.id.clone();
        provider.url = expand(&provider.url, &lookup).with_context(|| format!("provider {id} url"))?;
        resolve_credentials(&mut provider.credentials, &lookup).with_context(|| format!("provider {id} credentials"))?;
    }
    Ok(())
}

fn resolve_credentials<F>(creds: &mut Credentials, lookup: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    for field in [
        &mut creds.token,
        &mut creds.username,
        &mut creds.password,
        &mut creds.api_key,
        &mut creds.account_id,
        &mut creds.server,
    ] {
        if let Some(value) = field.as_mut() {
            *value = expand(value, lookup)?;
        }
    }
    Ok(())
}

/// Replace every `${NAME}` in `value`. Unset variables are an error.
fn expand<F>(value: &str, lookup: &F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| anyhow!("unterminated ${{ in {value:?}"))?;
        let name = &after[..end];
        if name.is_empty() {
            bail!("empty variable name in {value:?}");
        }
        let resolved = lookup(name).ok_or_else(|| anyhow!("environment variable {name} is not set"))?;
        out.push_str(&resolved);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
event_buffer = 1024

[cache]
staleness_window_ms = 30000

[scanner]
min_spread = 0.0003
symbol_thresholds = { USDJPY = 0.03 }

[[providers]]
id = "oanda"
kind = "oanda"
url = "wss://stream-fxtrade.oanda.com/v3/accounts/{account_id}/pricing/stream"
auth = "token"
symbols = ["EUR_USD", "USD_JPY"]
credentials = { token = "${OANDA_TOKEN}", account_id = "${OANDA_ACCOUNT}" }

[[providers]]
id = "exness"
kind = "exness"
url = "wss://${EXNESS_HOST}/quotes"
auth = "basic-credentials"
symbols = ["EURUSDm"]
credentials = { username = "${EXNESS_LOGIN}", password = "${EXNESS_PASSWORD}" }
reconnect = { initial_delay_ms = 1000, max_attempts = 5 }
"#;

    fn env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("OANDA_TOKEN", "tok"),
            ("OANDA_ACCOUNT", "001-001"),
            ("EXNESS_HOST", "quotes.example.test"),
            ("EXNESS_LOGIN", "42"),
            ("EXNESS_PASSWORD", "secret"),
        ])
    }

    #[test]
    fn test_sample_config_resolves() {
        let env = env();
        let mut config: EngineConfig = toml::from_str(SAMPLE).unwrap();
        tokio_test::assert_ok!(resolve_secrets(&mut config, |name| env.get(name).map(|v| v.to_string())));
        tokio_test::assert_ok!(config.validate());

        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].credentials.token.as_deref(), Some("tok"));
        assert_eq!(config.providers[1].url, "wss://quotes.example.test/quotes");
        assert_eq!(config.providers[1].reconnect.max_attempts, 5);
        assert_eq!(config.scanner.symbol_thresholds["USDJPY"], 0.03);
    }

    #[test]
    fn test_example_config_is_valid() {
        let raw = include_str!("../config/quoteflow.example.toml");
        let mut config: EngineConfig = toml::from_str(raw).unwrap();
        resolve_secrets(&mut config, |_| Some("x".to_string())).unwrap();
        tokio_test::assert_ok!(config.validate());
        assert_eq!(config.providers.len(), 5);
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let mut config: EngineConfig = toml::from_str(SAMPLE).unwrap();
        let err = resolve_secrets(&mut config, |_| None).unwrap_err();
        assert!(format!("{err:#}").contains("OANDA_TOKEN") || format!("{err:#}").contains("EXNESS_HOST"));
    }

    #[test]
    fn test_expand_edge_cases() {
        let lookup = |name: &str| (name == "A").then(|| "x".to_string());
        assert_eq!(expand("plain", &lookup).unwrap(), "plain");
        assert_eq!(expand("${A}-${A}", &lookup).unwrap(), "x-x");
        assert!(expand("${A", &lookup).is_err());
        assert!(expand("${}", &lookup).is_err());
    }
}
