use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Public base URL embedded in watch pages; always ends with `/`.
    pub public_url: String,
    /// Object gateway base URLs, one per upstream connection.
    pub upstreams: Vec<String>,
    /// Origin site for the reverse-proxy fallback.
    pub proxy_origin: Option<String>,
    pub resolve_timeout: Duration,
    pub chunk_timeout: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Byte-range streaming relay for messaging-backend objects")]
pub struct Args {
    /// Host to bind to (overrides MEDIA_RELAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIA_RELAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Public base URL used in generated links (overrides MEDIA_RELAY_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Object gateway URL; repeat for each upstream connection (overrides MEDIA_RELAY_UPSTREAMS)
    #[arg(long = "upstream")]
    pub upstreams: Vec<String>,

    /// Origin site for unrecognised paths (overrides MEDIA_RELAY_PROXY_ORIGIN)
    #[arg(long)]
    pub proxy_origin: Option<String>,

    /// Metadata lookup timeout in seconds (overrides MEDIA_RELAY_RESOLVE_TIMEOUT_SECS)
    #[arg(long)]
    pub resolve_timeout_secs: Option<u64>,

    /// Per-chunk pull timeout in seconds (overrides MEDIA_RELAY_CHUNK_TIMEOUT_SECS)
    #[arg(long)]
    pub chunk_timeout_secs: Option<u64>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::merge(Args::parse(), |key| env::var(key))
    }

    /// Merge parsed CLI args over values from `lookup` (the environment in production).
    fn merge<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        // --- Environment fallback ---
        let env_host = lookup("MEDIA_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env(&lookup, "MEDIA_RELAY_PORT", 8080u16)?;
        let env_resolve = parse_env(&lookup, "MEDIA_RELAY_RESOLVE_TIMEOUT_SECS", 15u64)?;
        let env_chunk = parse_env(&lookup, "MEDIA_RELAY_CHUNK_TIMEOUT_SECS", 30u64)?;
        let env_upstreams: Vec<String> = lookup("MEDIA_RELAY_UPSTREAMS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        // --- Merge ---
        let host = args.host.unwrap_or(env_host);
        let port = args.port.unwrap_or(env_port);
        let upstreams = if args.upstreams.is_empty() {
            env_upstreams
        } else {
            args.upstreams
        };
        if upstreams.is_empty() {
            bail!("at least one upstream is required (--upstream or MEDIA_RELAY_UPSTREAMS)");
        }

        let mut public_url = args
            .public_url
            .or_else(|| lookup("MEDIA_RELAY_PUBLIC_URL").ok())
            .unwrap_or_else(|| format!("http://{host}:{port}/"));
        if !public_url.ends_with('/') {
            public_url.push('/');
        }

        Ok(Self {
            host,
            port,
            public_url,
            upstreams,
            proxy_origin: args
                .proxy_origin
                .or_else(|| lookup("MEDIA_RELAY_PROXY_ORIGIN").ok()),
            resolve_timeout: Duration::from_secs(args.resolve_timeout_secs.unwrap_or(env_resolve)),
            chunk_timeout: Duration::from_secs(args.chunk_timeout_secs.unwrap_or(env_chunk)),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Result<String, env::VarError>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(
        vars: &[(&str, &str)],
    ) -> impl Fn(&str) -> Result<String, env::VarError> + use<> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned().ok_or(env::VarError::NotPresent)
    }

    fn args(cli: &[&str]) -> Args {
        Args::parse_from(std::iter::once("media-relay").chain(cli.iter().copied()))
    }

    #[test]
    fn env_supplies_defaults() {
        let cfg = AppConfig::merge(
            args(&[]),
            lookup(&[
                ("MEDIA_RELAY_UPSTREAMS", "http://a.local/, http://b.local/"),
                ("MEDIA_RELAY_PORT", "9000"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.upstreams, vec!["http://a.local/", "http://b.local/"]);
        assert_eq!(cfg.addr(), "0.0.0.0:9000");
        assert_eq!(cfg.public_url, "http://0.0.0.0:9000/");
        assert_eq!(cfg.resolve_timeout, Duration::from_secs(15));
        assert_eq!(cfg.proxy_origin, None);
    }

    #[test]
    fn cli_overrides_env() {
        let cfg = AppConfig::merge(
            args(&[
                "--upstream",
                "http://cli.local/",
                "--port",
                "7000",
                "--public-url",
                "https://relay.example",
                "--chunk-timeout-secs",
                "5",
            ]),
            lookup(&[
                ("MEDIA_RELAY_UPSTREAMS", "http://env.local/"),
                ("MEDIA_RELAY_PORT", "9000"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.upstreams, vec!["http://cli.local/"]);
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.public_url, "https://relay.example/");
        assert_eq!(cfg.chunk_timeout, Duration::from_secs(5));
    }

    #[test]
    fn missing_upstreams_is_an_error() {
        assert!(AppConfig::merge(args(&[]), lookup(&[])).is_err());
    }

    #[test]
    fn bad_port_is_reported_with_context() {
        let err = AppConfig::merge(
            args(&["--upstream", "http://a.local/"]),
            lookup(&[("MEDIA_RELAY_PORT", "eighty")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("MEDIA_RELAY_PORT"));
    }
}
