use crate::error::{Error, Result};
use crate::services::labels::LabelSpec;
use std::env;
use std::ffi::OsString;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Every variable with this prefix declares a custom label.
pub const LABEL_ENV_PREFIX: &str = "LABEL_";
pub const ADDR_ENV: &str = "ADDR";
pub const SCRAPE_TIMEOUT_ENV: &str = "SCRAPE_TIMEOUT_SECONDS";

pub const DEFAULT_ADDR: &str = ":9338";
pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(30);

/// Process configuration, read once at startup.
#[derive(Debug)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub labels: LabelSpec,
    pub scrape_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(unicode_vars(env::vars_os())?)
    }

    /// Builds the configuration from `(name, value)` environment pairs.
    ///
    /// `LABEL_<name>=<template>` declares a label, `ADDR` overrides the listen
    /// address and `SCRAPE_TIMEOUT_SECONDS` bounds a single scrape. Empty values
    /// of `ADDR` and `SCRAPE_TIMEOUT_SECONDS` mean the default.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut addr = None;
        let mut timeout = None;
        let mut labels = Vec::new();

        for (name, value) in vars {
            if let Some(label) = name.strip_prefix(LABEL_ENV_PREFIX) {
                labels.push((label.to_owned(), value));
            } else if name == ADDR_ENV && !value.is_empty() {
                addr = Some(value);
            } else if name == SCRAPE_TIMEOUT_ENV && !value.is_empty() {
                timeout = Some(value);
            }
        }

        Ok(Self {
            listen_addr: parse_listen_addr(addr.as_deref().unwrap_or(DEFAULT_ADDR))?,
            labels: LabelSpec::new(labels)?,
            scrape_timeout: match timeout {
                Some(timeout) => parse_timeout(&timeout)?,
                None => DEFAULT_SCRAPE_TIMEOUT,
            },
        })
    }
}

/// Keeps the variables that are valid unicode.
///
/// A variable this process reads (`LABEL_*`, `ADDR`, `SCRAPE_TIMEOUT_SECONDS`)
/// that is not valid unicode is an error; any other such variable is skipped.
fn unicode_vars<I>(vars: I) -> Result<Vec<(String, String)>>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut valid = Vec::new();
    for (name, value) in vars {
        match (name.into_string(), value.into_string()) {
            (Ok(name), Ok(value)) => valid.push((name, value)),
            (name, _) => {
                let name = match name {
                    Ok(name) => name,
                    Err(name) => name.to_string_lossy().into_owned(),
                };
                if is_read(&name) {
                    return Err(Error::NonUnicodeVariable(name));
                }
                log::debug!("skipping environment variable {:?}: not valid unicode", name);
            }
        }
    }
    Ok(valid)
}

fn is_read(name: &str) -> bool {
    name.starts_with(LABEL_ENV_PREFIX) || name == ADDR_ENV || name == SCRAPE_TIMEOUT_ENV
}

/// Accepts `host:port` as well as `:port`, which listens on all interfaces.
fn parse_listen_addr(addr: &str) -> Result<SocketAddr> {
    let normalized = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_owned()
    };

    normalized
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| Error::InvalidListenAddress(addr.to_owned()))
}

fn parse_timeout(value: &str) -> Result<Duration> {
    match value.trim().parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds > 0.0 => Ok(Duration::from_secs_f64(seconds)),
        _ => Err(Error::InvalidScrapeTimeout(value.to_owned())),
    }
}
