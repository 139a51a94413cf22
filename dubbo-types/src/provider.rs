use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{ParseError, ParseResult};

/// Parameter key that is stripped on parse and (re-)assigned exactly once,
/// immediately before a provider is published to the destination registry.
///
/// Keeping it out of `params` for the lifetime of a provider between parse
/// and publish is what makes [`Provider::key`] timestamp-independent — see
/// the reconciliation-key hazard discussion in the design notes.
pub const TIMESTAMP_PARAM: &str = "timestamp";

/// The canonical in-memory record of a Dubbo service instance.
///
/// `params` is a `BTreeMap` rather than a `HashMap` so that iteration order
/// is deterministic for free: [`Provider::serialize`] relies on ascending
/// key order without a separate sort step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    pub scheme: String,
    pub addr: String,
    pub service: String,
    pub params: BTreeMap<String, String>,
}

impl Provider {
    pub fn new(scheme: impl Into<String>, addr: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            addr: addr.into(),
            service: service.into(),
            params: BTreeMap::new(),
        }
    }

    /// Parses a URL-encoded Dubbo provider string as used for ZooKeeper
    /// node names.
    ///
    /// Percent-decodes once, then splits on the literal delimiters
    /// `"://"`, `"/"`, `"?"`, `"&"`, and `"="` — each exactly once at the
    /// first occurrence for the structural delimiters, per spec. `timestamp`
    /// params are dropped so identity survives timestamp churn.
    pub fn parse(url: &str) -> ParseResult<Self> {
        let decoded = urlencoding::decode(url).map_err(|source| ParseError::Decode {
            url: url.to_string(),
            source,
        })?;
        let decoded = decoded.as_ref();

        let (scheme, rest) = decoded
            .split_once("://")
            .ok_or_else(|| ParseError::MissingSchemeDelimiter { url: url.to_string() })?;

        let (addr, rest) = rest
            .split_once('/')
            .ok_or_else(|| ParseError::MissingServiceDelimiter { url: url.to_string() })?;
        if addr.is_empty() {
            return Err(ParseError::EmptyAddr { url: url.to_string() });
        }

        let (service, query) = rest
            .split_once('?')
            .ok_or_else(|| ParseError::MissingQueryDelimiter { url: url.to_string() })?;
        if service.is_empty() {
            return Err(ParseError::EmptyService { url: url.to_string() });
        }

        let mut params = BTreeMap::new();
        if !query.is_empty() {
            for segment in query.split('&') {
                let (k, v) = segment.split_once('=').ok_or_else(|| ParseError::MalformedParam {
                    url: url.to_string(),
                    segment: segment.to_string(),
                })?;
                if k == TIMESTAMP_PARAM {
                    continue;
                }
                params.insert(k.to_string(), v.to_string());
            }
        }

        Ok(Provider {
            scheme: scheme.to_string(),
            addr: addr.to_string(),
            service: service.to_string(),
            params,
        })
    }

    /// `"{scheme}://{addr}/{service}"` — the identity used for all set
    /// arithmetic. Parameter differences never affect it.
    pub fn key(&self) -> String {
        format!("{}://{}/{}", self.scheme, self.addr, self.service)
    }

    /// The canonical string stored as the ZooKeeper leaf node name: the key
    /// plus a `?`-prefixed query string with params sorted ascending by key.
    pub fn serialize(&self) -> String {
        let query = self
            .params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.key(), query)
    }

    /// Assigns `params["timestamp"]` to the current Unix time in seconds.
    ///
    /// Must be invoked exactly once, immediately before destination
    /// publication — never while merely comparing providers, or the
    /// reconciler would flap every cycle (see the timestamp-churn
    /// regression this guards against).
    pub fn set_timestamp(&mut self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.params.insert(TIMESTAMP_PARAM.to_string(), now.to_string());
    }

    /// URL-escapes [`Provider::serialize`]'s output for use as a ZooKeeper
    /// node name.
    pub fn escaped_node_name(&self) -> String {
        urlencoding::encode(&self.serialize()).into_owned()
    }
}
