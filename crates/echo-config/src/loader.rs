// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Parse a configuration from YAML text.
///
/// An empty or whitespace-only document yields [`Config::default`].  File
/// discovery is the embedder's concern; this crate only defines the schema
/// and parsing.
pub fn from_yaml_str(text: &str) -> anyhow::Result<Config> {
    if text.trim().is_empty() {
        return Ok(Config::default());
    }
    let value: serde_yaml::Value = serde_yaml::from_str(text).context("parsing config YAML")?;
    debug!("loaded config layer");
    serde_yaml::from_value(value).context("deserializing config")
}

/// Deep-merge `src` into `dst`; `src` wins on scalar conflicts.
///
/// Lets an embedder stack configuration layers (system, user, workspace)
/// before deserializing the merged document.
pub fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                match d.get_mut(&k) {
                    Some(slot) => merge_yaml(slot, v),
                    None => {
                        d.insert(k, v);
                    }
                }
            }
        }
        (dst, src) => *dst = src,
    }
}
