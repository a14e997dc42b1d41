// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Operator-configured recipients counted as local deliveries.
//!
//! Each entry is given on the command line as `substring,label,count`, for example
//! `@lists.example.org,lists,yes`. All substrings are combined into one alternation and
//! searched for in the `to=<...>` address of `local` deliveries.

use crate::errors::ConfigError;
use crate::util::is_truthy;
use fnv::FnvHashMap;
use regex::Regex;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAddressEntry {
    pub match_key: String,
    pub label: String,
    /// Whether matches also feed the `messages.in.*` status and response code counters.
    pub count_in_status: bool,
}

impl FromStr for LocalAddressEntry {
    type Err = ConfigError;

    fn from_str(tuple: &str) -> Result<Self, Self::Err> {
        let stripped = tuple.trim().trim_start_matches('(').trim_end_matches(')');
        let fields: Vec<&str> = stripped.split(',').map(str::trim).collect();

        let [match_key, label, count] = fields.as_slice() else {
            return Err(ConfigError::LocalTuple(tuple.to_string()));
        };
        if match_key.is_empty() {
            return Err(ConfigError::EmptyLocalAddress(tuple.to_string()));
        }

        Ok(Self {
            match_key: (*match_key).to_string(),
            label: (*label).to_string(),
            count_in_status: is_truthy(count),
        })
    }
}

/// Immutable matcher shared by all workers.
#[derive(Debug, Clone, Default)]
pub struct LocalAddressClassifier {
    pattern: Option<Regex>,
    entries: FnvHashMap<String, LocalAddressEntry>,
}

impl LocalAddressClassifier {
    /// A classifier with no entries; it never matches.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the classifier. A repeated substring keeps the last entry given for it.
    pub fn new(entries: Vec<LocalAddressEntry>) -> Result<Self, ConfigError> {
        let mut keys: Vec<String> = Vec::new();
        let mut by_key = FnvHashMap::default();
        for entry in entries {
            if !by_key.contains_key(&entry.match_key) {
                keys.push(entry.match_key.clone());
            }
            by_key.insert(entry.match_key.clone(), entry);
        }

        if keys.is_empty() {
            return Ok(Self::empty());
        }

        let alternation = keys
            .iter()
            .map(|key| regex::escape(key))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!("(?:{alternation})"))?;
        debug!("Local email pattern: {}", pattern.as_str());

        Ok(Self {
            pattern: Some(pattern),
            entries: by_key,
        })
    }

    /// Parses `substring,label,count` tuples; fails on the first malformed one.
    pub fn from_tuples<S: AsRef<str>>(tuples: &[S]) -> Result<Self, ConfigError> {
        let entries = tuples
            .iter()
            .map(|tuple| tuple.as_ref().parse::<LocalAddressEntry>())
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(entries)
    }

    /// Entry of the first configured substring found in `address`.
    pub fn classify(&self, address: &str) -> Option<&LocalAddressEntry> {
        let found = self.pattern.as_ref()?.find(address)?;
        self.entries.get(found.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
