//! Trigger match bookkeeping.
//!
//! A [`MatchTriggerStatus`] collects matched codes in buckets keyed by
//! `(path, code set, code set version)`. Bucket lookup uses exact key equality:
//! `Condition.code` and `Condition.code.coding` are distinct rules even though
//! one is a prefix of the other.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::job::{JobStatus, StageStatus};

/// Codes matched for one `(path, code set, version)` rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedTriggerCodes {
    pub matched_path: String,
    pub code_set: String,
    pub code_set_version: String,
    pub matched_codes: BTreeSet<String>,
}

impl MatchedTriggerCodes {
    fn key_matches(&self, path: &str, code_set: &str, code_set_version: &str) -> bool {
        self.matched_path == path
            && self.code_set == code_set
            && self.code_set_version == code_set_version
    }

    pub fn has_matches(&self) -> bool {
        !self.matched_codes.is_empty()
    }
}

/// Status of the trigger-match stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchTriggerStatus {
    #[serde(flatten)]
    pub stage: StageStatus,

    /// Whether anything matched.
    pub trigger_match_status: bool,

    #[serde(default)]
    pub matched_codes: Vec<MatchedTriggerCodes>,
}

impl MatchTriggerStatus {
    pub fn new(action_id: impl Into<String>) -> Self {
        Self {
            stage: StageStatus::new(action_id),
            trigger_match_status: false,
            matched_codes: Vec::new(),
        }
    }

    pub fn action_id(&self) -> &str {
        &self.stage.action_id
    }

    pub fn job_status(&self) -> JobStatus {
        self.stage.job_status
    }

    /// Finds the bucket for the exact `(path, code set, version)` key.
    pub fn matched_trigger_codes(
        &self,
        path: &str,
        code_set: &str,
        code_set_version: &str,
    ) -> Option<&MatchedTriggerCodes> {
        self.matched_codes
            .iter()
            .find(|m| m.key_matches(path, code_set, code_set_version))
    }

    /// Records matched codes for a rule.
    ///
    /// Creates the bucket when absent, otherwise unions `codes` into it.
    /// Repeating a call with the same arguments leaves the status unchanged.
    pub fn add_matched_codes<I, S>(
        &mut self,
        codes: I,
        code_set: &str,
        path: &str,
        code_set_version: &str,
    ) where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let codes = codes.into_iter().map(Into::into);
        match self
            .matched_codes
            .iter_mut()
            .find(|m| m.key_matches(path, code_set, code_set_version))
        {
            Some(bucket) => bucket.matched_codes.extend(codes),
            None => self.matched_codes.push(MatchedTriggerCodes {
                matched_path: path.to_string(),
                code_set: code_set.to_string(),
                code_set_version: code_set_version.to_string(),
                matched_codes: codes.collect(),
            }),
        }
        self.trigger_match_status = self.matched_codes.iter().any(MatchedTriggerCodes::has_matches);
    }

    /// All matched codes across buckets, deduplicated.
    pub fn all_codes(&self) -> BTreeSet<&str> {
        self.matched_codes
            .iter()
            .flat_map(|m| m.matched_codes.iter().map(String::as_str))
            .collect()
    }

    pub fn start(&mut self) -> Result<()> {
        self.stage.start()
    }

    pub fn complete(&mut self) -> Result<()> {
        self.stage.complete(None)
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.stage.fail(reason)
    }
}
