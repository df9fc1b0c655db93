//! Static lookup table translating league and team names to the integer ids
//! the classifier was trained on.
//!
//! The table is read once from a JSON document of the form
//!
//! ```json
//! { "LEAGUE": {"EPL": 0}, "TEAM1": {"Arsenal": 3}, "TEAM2": {"Chelsea": 7} }
//! ```
//!
//! `TEAM1` is the home-side encoding and `TEAM2` the away-side encoding; the
//! same club usually has a different id in each.  Matching is exact and
//! case-sensitive.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

use crate::error::UnresolvedKey;

#[derive(Debug, Clone, Deserialize)]
struct MappingJson {
    #[serde(rename = "LEAGUE")]
    league: HashMap<String, u32>,
    #[serde(rename = "TEAM1")]
    team1: HashMap<String, u32>,
    #[serde(rename = "TEAM2")]
    team2: HashMap<String, u32>,
}

/// Read-only name → id table, shared across requests.
#[derive(Debug, Clone)]
pub struct LookupTable {
    league: HashMap<String, u32>,
    team1: HashMap<String, u32>,
    team2: HashMap<String, u32>,
}

/// Entry counts per domain, surfaced on the status endpoint.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MappingSummary {
    pub leagues: usize,
    pub teams_home: usize,
    pub teams_away: usize,
}

impl LookupTable {
    /// Load the table from a JSON file on disk.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read mapping file {}", path.display()))?;
        let table = Self::from_json_str(&content)
            .with_context(|| format!("Invalid mapping file {}", path.display()))?;
        let summary = table.summary();
        info!(
            "Mapping loaded from {}: {} leagues, {} home teams, {} away teams",
            path.display(),
            summary.leagues,
            summary.teams_home,
            summary.teams_away
        );
        Ok(table)
    }

    /// Parse the table from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let parsed: MappingJson =
            serde_json::from_str(json).context("Mapping JSON parse error")?;

        check_unique_ids("LEAGUE", &parsed.league)?;
        check_unique_ids("TEAM1", &parsed.team1)?;
        check_unique_ids("TEAM2", &parsed.team2)?;

        Ok(LookupTable {
            league: parsed.league,
            team1: parsed.team1,
            team2: parsed.team2,
        })
    }

    pub fn league_id(&self, name: &str) -> Option<u32> {
        self.league.get(name).copied()
    }

    pub fn team1_id(&self, name: &str) -> Option<u32> {
        self.team1.get(name).copied()
    }

    pub fn team2_id(&self, name: &str) -> Option<u32> {
        self.team2.get(name).copied()
    }

    /// Resolve all three names at once.  Any miss fails the whole lookup.
    pub fn resolve(
        &self,
        league: &str,
        team1: &str,
        team2: &str,
    ) -> Result<(u32, u32, u32), UnresolvedKey> {
        match (self.league_id(league), self.team1_id(team1), self.team2_id(team2)) {
            (Some(l), Some(t1), Some(t2)) => Ok((l, t1, t2)),
            (l, t1, t2) => Err(UnresolvedKey {
                league: l.is_none(),
                team1: t1.is_none(),
                team2: t2.is_none(),
            }),
        }
    }

    pub fn summary(&self) -> MappingSummary {
        MappingSummary {
            leagues: self.league.len(),
            teams_home: self.team1.len(),
            teams_away: self.team2.len(),
        }
    }
}

fn check_unique_ids(domain: &str, map: &HashMap<String, u32>) -> Result<()> {
    let mut seen: HashSet<u32> = HashSet::with_capacity(map.len());
    for (name, id) in map {
        if !seen.insert(*id) {
            anyhow::bail!("duplicate id {} in {} (at '{}')", id, domain, name);
        }
    }
    Ok(())
}
