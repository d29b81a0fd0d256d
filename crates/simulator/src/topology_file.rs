//! Topology file loading
//!
//! The file is a JSON object whose keys are node ids written as strings,
//! e.g. `{"0": [1, 2], "1": [0], "2": [0]}`.

use anyhow::Context;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use swarm_learner::NodeId;

/// Parse an adjacency map from JSON text
pub fn parse(raw: &str) -> anyhow::Result<BTreeMap<NodeId, Vec<NodeId>>> {
    let entries: HashMap<String, Vec<NodeId>> =
        serde_json::from_str(raw).context("topology must map node ids to neighbor lists")?;

    entries
        .into_iter()
        .map(|(key, neighbors)| {
            let id = key
                .trim()
                .parse::<NodeId>()
                .with_context(|| format!("invalid node id {:?}", key))?;
            Ok((id, neighbors))
        })
        .collect()
}

/// Load an adjacency map from a JSON file
pub fn load(path: &Path) -> anyhow::Result<BTreeMap<NodeId, Vec<NodeId>>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read topology file {:?}", path))?;
    parse(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_string_keys() {
        let adjacency = parse(r#"{"0": [1, 2], "1": [0], "2": [0]}"#).unwrap();
        assert_eq!(adjacency[&0], vec![1, 2]);
        assert_eq!(adjacency[&2], vec![0]);
        assert_eq!(adjacency.len(), 3);
    }

    #[test]
    fn test_rejects_bad_keys_and_values() {
        assert!(parse(r#"{"zero": [1]}"#).is_err());
        assert!(parse(r#"{"0": [-1]}"#).is_err());
        assert!(parse(r#"[0, 1]"#).is_err());
    }
}
