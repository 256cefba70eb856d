//! Semantic fingerprints: a stable string derived from an operator graph.
//!
//! Two graphs that produce identical pixels/features for every query must
//! yield equal fingerprints. We get this by canonicalizing the graph to
//! JSON with sorted keys (`BTreeMap` guarantees the ordering) and using the
//! resulting string itself as the fingerprint, so equal graphs trivially
//! produce equal strings and unequal ones are visible in logs/tests without
//! having to reverse a digest.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// An operator graph node: an operator type name, its parameters, and the
/// graphs it reads from. This is the minimal shape the cache core needs
/// from the operator layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorGraph {
    #[serde(rename = "type")]
    pub op_type: String,
    pub params: BTreeMap<String, serde_json::Value>,
    pub sources: Vec<OperatorGraph>,
}

impl OperatorGraph {
    pub fn leaf(op_type: impl Into<String>) -> Self {
        OperatorGraph {
            op_type: op_type.into(),
            params: BTreeMap::new(),
            sources: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_source(mut self, source: OperatorGraph) -> Self {
        self.sources.push(source);
        self
    }
}

/// A stable string identifying an operator graph up to behavioural
/// equality. Fingerprints partition the cache namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A fixed-width digest of this fingerprint, useful as a fast hash-map
    /// key when the full canonical string would be wasteful to carry
    /// around. Two fingerprints that are string-equal always have equal
    /// digests; the digest alone is not assumed collision-free for any
    /// other purpose (correctness never keys off it alone).
    pub fn digest(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.0.hash(&mut hasher);
        hasher.finish()
    }
}

/// Compute the semantic fingerprint of an operator graph.
pub fn fingerprint(graph: &OperatorGraph) -> Fingerprint {
    Fingerprint(canonical_json(graph))
}

fn canonical_json(graph: &OperatorGraph) -> String {
    // serde_json::Value serializes maps in BTreeMap order already, so a
    // straight `to_string` on a `Value` built from our graph is canonical.
    let value = serde_json::json!({
        "type": graph.op_type,
        "params": graph.params,
        "sources": graph.sources.iter().map(canonical_json).collect::<Vec<_>>(),
    });
    serde_json::to_string(&value).expect("serde_json::Value serialization is infallible")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_graphs_fingerprint_equal() {
        let a = OperatorGraph::leaf("ndvi").with_param("band", json!(4));
        let b = OperatorGraph::leaf("ndvi").with_param("band", json!(4));
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn param_order_does_not_affect_fingerprint() {
        let a = OperatorGraph::leaf("blend")
            .with_param("a", json!(1))
            .with_param("b", json!(2));
        let b = OperatorGraph::leaf("blend")
            .with_param("b", json!(2))
            .with_param("a", json!(1));
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn different_params_fingerprint_differently() {
        let a = OperatorGraph::leaf("ndvi").with_param("band", json!(4));
        let b = OperatorGraph::leaf("ndvi").with_param("band", json!(5));
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn sources_are_part_of_the_fingerprint() {
        let src1 = OperatorGraph::leaf("load").with_param("layer", json!("a"));
        let src2 = OperatorGraph::leaf("load").with_param("layer", json!("b"));
        let a = OperatorGraph::leaf("crop").with_source(src1);
        let b = OperatorGraph::leaf("crop").with_source(src2);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
