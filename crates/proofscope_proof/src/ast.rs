//! Dynamic model of the checker's AST payloads.
//!
//! The checker serializes sentence ASTs as heterogeneous trees of maps,
//! arrays and scalars whose exact shape varies with the sentence kind and
//! the checker version. Rather than mirroring hundreds of vernacular
//! constructors, we keep the tree dynamic and pattern-match the handful of
//! shapes the engine cares about:
//!
//! - the top-level vernacular tag (`VernacStartTheoremProof`, …), which
//!   drives step classification,
//! - `Ser_Qualid` nodes, which name a referenced term,
//! - `CNotation` nodes, which carry a notation pattern.

use serde_json::Value;

/// One node of a checker AST.
#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<AstNode>),
    Map(Vec<(String, AstNode)>),
}

impl AstNode {
    pub fn from_value(value: &Value) -> AstNode {
        match value {
            Value::Null => AstNode::Null,
            Value::Bool(b) => AstNode::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => AstNode::Int(i),
                None => AstNode::Str(n.to_string()),
            },
            Value::String(s) => AstNode::Str(s.clone()),
            Value::Array(items) => AstNode::List(items.iter().map(AstNode::from_value).collect()),
            Value::Object(map) => AstNode::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), AstNode::from_value(v)))
                    .collect(),
            ),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AstNode::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Value under `key`, for map nodes.
    pub fn get(&self, key: &str) -> Option<&AstNode> {
        match self {
            AstNode::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Element at `index`, for list nodes.
    pub fn at(&self, index: usize) -> Option<&AstNode> {
        match self {
            AstNode::List(items) => items.get(index),
            _ => None,
        }
    }

    /// The expression payload of a sentence span (`span.v.expr`).
    pub fn expr(&self) -> Option<&AstNode> {
        match self.get("v").and_then(|v| v.get("expr")) {
            Some(expr) => Some(expr),
            None => self.get("expr"),
        }
    }

    /// Vernacular tag of a sentence: the head of its expression payload.
    pub fn vernac_tag(&self) -> Option<&str> {
        let expr = self.expr()?;
        match expr {
            AstNode::Str(s) => Some(s),
            AstNode::List(items) => items.first().and_then(AstNode::as_str),
            _ => None,
        }
    }

    /// Reconstruct the dotted name of a `Ser_Qualid` node.
    ///
    /// The shape is `["Ser_Qualid", [_, [["Id", "M2"], ["Id", "M1"]]],
    /// ["Id", "x"]]` with the directory path stored innermost-first; the
    /// result here is `M1.M2.x`.
    pub fn as_qualid(&self) -> Option<String> {
        let AstNode::List(items) = self else {
            return None;
        };
        if items.len() != 3 || items[0].as_str() != Some("Ser_Qualid") {
            return None;
        }
        let mut parts: Vec<&str> = Vec::new();
        if let Some(AstNode::List(dirs)) = items[1].at(1) {
            for dir in dirs.iter().rev() {
                parts.push(dir.at(1)?.as_str()?);
            }
        }
        parts.push(items[2].at(1)?.as_str()?);
        Some(parts.join("."))
    }

    /// Match a `CNotation` node: `["CNotation", _, [_, "pattern"], args]`.
    ///
    /// Returns the notation pattern and the remaining elements (which may
    /// themselves contain qualids and nested notations).
    pub fn as_notation(&self) -> Option<(&str, &[AstNode])> {
        let AstNode::List(items) = self else {
            return None;
        };
        if items.len() != 4 || items[0].as_str() != Some("CNotation") {
            return None;
        }
        let pattern = items[2].at(1)?.as_str()?;
        Some((pattern, &items[1..]))
    }

    /// Children of this node, in serialization order. Scalars have none.
    pub fn children(&self) -> &[AstNode] {
        match self {
            AstNode::List(items) => items,
            _ => &[],
        }
    }

    /// Values of a map node, in serialization order.
    pub fn map_values(&self) -> Option<impl Iterator<Item = &AstNode>> {
        match self {
            AstNode::Map(entries) => Some(entries.iter().map(|(_, v)| v)),
            _ => None,
        }
    }
}

impl Default for AstNode {
    fn default() -> Self {
        AstNode::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(value: Value) -> AstNode {
        AstNode::from_value(&value)
    }

    #[test]
    fn vernac_tag_from_span_payload() {
        let span = node(json!({
            "v": { "expr": ["VernacStartTheoremProof", "Theorem", []] }
        }));
        assert_eq!(span.vernac_tag(), Some("VernacStartTheoremProof"));
    }

    #[test]
    fn vernac_tag_from_bare_expr() {
        let span = node(json!({ "expr": "VernacProof" }));
        assert_eq!(span.vernac_tag(), Some("VernacProof"));
    }

    #[test]
    fn qualid_joins_path_reversed() {
        let qualid = node(json!([
            "Ser_Qualid",
            ["DirPath", [["Id", "Peano"], ["Id", "Nat"]]],
            ["Id", "add"]
        ]));
        assert_eq!(qualid.as_qualid().as_deref(), Some("Nat.Peano.add"));
    }

    #[test]
    fn unqualified_qualid_is_bare_name() {
        let qualid = node(json!(["Ser_Qualid", ["DirPath", []], ["Id", "plus"]]));
        assert_eq!(qualid.as_qualid().as_deref(), Some("plus"));
    }

    #[test]
    fn qualid_requires_exact_shape() {
        assert!(node(json!(["Ser_Qualid", []])).as_qualid().is_none());
        assert!(node(json!(["Other", [], []])).as_qualid().is_none());
        assert!(node(json!("Ser_Qualid")).as_qualid().is_none());
    }

    #[test]
    fn notation_yields_pattern_and_rest() {
        let notation = node(json!([
            "CNotation",
            null,
            ["InConstrEntry", "_ = _"],
            [[["Ser_Qualid", ["DirPath", []], ["Id", "n"]]], [], []]
        ]));
        let (pattern, rest) = notation.as_notation().unwrap();
        assert_eq!(pattern, "_ = _");
        assert_eq!(rest.len(), 3);
    }

    #[test]
    fn non_integral_numbers_degrade_to_strings() {
        let n = node(json!(0.5));
        assert_eq!(n.as_str(), Some("0.5"));
    }

    #[test]
    fn map_lookup_preserves_order() {
        let m = node(json!({ "v": 1, "loc": 2 }));
        assert_eq!(m.get("v"), Some(&AstNode::Int(1)));
        assert!(m.get("missing").is_none());
        let values: Vec<_> = m.map_values().unwrap().collect();
        assert_eq!(values.len(), 2);
    }
}
