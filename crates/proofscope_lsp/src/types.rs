//! Payload types for the checker's custom methods.
//!
//! `proof/goals` answers and `coq/getDocument` spans are decoded leniently:
//! the checker's pretty-printing mode changes the shape of term fields
//! (plain strings under `pp_type = 0`, rich layout trees otherwise),
//! hypotheses may spell their body as `def`, and messages arrive either as
//! bare strings or as `{level, text, range}` objects. Everything funnels through
//! [`GoalAnswer::parse`] so the rest of the codebase only ever sees owned,
//! uniform structs.

use lsp_types::{Position, Range, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SessionError;

/// One hypothesis of a goal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hyp {
    pub names: Vec<String>,
    pub ty: String,
    /// Body of a let-bound hypothesis, when present.
    pub definition: Option<String>,
}

/// One proof obligation: hypotheses and the type left to prove.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Goal {
    pub hyps: Vec<Hyp>,
    pub ty: String,
}

/// A level of the focus stack: goals before and after the focused ones.
pub type GoalStackLevel = (Vec<Goal>, Vec<Goal>);

/// The full goal configuration at a position.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GoalConfig {
    pub goals: Vec<Goal>,
    pub stack: Vec<GoalStackLevel>,
    pub shelf: Vec<Goal>,
    pub given_up: Vec<Goal>,
    pub bullet: Option<String>,
}

/// A message attached to a position (info output, warnings, errors).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub level: Option<i64>,
    pub text: String,
    pub range: Option<Range>,
}

/// Answer of `proof/goals`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GoalAnswer {
    pub version: i32,
    pub position: Position,
    pub messages: Vec<Message>,
    pub goals: Option<GoalConfig>,
    pub error: Option<String>,
}

impl GoalAnswer {
    pub fn parse(value: &Value) -> Result<GoalAnswer, SessionError> {
        let position = parse_position(value.get("position"))
            .ok_or_else(|| SessionError::Protocol("proof/goals answer lacks position".into()))?;
        let version = value
            .get("textDocument")
            .and_then(|d| d.get("version"))
            .and_then(Value::as_i64)
            .unwrap_or(0) as i32;
        let messages = value
            .get("messages")
            .and_then(Value::as_array)
            .map(|msgs| msgs.iter().map(parse_message).collect())
            .unwrap_or_default();
        let goals = value
            .get("goals")
            .filter(|g| !g.is_null())
            .map(parse_goal_config);
        let error = value
            .get("error")
            .filter(|e| !e.is_null())
            .map(pp_to_string);
        Ok(GoalAnswer {
            version,
            position,
            messages,
            goals,
            error,
        })
    }

    /// Foreground goals, or an empty slice when the position is outside a
    /// proof.
    pub fn foreground(&self) -> &[Goal] {
        self.goals.as_ref().map(|g| g.goals.as_slice()).unwrap_or(&[])
    }
}

/// The AST document returned by `coq/getDocument`: one span per sentence.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlecheDocument {
    pub spans: Vec<RangedSpan>,
}

/// One sentence span: its source range and, when parsing succeeded, the
/// serialized AST payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RangedSpan {
    pub range: Range,
    #[serde(default)]
    pub span: Option<Value>,
}

impl FlecheDocument {
    pub fn parse(value: &Value) -> Result<FlecheDocument, SessionError> {
        serde_json::from_value(value.clone())
            .map_err(|e| SessionError::Protocol(format!("bad coq/getDocument answer: {e}")))
    }
}

/// Initialization options sent to the checker.
///
/// Field meanings and defaults follow the checker's own documentation;
/// `pp_type` selects the term pretty-printer (0 = plain string, 1 = jsCoq
/// rich layout, 2 = layout engine).
#[derive(Debug, Clone, Serialize)]
pub struct InitOptions {
    pub max_errors: u64,
    pub eager_diagnostics: bool,
    pub show_coq_info_messages: bool,
    pub show_notices_as_diagnostics: bool,
    pub debug: bool,
    pub pp_type: u8,
}

impl Default for InitOptions {
    fn default() -> Self {
        InitOptions {
            max_errors: 120_000_000,
            eager_diagnostics: false,
            show_coq_info_messages: true,
            show_notices_as_diagnostics: false,
            debug: false,
            pp_type: 1,
        }
    }
}

/// Flatten a pretty-printed term to a string.
///
/// Plain strings pass through; rich layout trees collapse to the
/// concatenation of their string leaves, which is what the layouts bottom
/// out in.
pub fn pp_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(pp_to_string).collect(),
        Value::Object(map) => map.values().map(pp_to_string).collect(),
        _ => String::new(),
    }
}

fn parse_position(value: Option<&Value>) -> Option<Position> {
    let value = value?;
    Some(Position {
        line: value.get("line")?.as_u64()? as u32,
        character: value.get("character")?.as_u64()? as u32,
    })
}

fn parse_range(value: &Value) -> Option<Range> {
    Some(Range {
        start: parse_position(value.get("start"))?,
        end: parse_position(value.get("end"))?,
    })
}

fn parse_message(value: &Value) -> Message {
    match value {
        Value::String(text) => Message {
            level: None,
            text: text.clone(),
            range: None,
        },
        _ => Message {
            level: value.get("level").and_then(Value::as_i64),
            text: value.get("text").map(pp_to_string).unwrap_or_default(),
            range: value.get("range").and_then(parse_range),
        },
    }
}

fn parse_hyp(value: &Value) -> Hyp {
    let names = value
        .get("names")
        .and_then(Value::as_array)
        .map(|ns| ns.iter().map(pp_to_string).collect())
        .unwrap_or_default();
    // Older checker builds spell the body "def".
    let definition = value
        .get("definition")
        .or_else(|| value.get("def"))
        .filter(|d| !d.is_null())
        .map(pp_to_string);
    Hyp {
        names,
        ty: value.get("ty").map(pp_to_string).unwrap_or_default(),
        definition,
    }
}

fn parse_goal(value: &Value) -> Goal {
    Goal {
        hyps: value
            .get("hyps")
            .and_then(Value::as_array)
            .map(|hs| hs.iter().map(parse_hyp).collect())
            .unwrap_or_default(),
        ty: value.get("ty").map(pp_to_string).unwrap_or_default(),
    }
}

fn parse_goal_list(value: Option<&Value>) -> Vec<Goal> {
    value
        .and_then(Value::as_array)
        .map(|gs| gs.iter().map(parse_goal).collect())
        .unwrap_or_default()
}

fn parse_goal_config(value: &Value) -> GoalConfig {
    let stack = value
        .get("stack")
        .and_then(Value::as_array)
        .map(|levels| {
            levels
                .iter()
                .map(|level| {
                    (
                        parse_goal_list(level.get(0)),
                        parse_goal_list(level.get(1)),
                    )
                })
                .collect()
        })
        .unwrap_or_default();
    GoalConfig {
        goals: parse_goal_list(value.get("goals")),
        stack,
        shelf: parse_goal_list(value.get("shelf")),
        given_up: parse_goal_list(value.get("given_up")),
        bullet: value
            .get("bullet")
            .filter(|b| !b.is_null())
            .map(pp_to_string),
    }
}

/// Build the `textDocument` identifier object used by the custom methods.
pub fn text_document_id(uri: &Url) -> Value {
    serde_json::json!({ "uri": uri })
}
