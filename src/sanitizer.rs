//! Turns arbitrary model text into a `GradingVerdict`.
//!
//! Stages run in order and stop at the first one that yields a JSON object:
//!   1. strip a ``` / ```json fence, keep the interior
//!   2. cut from the first `{` to the last `}`
//!   3. strict parse
//!   4. repair (quotes, Python-style literals, trailing commas) and parse again
//!   5. give up with the sentinel verdict
//!
//! `sanitize_with_stage` never fails and never panics. The sentinel is not final, so it never moves counters.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::domain::GradingVerdict;
use crate::util::trunc_for_log;

const FENCE: &str = "```";

/// Which stage produced the verdict; logged for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SanitizeStage {
  Strict,
  Repaired,
  NoObject,
  Unparseable,
}

#[cfg(test)]
pub fn sanitize(text: &str) -> GradingVerdict {
  sanitize_with_stage(text).0
}

pub fn sanitize_with_stage(text: &str) -> (GradingVerdict, SanitizeStage) {
  let unfenced = strip_code_fence(text);
  let candidate = match brace_candidate(unfenced).or_else(|| brace_candidate(text)) {
    Some(c) => c,
    None => {
      warn!(target: "grading", raw = %trunc_for_log(text, 120), "No JSON object in model output; using sentinel verdict");
      return (GradingVerdict::sentinel(text), SanitizeStage::NoObject);
    }
  };

  if let Some(v) = parse_verdict(candidate) {
    return (v, SanitizeStage::Strict);
  }

  let repaired = repair(candidate);
  if let Some(v) = parse_verdict(&repaired) {
    debug!(target: "grading", "Model output needed syntax repair");
    return (v, SanitizeStage::Repaired);
  }

  warn!(target: "grading", raw = %trunc_for_log(text, 120), "Model output unparseable after repair; using sentinel verdict");
  (GradingVerdict::sentinel(text), SanitizeStage::Unparseable)
}

/// Interior of the first fenced block, minus its language tag. Unfenced text is returned as-is.
fn strip_code_fence(text: &str) -> &str {
  let Some(open) = text.find(FENCE) else { return text };
  let after = &text[open + FENCE.len()..];
  let tag_len = after.bytes().take_while(|b| b.is_ascii_alphanumeric()).count();
  let body = &after[tag_len..];
  match body.find(FENCE) {
    Some(close) => &body[..close],
    None => body,
  }
}

fn brace_candidate(text: &str) -> Option<&str> {
  let start = text.find('{')?;
  let end = text.rfind('}')?;
  (end > start).then(|| &text[start..=end])
}

fn parse_verdict(candidate: &str) -> Option<GradingVerdict> {
  match serde_json::from_str::<Value>(candidate).ok()? {
    Value::Object(obj) => Some(verdict_from_object(&obj)),
    _ => None,
  }
}

fn verdict_from_object(obj: &Map<String, Value>) -> GradingVerdict {
  let is_final = field(obj, &["final", "is_final"]).map(lenient_bool).unwrap_or(false);
  let correct = field(obj, &["correct", "is_correct"]).map(lenient_bool).unwrap_or(false);
  let feedback = field(obj, &["feedback", "explanation"])
    .and_then(Value::as_str)
    .unwrap_or_default()
    .trim()
    .to_string();

  if !is_final {
    return GradingVerdict::InProgress { feedback };
  }
  let correct_answer = field(obj, &["correct_answer", "answer"]).and_then(|v| match v {
    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  });
  GradingVerdict::Final { correct, feedback, correct_answer }
}

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
  names.iter().find_map(|n| obj.get(*n)).filter(|v| !v.is_null())
}

fn lenient_bool(v: &Value) -> bool {
  match v {
    Value::Bool(b) => *b,
    Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes"),
    Value::Number(n) => n.as_f64() == Some(1.0),
    _ => false,
  }
}

// --- Repairs ---

fn repair(candidate: &str) -> String {
  let quoted = normalize_quotes(candidate);
  let literals = map_outside_strings(&quoted, normalize_literals);
  map_outside_strings(&literals, strip_trailing_commas)
}

#[derive(Clone, Copy, PartialEq)]
enum QuoteState {
  Code,
  Double { smart: bool },
  Single { smart: bool },
}

/// Rewrites smart quotes and single-quoted strings into standard double-quoted JSON strings.
fn normalize_quotes(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  let mut state = QuoteState::Code;
  let mut chars = s.chars();

  while let Some(c) = chars.next() {
    match state {
      QuoteState::Code => match c {
        '"' => { out.push('"'); state = QuoteState::Double { smart: false }; }
        '“' | '”' => { out.push('"'); state = QuoteState::Double { smart: true }; }
        '\'' => { out.push('"'); state = QuoteState::Single { smart: false }; }
        '‘' | '’' => { out.push('"'); state = QuoteState::Single { smart: true }; }
        _ => out.push(c),
      },
      QuoteState::Double { smart } => match c {
        '\\' => {
          out.push(c);
          if let Some(next) = chars.next() { out.push(next); }
        }
        '"' => { out.push('"'); state = QuoteState::Code; }
        '”' | '“' if smart => { out.push('"'); state = QuoteState::Code; }
        _ => out.push(c),
      },
      QuoteState::Single { smart } => match c {
        '\\' => match chars.next() {
          Some('\'') => out.push('\''),
          Some(next) => { out.push('\\'); out.push(next); }
          None => out.push('\\'),
        },
        '\'' => { out.push('"'); state = QuoteState::Code; }
        '’' | '‘' if smart => { out.push('"'); state = QuoteState::Code; }
        '"' => out.push_str("\\\""),
        _ => out.push(c),
      },
    }
  }
  out
}

/// Applies `f` to every run of text that sits outside a double-quoted JSON string.
fn map_outside_strings(s: &str, f: fn(&str) -> String) -> String {
  let mut out = String::with_capacity(s.len());
  let mut code_start = 0;
  let mut in_string = false;
  let mut escaped = false;

  for (idx, c) in s.char_indices() {
    if in_string {
      if escaped {
        escaped = false;
      } else if c == '\\' {
        escaped = true;
      } else if c == '"' {
        in_string = false;
        out.push_str(&s[code_start..=idx]);
        code_start = idx + 1;
      }
    } else if c == '"' {
      out.push_str(&f(&s[code_start..idx]));
      code_start = idx;
      in_string = true;
    }
  }
  if in_string {
    out.push_str(&s[code_start..]);
  } else {
    out.push_str(&f(&s[code_start..]));
  }
  out
}

fn normalize_literals(code: &str) -> String {
  let mut out = String::with_capacity(code.len());
  let mut word = String::new();
  let flush = |word: &mut String, out: &mut String| {
    let mapped = match word.as_str() {
      "True" | "TRUE" => "true",
      "False" | "FALSE" => "false",
      "None" | "NULL" | "Null" | "nil" => "null",
      other => other,
    };
    out.push_str(mapped);
    word.clear();
  };

  for c in code.chars() {
    if c.is_ascii_alphanumeric() || c == '_' {
      word.push(c);
    } else {
      flush(&mut word, &mut out);
      out.push(c);
    }
  }
  flush(&mut word, &mut out);
  out
}

fn strip_trailing_commas(code: &str) -> String {
  let chars: Vec<char> = code.chars().collect();
  let mut out = String::with_capacity(code.len());
  for (i, c) in chars.iter().enumerate() {
    if *c == ',' {
      let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
      if matches!(next, Some('}') | Some(']')) {
        continue;
      }
    }
    out.push(*c);
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::SENTINEL_FEEDBACK;

  const CANONICAL: &str = r#"{"final": true, "correct": false, "feedback": "close", "correct_answer": "12"}"#;

  fn expected() -> GradingVerdict {
    GradingVerdict::Final { correct: false, feedback: "close".into(), correct_answer: Some("12".into()) }
  }

  #[test]
  fn strict_json_parses_without_repair() {
    assert_eq!(sanitize_with_stage(CANONICAL), (expected(), SanitizeStage::Strict));
  }

  #[test]
  fn malformed_variants_recover_the_same_verdict() {
    let variants = [
      format!("```json\n{CANONICAL}\n```"),
      format!("```\n{CANONICAL}\n```"),
      format!("Sure! Here is my verdict:\n{CANONICAL}\nHope that helps."),
      "{'final': true, 'correct': false, 'feedback': 'close', 'correct_answer': '12'}".to_string(),
      r#"{"final": true, "correct": false, "feedback": "close", "correct_answer": "12",}"#.to_string(),
      "{'final': True, 'correct': False, 'feedback': 'close', 'correct_answer': '12',}".to_string(),
      "{“final”: true, “correct”: false, “feedback”: “close”, “correct_answer”: “12”}".to_string(),
      "```json\n{\n  'final': True,\n  'correct': False,\n  'feedback': 'close',\n  'correct_answer': '12',\n}\n```".to_string(),
    ];
    for v in &variants {
      assert_eq!(sanitize(v), expected(), "variant: {v}");
    }
  }

  #[test]
  fn text_without_braces_yields_sentinel() {
    let raw = "I think the answer might be 5";
    let (v, stage) = sanitize_with_stage(raw);
    assert_eq!(stage, SanitizeStage::NoObject);
    assert_eq!(v, GradingVerdict::Unreadable { raw: raw.to_string() });
    assert!(!v.is_final());
    assert_eq!(v.feedback(), SENTINEL_FEEDBACK);
  }

  #[test]
  fn irreparable_object_yields_sentinel() {
    let (v, stage) = sanitize_with_stage("{final: yes please}");
    assert_eq!(stage, SanitizeStage::Unparseable);
    assert!(v.is_sentinel());
  }

  #[test]
  fn degenerate_inputs_never_panic() {
    for raw in ["", "}{", "{", "```", "```json", "'''", "{\"a\": \"unterminated", "{'a': 'it\\'s'}", "{{}}"] {
      let v = sanitize(raw);
      assert!(!v.is_final(), "input {raw:?} produced a final verdict");
    }
  }

  #[test]
  fn missing_fields_default_to_safe_values() {
    assert_eq!(
      sanitize(r#"{"feedback": "keep going"}"#),
      GradingVerdict::InProgress { feedback: "keep going".into() }
    );
    assert_eq!(
      sanitize(r#"{"final": true}"#),
      GradingVerdict::Final { correct: false, feedback: String::new(), correct_answer: None }
    );
  }

  #[test]
  fn aliases_and_loose_types_are_accepted() {
    let v = sanitize(r#"{"is_final": "true", "is_correct": true, "explanation": "nice", "correct_answer": 12}"#);
    assert_eq!(
      v,
      GradingVerdict::Final { correct: true, feedback: "nice".into(), correct_answer: Some("12".into()) }
    );
  }

  #[test]
  fn repairs_leave_string_contents_alone() {
    let v = sanitize(r#"{"final": true, "correct": true, "feedback": "True, None of it, was wrong,}",}"#);
    assert_eq!(v.feedback(), "True, None of it, was wrong,}");
    assert!(v.is_correct());
  }

  #[test]
  fn single_quoted_strings_may_contain_double_quotes() {
    let v = sanitize(r#"{'final': false, 'feedback': 'say "twelve"'}"#);
    assert_eq!(v, GradingVerdict::InProgress { feedback: "say \"twelve\"".into() });
  }

  #[test]
  fn non_final_verdict_ignores_correctness() {
    let v = sanitize(r#"{"final": false, "correct": true, "feedback": "what do you think?"}"#);
    assert!(!v.is_final());
    assert!(!v.is_correct());
  }
}
