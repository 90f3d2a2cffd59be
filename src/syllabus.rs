//! Read-only syllabus reference keyed by class level (`class_1`, `class_2`, ...).
//!
//! The JSON layout is loose: a class entry may be a list of topic names, a list of
//! objects, or a map of topic -> subtopics. Each top-level entry becomes one section.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::domain::ClassLevel;
use crate::util::truncate_at_word;

pub trait SyllabusReference: Send + Sync {
  fn topics_for(&self, class_level: ClassLevel) -> Option<SyllabusTopics>;
}

/// Topic tree for one class.
#[derive(Clone, Debug, PartialEq)]
pub struct SyllabusTopics(pub Value);

impl SyllabusTopics {
  /// One line per top-level topic.
  pub fn sections(&self) -> Vec<String> {
    match &self.0 {
      Value::Array(items) => items.iter().map(render_section).filter(|s| !s.is_empty()).collect(),
      Value::Object(map) => map
        .iter()
        .map(|(topic, children)| {
          let leaves = leaves(children);
          if leaves.is_empty() { format!("- {topic}") } else { format!("- {topic}: {}", leaves.join(", ")) }
        })
        .collect(),
      other => {
        let s = render_section(other);
        if s.is_empty() { Vec::new() } else { vec![s] }
      }
    }
  }

  /// Top-level topic names: map keys, list strings, or the `topic`/`name`/`title` of list objects.
  pub fn categories(&self) -> Vec<String> {
    match &self.0 {
      Value::Object(map) => map.keys().cloned().collect(),
      Value::Array(items) => items
        .iter()
        .filter_map(|item| match item {
          Value::String(s) => Some(s.trim().to_string()),
          Value::Object(map) => ["topic", "name", "title"].iter().find_map(|k| map.get(*k).and_then(Value::as_str)).map(str::to_string),
          _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect(),
      _ => Vec::new(),
    }
  }

  /// Whole sections up to `budget` characters. If even the first section is too long,
  /// it is cut at the last word boundary instead; empty if no topic word fits.
  pub fn excerpt(&self, budget: usize) -> String {
    let mut out = String::new();
    let mut used = 0usize;
    for section in self.sections() {
      let len = section.chars().count();
      let sep = usize::from(!out.is_empty());
      if used + sep + len > budget {
        if out.is_empty() {
          let cut = truncate_at_word(&section, budget);
          if cut.chars().any(char::is_alphanumeric) {
            out.push_str(cut);
          }
        }
        break;
      }
      if sep == 1 {
        out.push('\n');
      }
      out.push_str(&section);
      used += sep + len;
    }
    out
  }
}

fn render_section(v: &Value) -> String {
  match v {
    Value::String(s) => format!("- {}", s.trim()),
    Value::Object(map) => {
      let name = ["topic", "name", "title"]
        .iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .map(str::to_string);
      let children: Vec<String> = map
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), "topic" | "name" | "title"))
        .flat_map(|(_, v)| leaves(v))
        .collect();
      match (name, children.is_empty()) {
        (Some(n), true) => format!("- {n}"),
        (Some(n), false) => format!("- {n}: {}", children.join(", ")),
        (None, _) => {
          let all = leaves(v);
          if all.is_empty() { String::new() } else { format!("- {}", all.join(", ")) }
        }
      }
    }
    other => {
      let all = leaves(other);
      if all.is_empty() { String::new() } else { format!("- {}", all.join(", ")) }
    }
  }
}

fn leaves(v: &Value) -> Vec<String> {
  match v {
    Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
    Value::Number(n) => vec![n.to_string()],
    Value::Array(items) => items.iter().flat_map(leaves).collect(),
    Value::Object(map) => map.values().flat_map(leaves).collect(),
    _ => Vec::new(),
  }
}

/// Syllabus loaded once from a JSON document.
#[derive(Clone, Debug, Default)]
pub struct JsonSyllabus {
  classes: HashMap<String, Value>,
}

impl JsonSyllabus {
  pub fn from_value(doc: Value) -> Self {
    let classes = match doc {
      Value::Object(map) => map.into_iter().collect(),
      _ => {
        warn!(target: "tutor_backend", "Syllabus document is not a JSON object; ignoring");
        HashMap::new()
      }
    };
    Self { classes }
  }

  /// Load from disk. Missing or invalid files yield an empty syllabus (grading still works without it).
  pub fn load(path: &Path) -> Self {
    let raw = match std::fs::read_to_string(path) {
      Ok(s) => s,
      Err(e) => {
        error!(target: "tutor_backend", path = %path.display(), error = %e, "Failed to read syllabus file");
        return Self::default();
      }
    };
    match serde_json::from_str::<Value>(&raw) {
      Ok(doc) => {
        let s = Self::from_value(doc);
        info!(target: "tutor_backend", path = %path.display(), classes = s.classes.len(), "Loaded syllabus");
        s
      }
      Err(e) => {
        error!(target: "tutor_backend", path = %path.display(), error = %e, "Failed to parse syllabus JSON");
        Self::default()
      }
    }
  }
}

impl SyllabusReference for JsonSyllabus {
  fn topics_for(&self, class_level: ClassLevel) -> Option<SyllabusTopics> {
    self.classes.get(&class_level.key()).cloned().map(SyllabusTopics)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn syllabus() -> JsonSyllabus {
    JsonSyllabus::from_value(json!({
      "class_3": ["Addition", "Subtraction", "Multiplication tables"],
      "class_5": {
        "Fractions": ["Equivalent fractions", "Adding fractions"],
        "Geometry": { "basics": ["Angles", "Triangles"] }
      },
      "class_6": [{ "topic": "Ratios", "subtopics": ["Unit rate"] }, { "name": "Integers" }]
    }))
  }

  #[test]
  fn lookup_by_class_level() {
    let s = syllabus();
    assert!(s.topics_for(ClassLevel(3)).is_some());
    assert!(s.topics_for(ClassLevel(9)).is_none());
  }

  #[test]
  fn sections_render_lists_maps_and_objects() {
    let s = syllabus();
    assert_eq!(
      s.topics_for(ClassLevel(3)).unwrap().sections(),
      ["- Addition", "- Subtraction", "- Multiplication tables"]
    );
    assert_eq!(
      s.topics_for(ClassLevel(5)).unwrap().sections(),
      ["- Fractions: Equivalent fractions, Adding fractions", "- Geometry: Angles, Triangles"]
    );
    assert_eq!(s.topics_for(ClassLevel(6)).unwrap().sections(), ["- Ratios: Unit rate", "- Integers"]);
  }

  #[test]
  fn categories_are_top_level_names() {
    let s = syllabus();
    assert_eq!(s.topics_for(ClassLevel(3)).unwrap().categories(), ["Addition", "Subtraction", "Multiplication tables"]);
    assert_eq!(s.topics_for(ClassLevel(5)).unwrap().categories(), ["Fractions", "Geometry"]);
    assert_eq!(s.topics_for(ClassLevel(6)).unwrap().categories(), ["Ratios", "Integers"]);
  }

  #[test]
  fn excerpt_stops_at_section_boundary() {
    let topics = syllabus().topics_for(ClassLevel(3)).unwrap();
    // "- Addition" (10) + "\n" + "- Subtraction" (13) = 24; the third section does not fit.
    assert_eq!(topics.excerpt(30), "- Addition\n- Subtraction");
    assert_eq!(topics.excerpt(1000), "- Addition\n- Subtraction\n- Multiplication tables");
  }

  #[test]
  fn oversized_first_section_is_cut_between_words() {
    let topics = SyllabusTopics(json!(["Long division with remainders"]));
    assert_eq!(topics.excerpt(20), "- Long division with");
  }

  #[test]
  fn excerpt_is_empty_when_no_whole_word_fits() {
    assert_eq!(SyllabusTopics(json!(["Multiplication"])).excerpt(8), "");
    assert_eq!(SyllabusTopics(json!(["Long division"])).excerpt(3), "");
  }
}
