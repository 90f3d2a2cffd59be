//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Log-safe truncation for large strings, on a char boundary.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  match s.char_indices().nth(max) {
    None => s.to_string(),
    Some((idx, _)) => format!("{}… ({} bytes total)", &s[..idx], s.len()),
  }
}

/// First `max` characters of `s`, or `None` if `s` is blank.
pub fn title_from(s: &str, max: usize) -> Option<String> {
  let t = s.trim();
  if t.is_empty() { None } else { Some(t.chars().take(max).collect()) }
}

/// Cut `s` to at most `budget` characters without splitting a word.
/// Empty when the first word alone exceeds the budget.
pub fn truncate_at_word(s: &str, budget: usize) -> &str {
  let end = match s.char_indices().nth(budget) {
    None => return s,
    Some((idx, next)) if next.is_whitespace() => return s[..idx].trim_end(),
    Some((idx, _)) => idx,
  };
  match s[..end].rfind(char::is_whitespace) {
    Some(ws) if ws > 0 => s[..ws].trim_end(),
    _ => "",
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fill_template_replaces_all_occurrences() {
    assert_eq!(fill_template("{a}-{b}-{a}", &[("a", "x"), ("b", "y")]), "x-y-x");
  }

  #[test]
  fn trunc_for_log_respects_char_boundaries() {
    assert_eq!(trunc_for_log("short", 10), "short");
    let t = trunc_for_log("ééééé", 2);
    assert!(t.starts_with("éé…"));
  }

  #[test]
  fn truncate_at_word_never_splits_tokens() {
    assert_eq!(truncate_at_word("fractions and decimals", 15), "fractions and");
    assert_eq!(truncate_at_word("fractions", 100), "fractions");
    assert_eq!(truncate_at_word("supercalifragilistic", 5), "");
    assert_eq!(truncate_at_word("supercalifragilistic rocks", 12), "");
  }

  #[test]
  fn title_is_bounded() {
    assert_eq!(title_from("  what is 12 times 12 plus 3?", 20).as_deref(), Some("what is 12 times 12 "));
    assert_eq!(title_from("   ", 20), None);
  }
}
