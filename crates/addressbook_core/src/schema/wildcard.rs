//! Query-by-example wildcard convention for text fields.
//!
//! Template strings follow the SQL `LIKE` convention:
//! - `%` matches any run of characters, including none.
//! - `_` matches exactly one character.
//! - `\` makes the next character literal (`\%`, `\_`, `\\`).
//!
//! A template without an unescaped `%` or `_` is an exact match. Matching is
//! case-sensitive; patterns are executed as SQLite `GLOB` expressions.

/// A template string translated for SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextPattern {
    /// Compare with `=` against the unescaped literal.
    Exact(String),
    /// Compare with `GLOB` against the translated pattern.
    Glob(String),
}

impl TextPattern {
    /// SQL operator to place between column and bound value.
    pub fn operator(&self) -> &'static str {
        match self {
            Self::Exact(_) => "=",
            Self::Glob(_) => "GLOB",
        }
    }

    pub fn into_value(self) -> String {
        match self {
            Self::Exact(value) | Self::Glob(value) => value,
        }
    }
}

/// Translates a template string into an exact literal or a GLOB pattern.
pub fn parse(template: &str) -> TextPattern {
    let mut literal = String::with_capacity(template.len());
    let mut glob = String::with_capacity(template.len() + 4);
    let mut has_wildcard = false;
    let mut chars = template.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                // trailing backslash stays literal
                let escaped = chars.next().unwrap_or('\\');
                literal.push(escaped);
                push_glob_literal(&mut glob, escaped);
            }
            '%' => {
                has_wildcard = true;
                glob.push('*');
            }
            '_' => {
                has_wildcard = true;
                glob.push('?');
            }
            other => {
                literal.push(other);
                push_glob_literal(&mut glob, other);
            }
        }
    }

    if has_wildcard {
        TextPattern::Glob(glob)
    } else {
        TextPattern::Exact(literal)
    }
}

fn push_glob_literal(glob: &mut String, ch: char) {
    match ch {
        '*' | '?' | '[' => {
            glob.push('[');
            glob.push(ch);
            glob.push(']');
        }
        other => glob.push(other),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse, TextPattern};
    use rusqlite::Connection;

    fn glob_matches(pattern: &str, candidate: &str) -> bool {
        let conn = Connection::open_in_memory().unwrap();
        let TextPattern::Glob(glob) = parse(pattern) else {
            panic!("`{pattern}` should translate to a glob");
        };
        conn.query_row("SELECT ?1 GLOB ?2;", [candidate, glob.as_str()], |row| {
            row.get::<_, bool>(0)
        })
        .unwrap()
    }

    #[test]
    fn plain_text_is_exact() {
        assert_eq!(parse("Nikki"), TextPattern::Exact("Nikki".to_string()));
        assert_eq!(parse(""), TextPattern::Exact(String::new()));
    }

    #[test]
    fn percent_and_underscore_become_glob_wildcards() {
        assert_eq!(parse("L%"), TextPattern::Glob("L*".to_string()));
        assert_eq!(parse("L_ps"), TextPattern::Glob("L?ps".to_string()));
        assert_eq!(parse("%irm%"), TextPattern::Glob("*irm*".to_string()));
    }

    #[test]
    fn escaped_wildcards_stay_literal() {
        assert_eq!(parse(r"100\%"), TextPattern::Exact("100%".to_string()));
        assert_eq!(parse(r"a\_b"), TextPattern::Exact("a_b".to_string()));
        assert_eq!(parse(r"a\\b"), TextPattern::Exact(r"a\b".to_string()));
        assert_eq!(parse(r"50\%%"), TextPattern::Glob("50%*".to_string()));
    }

    #[test]
    fn glob_metacharacters_are_quoted() {
        assert_eq!(parse("a*%"), TextPattern::Glob("a[*]*".to_string()));
        assert_eq!(parse("[x]?_"), TextPattern::Glob("[[]x][?]?".to_string()));
    }

    #[test]
    fn translated_patterns_behave_like_like_but_case_sensitive() {
        assert!(glob_matches("L%", "Lups"));
        assert!(glob_matches("L%", "Lemmi"));
        assert!(glob_matches("L%", "L"));
        assert!(!glob_matches("L%", "lups"));
        assert!(!glob_matches("L%", "Pipa"));
        assert!(glob_matches("L_ps", "Lups"));
        assert!(!glob_matches("L_ps", "Lps"));
        assert!(glob_matches("a*%", "a*b"));
        assert!(!glob_matches("a*%", "ab"));
    }
}
