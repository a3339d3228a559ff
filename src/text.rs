//! Question normalization and lexical helpers.
//!
//! Tokens are lowercased runs of `[a-z0-9_]` with intra-token `-` preserved,
//! so reference codes like `POL-000123` survive normalization. Quoted spans
//! are captured before the punctuation strip so literal values keep their
//! original casing and spacing.

/// Fixed stop list applied when reducing a question to keywords. Kept small
/// on purpose; broad English stop lists eat schema words like "status".
pub const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "in", "at", "by", "for", "of", "to", "on", "with",
    "show", "list", "display", "give", "me", "how", "many", "what", "which",
    "where", "when", "is", "are", "do", "does", "all", "any", "and", "or",
    "from", "table", "column", "rows", "records", "entries", "unique",
    "distinct", "top", "first", "within",
];

/// True if the token is on the fixed stop list.
pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// Lowercase and split into tokens. `_` and intra-token `-` are kept,
/// everything else is a separator.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut out = Vec::new();
    let mut cur = String::new();
    for c in lower.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            cur.push(c);
        } else if !cur.is_empty() {
            push_token(&mut out, &mut cur);
        }
    }
    if !cur.is_empty() {
        push_token(&mut out, &mut cur);
    }
    out
}

fn push_token(out: &mut Vec<String>, cur: &mut String) {
    let trimmed = cur.trim_matches('-');
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    cur.clear();
}

/// Tokens joined back into a canonical single-spaced string.
pub fn normalized(text: &str) -> String {
    tokenize(text).join(" ")
}

/// `credit_limit` -> `credit limit`.
pub fn underscore_to_words(name: &str) -> String {
    name.replace('_', " ").trim().to_lowercase()
}

/// Small, safe singularizer. English morphology beyond these three rules is
/// left alone rather than guessed at.
pub fn singular(s: &str) -> String {
    if let Some(stem) = s.strip_suffix("ies") {
        return format!("{stem}y");
    }
    if s.ends_with("ses") {
        return s[..s.len() - 2].to_string(); // statuses -> status
    }
    if s.ends_with('s') && s.len() > 3 {
        return s[..s.len() - 1].to_string();
    }
    s.to_string()
}

/// Surface forms under which a schema name may appear in a question:
/// the underscore-expanded form and its singular.
pub fn surface_forms(name: &str) -> Vec<String> {
    let w = underscore_to_words(name);
    let mut forms = vec![w.clone()];
    let sing = singular(&w);
    if sing != w {
        forms.push(sing);
    }
    forms
}

/// A user question in raw and normalized form.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    /// Original input, untouched.
    pub raw: String,
    /// All normalized tokens, in order.
    pub tokens: Vec<String>,
    /// Tokens with the stop list applied; what the retriever's novelty check
    /// and the table/column scorer work from.
    pub keywords: Vec<String>,
    /// Spans that appeared inside single or double quotes, original casing.
    pub quoted: Vec<String>,
}

impl Question {
    pub fn parse(raw: &str) -> Self {
        let quoted = extract_quoted(raw);
        let tokens = tokenize(raw);
        let keywords = tokens
            .iter()
            .filter(|t| !is_stop_word(t) && (t.len() > 1 || t.chars().all(|c| c.is_ascii_digit())))
            .cloned()
            .collect();
        Self {
            raw: raw.to_string(),
            tokens,
            keywords,
            quoted,
        }
    }

    /// Canonical single-spaced form of the full token sequence.
    pub fn normalized(&self) -> String {
        self.tokens.join(" ")
    }
}

fn extract_quoted(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' || c == '"' {
            let quote = c;
            let mut span = String::new();
            let mut closed = false;
            for inner in chars.by_ref() {
                if inner == quote {
                    closed = true;
                    break;
                }
                span.push(inner);
            }
            if closed && !span.is_empty() {
                out.push(span);
            }
        }
    }
    out
}
