//! Structural extractor: reduce a source file to the lines most worth showing
//! to an LLM.
//!
//! Signature-rich files are represented by their declarations alone. Files with
//! few declarations additionally get a "core logic" excerpt: the busiest lines
//! of the comment-stripped file, kept in file order.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::config::ExtractConfig;

pub const CORE_LOGIC_SEPARATOR: &str = "\n\n--- CORE LOGIC SNIPPETS ---\n";

const STOP_WORDS: [&str; 9] = [
    "import", "from", "export", "require", "const", "let", "var", "self", "this",
];
const LOGIC_TOKENS: [&str; 7] = ["if ", "for ", "while ", "return ", "await ", "async ", "= "];
const GROUPING_SYMBOLS: [char; 4] = ['{', '(', '[', ':'];
const C_CONTROL_WORDS: [&str; 8] = [
    "if", "else", "for", "while", "switch", "return", "do", "catch",
];

/// Language family, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    JavaScript,
    Go,
    JvmLike,
    CFamily,
    Other,
}

impl Language {
    pub fn from_path(path: &str) -> Self {
        let ext = path
            .rsplit_once('.')
            .map(|(_, e)| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "py" => Language::Python,
            "js" | "jsx" | "ts" | "tsx" => Language::JavaScript,
            "go" => Language::Go,
            "java" | "cs" => Language::JvmLike,
            "c" | "cpp" | "cc" | "h" | "hpp" => Language::CFamily,
            _ => Language::Other,
        }
    }

    fn signature_patterns(self) -> &'static [Regex] {
        match self {
            Language::Python => &PY_SIGNATURES,
            Language::JavaScript => &JS_SIGNATURES,
            Language::Go => &GO_SIGNATURES,
            Language::JvmLike => &JVM_SIGNATURES,
            Language::CFamily => &C_SIGNATURES,
            Language::Other => &[],
        }
    }

    fn uses_hash_comments(self) -> bool {
        matches!(self, Language::Python | Language::Other)
    }

    fn uses_c_comments(self) -> bool {
        !matches!(self, Language::Python)
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("signature pattern is a valid regex"))
        .collect()
}

static PY_SIGNATURES: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"^class\s+\w+", r"^(async\s+)?def\s+\w+"]));

static JS_SIGNATURES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"export\s+(default\s+)?(async\s+)?(class|interface|type|function|const|enum)\s+\w+",
    ])
});

static GO_SIGNATURES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[r"^func\s+(\([^)]*\)\s*)?\w+", r"^type\s+\w+\s+(struct|interface)\b"])
});

static JVM_SIGNATURES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"^((public|protected|private|internal|static|abstract|final|sealed|partial)\s+)*(class|interface|enum|record|struct)\s+\w+",
        r"^(public|protected|private|internal)\s+[\w<>\[\],.?\s]+\s+\w+\s*\(",
    ])
});

static C_SIGNATURES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"^(class|struct|namespace)\s+\w+",
        r"^(?:[\w:<>*&]+\s+)+[*&]?[\w:~]+\s*\([^;]*\)\s*(?:const\s*)?\{?$",
    ])
});

static HASH_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)#.*$").expect("valid regex"));
static SLASH_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)(^|[^:"'])//.*$"#).expect("valid regex"));
static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid regex"));
static SINGLE_QUOTE_DOC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)'''.*?'''").expect("valid regex"));
static DOUBLE_QUOTE_DOC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)""".*?""""#).expect("valid regex"));

/// Pure, deterministic file condenser.
#[derive(Debug, Clone, Default)]
pub struct StructureExtractor {
    config: ExtractConfig,
}

impl StructureExtractor {
    pub fn new(config: ExtractConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// Condense `code` (the content of `path`).
    pub fn extract(&self, path: &str, code: &str) -> String {
        let language = Language::from_path(path);
        let signatures = find_signatures(code, language);

        if signatures.len() >= self.config.signature_threshold {
            debug!(path, signatures = signatures.len(), "Signature-rich file");
            return signatures
                .iter()
                .take(self.config.signature_cap)
                .cloned()
                .collect::<Vec<_>>()
                .join("\n");
        }

        let compressed = strip_comments(code, language);
        let excerpt = core_logic(&compressed, self.config.excerpt_lines);
        debug!(path, signatures = signatures.len(), "Signature-poor file, adding core logic");
        format!("{}{}{}", signatures.join("\n"), CORE_LOGIC_SEPARATOR, excerpt)
    }
}

/// Top-level declaration lines, trimmed, in file order.
pub fn find_signatures(code: &str, language: Language) -> Vec<String> {
    let patterns = language.signature_patterns();
    if patterns.is_empty() {
        return Vec::new();
    }
    code.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            if language == Language::CFamily {
                let first = line.split(|c: char| !c.is_alphanumeric()).next().unwrap_or("");
                if C_CONTROL_WORDS.contains(&first) {
                    return false;
                }
            }
            patterns.iter().any(|re| re.is_match(line))
        })
        .map(str::to_string)
        .collect()
}

/// Remove comments and docstrings, then drop blank lines.
pub fn strip_comments(code: &str, language: Language) -> String {
    let mut text = code.to_string();
    if language.uses_hash_comments() {
        text = HASH_COMMENT.replace_all(&text, "").into_owned();
    }
    if language.uses_c_comments() {
        text = SLASH_COMMENT.replace_all(&text, "$1").into_owned();
        text = BLOCK_COMMENT.replace_all(&text, "").into_owned();
    }
    if language == Language::Python {
        text = SINGLE_QUOTE_DOC.replace_all(&text, "").into_owned();
        text = DOUBLE_QUOTE_DOC.replace_all(&text, "").into_owned();
    }
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Density score of a single line, or `None` for blank and comment lines.
pub fn score_line(line: &str) -> Option<usize> {
    let stripped = line.trim();
    if stripped.is_empty() || stripped.starts_with(['#', '/', '*']) {
        return None;
    }
    let mut score = 0;
    if LOGIC_TOKENS.iter().any(|t| stripped.contains(t)) {
        score += 5;
    }
    if stripped.contains(GROUPING_SYMBOLS) {
        score += 2;
    }
    let lowered = stripped.to_lowercase();
    let words: HashSet<&str> = lowered
        .split_whitespace()
        .filter(|w| !STOP_WORDS.contains(w))
        .collect();
    Some(score + words.len())
}

/// The `limit` highest-scoring lines, returned in their original order.
pub fn core_logic(code: &str, limit: usize) -> String {
    let mut scored: Vec<(usize, usize, &str)> = code
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| score_line(line).map(|s| (idx, s, line)))
        .collect();
    // stable: ties keep file order
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.truncate(limit);
    scored.sort_by_key(|(idx, _, _)| *idx);
    scored
        .into_iter()
        .map(|(_, _, line)| line)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logic_lines_outscore_plain_lines() {
        let busy = score_line("if total = compute(a, b):").unwrap();
        let plain = score_line("pass").unwrap();
        assert!(busy > plain);
        assert_eq!(score_line("   "), None);
        assert_eq!(score_line("// note"), None);
    }

    #[test]
    fn stop_words_are_not_counted() {
        // "import" and "from" are excluded, "os" and "path" remain
        assert_eq!(score_line("from os import path"), Some(2));
    }

    #[test]
    fn slash_comment_keeps_urls() {
        let out = strip_comments("let u = \"http://x\"; // trailing\n\nfoo();", Language::JavaScript);
        assert!(out.contains("http://x"));
        assert!(!out.contains("trailing"));
        assert_eq!(out.lines().count(), 2);
    }

    #[test]
    fn c_control_flow_is_not_a_signature() {
        let code = "int main(int argc, char** argv) {\n  if (argc > 1) {\n  }\n}\n";
        let sigs = find_signatures(code, Language::CFamily);
        assert_eq!(sigs, vec!["int main(int argc, char** argv) {"]);
    }
}
