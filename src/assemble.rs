//! Response parser and wiki assembler.
//!
//! Provider output is free text. Nothing here fails: malformed markers fall back
//! to best-effort splitting, and an empty section is given a placeholder.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::contract::WikiSection;

pub const OVERVIEW_ID: &str = "overview";
pub const OVERVIEW_TITLE: &str = "Overview";
pub const EMPTY_MODULE_PLACEHOLDER: &str = "No detailed summary available for this module.";
pub const EMPTY_OVERVIEW_PLACEHOLDER: &str = "No overview available for this repository.";

const MODULE_MARKER: &str = "MODULE:";
const SUBSECTION_MARKER: &str = "SUBSECTION:";
const OVERVIEW_LABEL: &str = "OVERVIEW:";

static BLANK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t\r]*\n").expect("valid regex"));

/// Non-empty trimmed paragraphs separated by blank lines.
pub fn paragraphs(text: &str) -> Vec<String> {
    BLANK_LINE
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Lowercase, with every run of non-alphanumeric characters collapsed to one
/// hyphen and no leading or trailing hyphen.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

fn capitalize_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn split_title(block: &str) -> (&str, &str) {
    let block = block.trim_start_matches([' ', '\t']);
    match block.split_once('\n') {
        Some((title, body)) => (title.trim(), body),
        None => (block.trim(), ""),
    }
}

/// The single "Overview" section.
pub fn parse_overview(raw: &str) -> WikiSection {
    let trimmed = raw.trim();
    let body = trimmed.strip_prefix(OVERVIEW_LABEL).unwrap_or(trimmed);

    let mut content = paragraphs(body);
    if content.is_empty() {
        let fallback = body.trim();
        content.push(if fallback.is_empty() {
            EMPTY_OVERVIEW_PLACEHOLDER.to_string()
        } else {
            fallback.to_string()
        });
    }

    WikiSection {
        id: OVERVIEW_ID.to_string(),
        title: OVERVIEW_TITLE.to_string(),
        content,
        children: None,
    }
}

/// Parse one module response into a section with optional children.
///
/// `MODULE: <title>` names the section; without it the whole text is body and
/// the title comes from `module_name`. Each `SUBSECTION: <title>` block becomes a
/// child; blocks with an empty title are dropped.
pub fn parse_module(module_name: &str, raw: &str) -> WikiSection {
    let fallback_title = capitalize_first(module_name);
    let (title, body) = match raw.split_once(MODULE_MARKER) {
        Some((_, rest)) => {
            let (title, body) = split_title(rest);
            let title = if title.is_empty() {
                fallback_title
            } else {
                title.to_string()
            };
            (title, body)
        }
        None => (fallback_title, raw),
    };

    let mut blocks = body.split(SUBSECTION_MARKER);
    let main = blocks.next().unwrap_or("");
    let children: Vec<WikiSection> = blocks
        .filter_map(|block| {
            let (sub_title, sub_body) = split_title(block);
            if sub_title.is_empty() {
                debug!(module = module_name, "Dropping subsection without a title");
                return None;
            }
            let mut content = paragraphs(sub_body);
            if content.is_empty() {
                content.push(EMPTY_MODULE_PLACEHOLDER.to_string());
            }
            Some(WikiSection {
                id: slugify(&format!("{module_name}-{sub_title}")),
                title: sub_title.to_string(),
                content,
                children: None,
            })
        })
        .collect();

    let mut content = paragraphs(main);
    if content.is_empty() && children.is_empty() {
        content.push(EMPTY_MODULE_PLACEHOLDER.to_string());
    }

    WikiSection {
        id: slugify(module_name),
        title,
        content,
        children: if children.is_empty() {
            None
        } else {
            Some(children)
        },
    }
}

/// Overview first, then modules in the order given. Ids are made unique across
/// the whole tree by suffixing `-2`, `-3`, ...
pub fn assemble<'a, I>(overview: &str, modules: I) -> Vec<WikiSection>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut sections = vec![parse_overview(overview)];
    sections.extend(modules.into_iter().map(|(name, raw)| parse_module(name, raw)));

    let mut seen = HashSet::new();
    for section in &mut sections {
        dedupe_ids(section, &mut seen);
    }
    sections
}

fn dedupe_ids(section: &mut WikiSection, seen: &mut HashSet<String>) {
    if section.id.is_empty() {
        section.id = "section".to_string();
    }
    if !seen.insert(section.id.clone()) {
        let base = section.id.clone();
        let mut n = 2;
        while !seen.insert(format!("{base}-{n}")) {
            n += 1;
        }
        section.id = format!("{base}-{n}");
    }
    if let Some(children) = section.children.as_mut() {
        for child in children {
            dedupe_ids(child, seen);
        }
    }
}
