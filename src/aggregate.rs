//! Module aggregator: partition a [`FileSnapshot`] into named modules and turn
//! each module into a bounded [`ModuleTask`].

use tracing::{debug, info};

use crate::config::AggregateConfig;
use crate::contract::{FileSnapshot, Module, ModuleTask, SnapshotMeta};
use crate::preprocess::StructureExtractor;

pub const ROOT_BUCKET: &str = "root";
pub const ROOT_MODULE: &str = "Root Module";
const TRUNCATION_MARKER: &str = "\n\n... [content truncated for summarization]";

/// Keyword buckets, checked in this order against the lowercased path.
const KEYWORD_BUCKETS: [(&str, &[&str]); 6] = [
    (
        "API & Routes",
        &["route", "router", "api", "controller", "handler", "endpoint"],
    ),
    (
        "Data & Models",
        &["model", "schema", "entity", "db", "database", "migration"],
    ),
    (
        "Auth & Security",
        &["auth", "login", "jwt", "token", "session", "oauth"],
    ),
    (
        "Core & Utilities",
        &["util", "helper", "common", "shared", "core"],
    ),
    ("Tests", &["test", "spec"]),
    (
        "Config & Ops",
        &["config", "settings", "env", "docker", "compose"],
    ),
];

/// Ordered module list. Appending to an existing name merges into it.
#[derive(Debug, Default)]
struct Buckets {
    modules: Vec<Module>,
}

impl Buckets {
    fn add(&mut self, name: &str, path: &str, content: &str) {
        let idx = match self.modules.iter().position(|m| m.name == name) {
            Some(idx) => idx,
            None => {
                self.modules.push(Module::new(name));
                self.modules.len() - 1
            }
        };
        self.modules[idx]
            .files
            .insert(path.to_string(), content.to_string());
    }

    fn take(&mut self, name: &str) -> Option<Module> {
        let idx = self.modules.iter().position(|m| m.name == name)?;
        Some(self.modules.remove(idx))
    }
}

/// Semantic bucket for a file that sits at the repository root.
pub fn semantic_bucket(path: &str) -> &'static str {
    let lower = path.to_lowercase();
    for (bucket, keywords) in KEYWORD_BUCKETS {
        if keywords.iter().any(|k| lower.contains(k)) {
            return bucket;
        }
    }
    let ext = lower.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    match ext {
        "py" => "Python",
        "ts" | "tsx" => "TypeScript",
        "js" | "jsx" => "JavaScript",
        "java" => "Java",
        "go" => "Go",
        "cpp" | "c" | "h" | "hpp" => "C/C++",
        "cs" => "C#",
        _ => "Misc",
    }
}

/// Re-cluster root files into semantic groups; a single resulting group
/// collapses into one "Root Module".
pub fn cluster_root_files(files: &FileSnapshot) -> Vec<Module> {
    let mut buckets = Buckets::default();
    for (path, content) in files {
        buckets.add(semantic_bucket(path), path, content);
    }
    if buckets.modules.len() <= 1 {
        return vec![Module {
            name: ROOT_MODULE.to_string(),
            files: files.clone(),
        }];
    }
    buckets.modules
}

/// Group files by first path segment, re-clustering the root bucket when the
/// repository is flat or the root holds too many files.
pub fn aggregate_modules(files: &FileSnapshot, config: &AggregateConfig) -> Vec<Module> {
    let mut buckets = Buckets::default();
    for (path, content) in files {
        let name = match path.split_once('/') {
            Some((first, _)) => first,
            None => ROOT_BUCKET,
        };
        buckets.add(name, path, content);
    }

    let only_root = buckets.modules.len() == 1 && buckets.modules[0].name == ROOT_BUCKET;
    if only_root {
        info!(files = files.len(), "Flat repository, clustering root files");
        return cluster_root_files(files);
    }

    let root_is_large = buckets
        .modules
        .iter()
        .any(|m| m.name == ROOT_BUCKET && m.files.len() >= config.root_recluster_threshold);
    if root_is_large {
        if let Some(root) = buckets.take(ROOT_BUCKET) {
            info!(root_files = root.files.len(), "Large root bucket, splitting");
            for group in cluster_root_files(&root.files) {
                for (path, content) in &group.files {
                    buckets.add(&group.name, path, content);
                }
            }
        }
    }

    debug!(modules = buckets.modules.len(), "Aggregated modules");
    buckets.modules
}

/// Build the condensed text for one module from its largest files.
pub fn build_module_task(
    module: &Module,
    extractor: &StructureExtractor,
    config: &AggregateConfig,
) -> ModuleTask {
    let mut largest: Vec<(&String, &String)> = module.files.iter().collect();
    // largest first, path order among equals
    largest.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
    largest.truncate(config.files_per_module);

    let blocks: Vec<String> = largest
        .into_iter()
        .map(|(path, code)| format!("File: {}\n{}", path, extractor.extract(path, code)))
        .collect();
    let text = format!("### MODULE: {}\n{}", module.name, blocks.join("\n\n"));

    ModuleTask {
        module: module.name.clone(),
        text: truncate_chars(text, config.max_module_chars),
    }
}

pub fn build_module_tasks(
    modules: &[Module],
    extractor: &StructureExtractor,
    config: &AggregateConfig,
) -> Vec<ModuleTask> {
    modules
        .iter()
        .filter(|m| !m.files.is_empty())
        .map(|m| build_module_task(m, extractor, config))
        .collect()
}

fn truncate_chars(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text,
    }
}

/// Repository description and module map handed to the overview task.
#[derive(Debug, Clone, PartialEq)]
pub struct OverviewInput {
    pub repo_info: String,
    pub modules_map: String,
}

pub fn build_overview_input(
    files: &FileSnapshot,
    meta: &SnapshotMeta,
    modules: &[ModuleTask],
    config: &AggregateConfig,
) -> OverviewInput {
    let name = if meta.repo.is_empty() {
        &meta.repo_url
    } else {
        &meta.repo
    };
    let sample: Vec<String> = files
        .keys()
        .take(config.overview_path_sample)
        .map(|p| format!("- {p}"))
        .collect();
    OverviewInput {
        repo_info: format!(
            "Repository: {}\nStructure (sample):\n{}",
            name,
            sample.join("\n")
        ),
        modules_map: modules
            .iter()
            .map(|m| format!("- {}", m.module))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let out = truncate_chars("ééééé".to_string(), 2);
        assert!(out.starts_with("éé"));
        assert!(out.ends_with("[content truncated for summarization]"));
        assert_eq!(truncate_chars("abc".to_string(), 3), "abc");
    }

    #[test]
    fn keyword_priority_beats_extension() {
        assert_eq!(semantic_bucket("api_models.py"), "API & Routes");
        assert_eq!(semantic_bucket("user_model.ts"), "Data & Models");
        assert_eq!(semantic_bucket("main.go"), "Go");
        assert_eq!(semantic_bucket("Makefile"), "Misc");
    }
}
