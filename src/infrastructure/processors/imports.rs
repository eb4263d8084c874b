use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use crate::core::models::{ImportKind, ModuleType};

// Pre-compiled regex patterns for performance.
// `(?:^|[^\w$.])` stands in for a lookbehind so `foo.import(` or `myrequire(`
// are not picked up.
static JS_IMPORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"(?:^|[^\w$.])(?:import\s*(?:[\w$*{}\s,]+?\s*from\s*)?|export\s*(?:\*(?:\s*as\s+[\w$]+)?|\{[^}]*\})\s*from\s*)['"](?P<static>[^'"\n]+)['"]"#,
        r#"|(?:^|[^\w$.])require\s*\(\s*['"](?P<require>[^'"\n]+)['"]\s*\)"#,
        r#"|(?:^|[^\w$.])import\s*\(\s*['"](?P<dynamic>[^'"\n]+)['"]\s*\)"#,
    ))
    .unwrap()
});

static CSS_IMPORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"@import\s+(?:url\s*\()?\s*['"]([^'"]+)['"]"#).unwrap()
});

/// Import found in module source, before resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    pub specifier: String,
    pub kind: ImportKind,
}

/// Extract import specifiers in source order; repeated specifiers keep their
/// first occurrence.
pub fn extract_imports(source: &str, module_type: ModuleType) -> Vec<ImportRequest> {
    let found = match module_type {
        ModuleType::JavaScript => extract_js_imports(source),
        ModuleType::Css => extract_css_imports(source),
        ModuleType::Json | ModuleType::Asset => Vec::new(),
    };

    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter(|req| seen.insert(req.specifier.clone()))
        .collect()
}

fn extract_js_imports(source: &str) -> Vec<ImportRequest> {
    JS_IMPORT_REGEX
        .captures_iter(source)
        .filter_map(|caps| {
            if let Some(m) = caps.name("static").or_else(|| caps.name("require")) {
                Some(ImportRequest {
                    specifier: m.as_str().to_string(),
                    kind: ImportKind::Static,
                })
            } else {
                caps.name("dynamic").map(|m| ImportRequest {
                    specifier: m.as_str().to_string(),
                    kind: ImportKind::Dynamic,
                })
            }
        })
        .collect()
}

fn extract_css_imports(source: &str) -> Vec<ImportRequest> {
    CSS_IMPORT_REGEX
        .captures_iter(source)
        .map(|caps| ImportRequest {
            specifier: css_specifier(&caps[1]),
            kind: ImportKind::Css,
        })
        .filter(|req| !is_remote(&req.specifier))
        .collect()
}

/// CSS treats `theme.css` as relative; `~pkg/x.css` names a package.
pub fn css_specifier(raw: &str) -> String {
    if let Some(bare) = raw.strip_prefix('~') {
        bare.to_string()
    } else if raw.starts_with("./") || raw.starts_with("../") || raw.starts_with('/') || is_remote(raw) {
        raw.to_string()
    } else {
        format!("./{}", raw)
    }
}

pub fn is_remote(specifier: &str) -> bool {
    specifier.starts_with("http://") || specifier.starts_with("https://") || specifier.starts_with("//")
}
