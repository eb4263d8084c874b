use std::collections::HashMap;
use std::sync::Arc;
use anyhow::{anyhow, bail, Context};
use once_cell::sync::Lazy;
use regex::Regex;
use crate::core::interfaces::{LoadedSource, Transform, TransformContext};
use crate::core::models::ModuleType;
use super::imports::{css_specifier, is_remote};

/// Marker the `css` transform leaves so `style` can verify its input
const CSS_MODULE_PROPERTY: &str = "css-module";

/// Whole `@import` rule, trailing media list and `;` included
static CSS_IMPORT_RULE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"@import\s+(?:url\s*\()?\s*['"]([^'"]+)['"]\s*\)?[^;]*;?"#).unwrap()
});

/// Fixed set of known transforms, addressable by loader name
#[derive(Clone)]
pub struct TransformRegistry {
    transforms: HashMap<String, Arc<dyn Transform>>,
}

impl TransformRegistry {
    pub fn empty() -> Self {
        Self {
            transforms: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(CssModuleTransform));
        registry.register(Arc::new(StyleInjectTransform));
        registry.register(Arc::new(JsonTransform));
        registry.register(Arc::new(RawTransform));
        registry.register(Arc::new(BannerTransform));
        registry.register(Arc::new(ReplaceTransform));
        registry
    }

    /// Add or replace a transform under its own id
    pub fn register(&mut self, transform: Arc<dyn Transform>) {
        self.transforms.insert(transform.id().to_string(), transform);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Transform>> {
        self.transforms.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.transforms.contains_key(id)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.transforms.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("transforms", &self.names())
            .finish()
    }
}

/// JS string literal for arbitrary text
fn js_string(text: &str) -> String {
    // serde_json's string escaping is valid JavaScript
    serde_json::Value::String(text.to_string()).to_string()
}

/// CSS text -> JS module exporting the stylesheet; `@import` rules turn into
/// JS imports so the graph keeps following them.
pub struct CssModuleTransform;

impl Transform for CssModuleTransform {
    fn id(&self) -> &str {
        "css"
    }

    fn apply(&self, source: LoadedSource, _ctx: &TransformContext<'_>) -> anyhow::Result<LoadedSource> {
        if source.meta.module_type != ModuleType::Css {
            bail!("expected CSS input, got {:?}", source.meta.module_type);
        }
        let text = source.text()?;

        let mut imports = Vec::new();
        let body = CSS_IMPORT_RULE.replace_all(text, |caps: &regex::Captures| {
            let specifier = css_specifier(&caps[1]);
            if is_remote(&specifier) {
                caps[0].to_string()
            } else {
                imports.push(specifier);
                String::new()
            }
        });

        let mut code = String::new();
        for specifier in &imports {
            code.push_str(&format!("import {};\n", js_string(specifier)));
        }
        code.push_str(&format!("export default {};\n", js_string(body.trim())));

        let mut meta = source.meta;
        meta.module_type = ModuleType::JavaScript;
        meta.properties.insert(CSS_MODULE_PROPERTY.to_string(), "true".to_string());
        Ok(LoadedSource { bytes: code.into_bytes(), meta })
    }
}

/// Wraps `css` output with code that injects a `<style>` tag
pub struct StyleInjectTransform;

impl Transform for StyleInjectTransform {
    fn id(&self) -> &str {
        "style"
    }

    fn apply(&self, source: LoadedSource, ctx: &TransformContext<'_>) -> anyhow::Result<LoadedSource> {
        if !source.meta.properties.contains_key(CSS_MODULE_PROPERTY) {
            bail!("input was not produced by the 'css' transform; declare it as [\"style\", \"css\"]");
        }
        let text = source.text()?;
        let (imports, rest): (Vec<&str>, Vec<&str>) = text
            .lines()
            .partition(|line| line.starts_with("import "));
        let css_expr = rest
            .join("\n")
            .trim()
            .strip_prefix("export default ")
            .map(|s| s.trim_end_matches(';').to_string())
            .ok_or_else(|| anyhow!("missing default export in css module"))?;

        let mut code = imports.join("\n");
        if !code.is_empty() {
            code.push('\n');
        }
        code.push_str(&format!(
            concat!(
                "const __css = {};\n",
                "if (typeof document !== \"undefined\") {{\n",
                "  const el = document.createElement(\"style\");\n",
                "  el.setAttribute(\"data-module\", {});\n",
                "  el.textContent = __css;\n",
                "  document.head.appendChild(el);\n",
                "}}\n",
                "export default __css;\n",
            ),
            css_expr,
            js_string(&ctx.module.display_relative(ctx.root)),
        ));

        let mut meta = source.meta;
        meta.properties.remove(CSS_MODULE_PROPERTY);
        Ok(LoadedSource { bytes: code.into_bytes(), meta })
    }
}

/// Validates JSON and exports it as the default value
pub struct JsonTransform;

impl Transform for JsonTransform {
    fn id(&self) -> &str {
        "json"
    }

    fn apply(&self, source: LoadedSource, _ctx: &TransformContext<'_>) -> anyhow::Result<LoadedSource> {
        let value: serde_json::Value = serde_json::from_slice(&source.bytes)
            .context("invalid JSON")?;
        let code = format!("export default {};\n", value);

        let mut meta = source.meta;
        meta.module_type = ModuleType::JavaScript;
        Ok(LoadedSource { bytes: code.into_bytes(), meta })
    }
}

/// Exports the file's text as a string
pub struct RawTransform;

impl Transform for RawTransform {
    fn id(&self) -> &str {
        "raw"
    }

    fn apply(&self, source: LoadedSource, _ctx: &TransformContext<'_>) -> anyhow::Result<LoadedSource> {
        let text = String::from_utf8_lossy(&source.bytes);
        let code = format!("export default {};\n", js_string(&text));

        let mut meta = source.meta;
        meta.module_type = ModuleType::JavaScript;
        Ok(LoadedSource { bytes: code.into_bytes(), meta })
    }
}

/// Prepends `options.text` as a comment
pub struct BannerTransform;

impl Transform for BannerTransform {
    fn id(&self) -> &str {
        "banner"
    }

    fn apply(&self, source: LoadedSource, ctx: &TransformContext<'_>) -> anyhow::Result<LoadedSource> {
        let text = ctx
            .options
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("banner requires a string 'text' option"))?;

        let banner = match source.meta.module_type {
            ModuleType::Css => format!("/* {} */\n", text),
            _ => format!("/*! {} */\n", text),
        };
        let mut bytes = banner.into_bytes();
        bytes.extend_from_slice(&source.bytes);
        Ok(LoadedSource { bytes, meta: source.meta })
    }
}

/// Regex rewrite driven by `options.pattern` / `options.replacement`
pub struct ReplaceTransform;

impl Transform for ReplaceTransform {
    fn id(&self) -> &str {
        "replace"
    }

    fn apply(&self, source: LoadedSource, ctx: &TransformContext<'_>) -> anyhow::Result<LoadedSource> {
        let pattern = ctx
            .options
            .get("pattern")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("replace requires a string 'pattern' option"))?;
        let replacement = ctx
            .options
            .get("replacement")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let re = Regex::new(pattern).with_context(|| format!("invalid pattern '{}'", pattern))?;
        let text = source.text()?;
        let replaced = re.replace_all(text, replacement).into_owned();
        Ok(LoadedSource { bytes: replaced.into_bytes(), meta: source.meta })
    }
}
