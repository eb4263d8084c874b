use std::path::Path;
use std::sync::Arc;
use crate::core::config::{Enforce, LoaderRule, LoaderUse};
use crate::core::interfaces::{LoadedSource, Transform, TransformContext};
use crate::core::models::{ModuleId, ModuleType};
use crate::utils::{Result, StitchError, TransformError};
use super::transforms::TransformRegistry;

/// Transform selected for one module, with its rule's options
struct Step {
    transform: Arc<dyn Transform>,
    options: serde_json::Value,
}

/// Applies matching loader rules to raw module bytes.
///
/// Uses from every matching rule are concatenated in `post`, normal, `pre`
/// order, then executed last-declared first: `["style", "css"]` runs `css`
/// and feeds its output to `style`, and `pre` rules see the raw bytes.
pub struct LoaderPipeline {
    rules: Vec<LoaderRule>,
    registry: TransformRegistry,
}

impl LoaderPipeline {
    /// Fails when a rule names a transform the registry does not know
    pub fn new(rules: Vec<LoaderRule>, registry: TransformRegistry) -> Result<Self> {
        fn check(rules: &[LoaderRule], registry: &TransformRegistry) -> Result<()> {
            for rule in rules {
                for loader_use in &rule.uses {
                    if !registry.contains(&loader_use.loader) {
                        return Err(StitchError::config(format!(
                            "unknown loader '{}' (available: {})",
                            loader_use.loader,
                            registry.names().join(", ")
                        )));
                    }
                }
                check(&rule.one_of, registry)?;
            }
            Ok(())
        }

        check(&rules, &registry)?;
        Ok(Self { rules, registry })
    }

    pub fn rules(&self) -> &[LoaderRule] {
        &self.rules
    }

    /// Loader names that apply to `path`, in execution order
    pub fn plan_for(&self, path: &Path) -> Vec<String> {
        self.select(path)
            .into_iter()
            .rev()
            .map(|u| u.loader.clone())
            .collect()
    }

    /// Run the pipeline for one module. No matching rule means the bytes pass
    /// through unchanged, typed by extension.
    pub fn load(
        &self,
        module: &ModuleId,
        raw: Vec<u8>,
        root: &Path,
    ) -> std::result::Result<LoadedSource, TransformError> {
        let mut source = LoadedSource::new(raw, ModuleType::from_path(module.path()));

        for step in self.steps(module.path()).into_iter().rev() {
            let ctx = TransformContext {
                module,
                root,
                options: &step.options,
            };
            let id = step.transform.id().to_string();
            source = step.transform.apply(source, &ctx).map_err(|e| TransformError {
                module: module.path().to_path_buf(),
                transform: id,
                message: format!("{:#}", e),
            })?;
        }

        Ok(source)
    }

    fn steps(&self, path: &Path) -> Vec<Step> {
        self.select(path)
            .into_iter()
            .filter_map(|u| {
                self.registry.get(&u.loader).map(|transform| Step {
                    transform,
                    options: u.options.clone(),
                })
            })
            .collect()
    }

    /// Uses in declaration order, grouped by enforce phase (post first)
    fn select(&self, path: &Path) -> Vec<&LoaderUse> {
        let mut phased: Vec<(Enforce, &LoaderUse)> = Vec::new();
        for rule in &self.rules {
            collect_rule(rule, path, &mut phased);
        }
        // Stable sort keeps declaration order inside a phase
        phased.sort_by_key(|(enforce, _)| std::cmp::Reverse(*enforce));
        phased.into_iter().map(|(_, u)| u).collect()
    }
}

fn collect_rule<'a>(rule: &'a LoaderRule, path: &Path, out: &mut Vec<(Enforce, &'a LoaderUse)>) {
    if !rule.matches(path) {
        return;
    }
    out.extend(rule.uses.iter().map(|u| (rule.enforce, u)));
    if let Some(first) = rule.one_of.iter().find(|sub| sub.matches(path)) {
        collect_rule(first, path, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    /// Appends its tag so tests can observe execution order
    struct Tag(&'static str);

    impl Transform for Tag {
        fn id(&self) -> &str {
            self.0
        }

        fn apply(&self, mut source: LoadedSource, _ctx: &TransformContext<'_>) -> anyhow::Result<LoadedSource> {
            source.bytes.extend_from_slice(format!("|{}", self.0).as_bytes());
            Ok(source)
        }
    }

    struct Fail;

    impl Transform for Fail {
        fn id(&self) -> &str {
            "fail"
        }

        fn apply(&self, _source: LoadedSource, _ctx: &TransformContext<'_>) -> anyhow::Result<LoadedSource> {
            bail!("boom")
        }
    }

    fn registry() -> TransformRegistry {
        let mut registry = TransformRegistry::with_builtins();
        registry.register(Arc::new(Tag("t1")));
        registry.register(Arc::new(Tag("t2")));
        registry.register(Arc::new(Tag("t3")));
        registry.register(Arc::new(Fail));
        registry
    }

    fn load(pipeline: &LoaderPipeline, path: &str) -> std::result::Result<String, TransformError> {
        let id = ModuleId::from_path(path);
        pipeline
            .load(&id, b"src".to_vec(), Path::new("/p"))
            .map(|s| String::from_utf8(s.bytes).unwrap())
    }

    #[test]
    fn test_uses_run_last_declared_first() {
        let rule = LoaderRule::new(r"\.js$", vec![LoaderUse::new("t1"), LoaderUse::new("t2")]).unwrap();
        let pipeline = LoaderPipeline::new(vec![rule], registry()).unwrap();

        assert_eq!(load(&pipeline, "/p/a.js").unwrap(), "src|t2|t1");
        assert_eq!(pipeline.plan_for(Path::new("/p/a.js")), vec!["t2", "t1"]);
    }

    #[test]
    fn test_no_matching_rule_passes_through() {
        let rule = LoaderRule::new(r"\.css$", vec![LoaderUse::new("t1")]).unwrap();
        let pipeline = LoaderPipeline::new(vec![rule], registry()).unwrap();

        assert_eq!(load(&pipeline, "/p/a.js").unwrap(), "src");
    }

    #[test]
    fn test_enforce_phases_wrap_normal_rules() {
        let normal = LoaderRule::new(r"\.js$", vec![LoaderUse::new("t2")]).unwrap();
        let mut pre = LoaderRule::new(r"\.js$", vec![LoaderUse::new("t1")]).unwrap();
        pre.enforce = Enforce::Pre;
        let mut post = LoaderRule::new(r"\.js$", vec![LoaderUse::new("t3")]).unwrap();
        post.enforce = Enforce::Post;

        let pipeline = LoaderPipeline::new(vec![post, normal, pre], registry()).unwrap();
        // pre runs first, post last
        assert_eq!(load(&pipeline, "/p/a.js").unwrap(), "src|t1|t2|t3");
    }

    #[test]
    fn test_one_of_takes_first_match() {
        let mut rule = LoaderRule::default();
        rule.one_of = vec![
            LoaderRule::new(r"\.js$", vec![LoaderUse::new("t1")]).unwrap(),
            LoaderRule::new(r"a\.js$", vec![LoaderUse::new("t2")]).unwrap(),
        ];
        let pipeline = LoaderPipeline::new(vec![rule], registry()).unwrap();

        assert_eq!(load(&pipeline, "/p/a.js").unwrap(), "src|t1");
    }

    #[test]
    fn test_failure_names_module_and_transform() {
        let rule = LoaderRule::new(r"\.js$", vec![LoaderUse::new("fail")]).unwrap();
        let pipeline = LoaderPipeline::new(vec![rule], registry()).unwrap();

        let err = load(&pipeline, "/p/a.js").unwrap_err();
        assert_eq!(err.transform, "fail");
        assert_eq!(err.module, Path::new("/p/a.js"));
        assert!(err.message.contains("boom"));
    }

    #[test]
    fn test_unknown_loader_rejected() {
        let rule = LoaderRule::new(r"\.ts$", vec![LoaderUse::new("babel")]).unwrap();
        assert!(LoaderPipeline::new(vec![rule], registry()).is_err());
    }

    #[test]
    fn test_style_after_css_produces_js() {
        let rule = LoaderRule::new(r"\.css$", vec![LoaderUse::new("style"), LoaderUse::new("css")]).unwrap();
        let pipeline = LoaderPipeline::new(vec![rule], TransformRegistry::with_builtins()).unwrap();

        let id = ModuleId::from_path("/p/app.css");
        let out = pipeline.load(&id, b"a { b: c }".to_vec(), Path::new("/p")).unwrap();
        assert_eq!(out.meta.module_type, ModuleType::JavaScript);
        assert!(String::from_utf8(out.bytes).unwrap().contains("createElement(\"style\")"));
    }
}
