//! Decides whether an observed candidate is recorded.
//!
//! Precedence, first match wins:
//!
//! 1. Overrides from the [`OverrideRegistry`]: an inclusion covering the candidate
//!    means "record", then an exclusion covering it means "skip".
//! 2. Per-type [`LoggingIgnore`](crate::models::LoggingIgnore) metadata.
//! 3. Configured exclude patterns of the candidate's category.
//! 4. The category's `exclude.unknown` flag for candidates without an application.
//! 5. Otherwise recorded.
//!
//! Steps 3 and 4 for model and field candidates only depend on the entity type
//! and the configuration, so they are memoized per (type, kind, operation or field)
//! and dropped whenever the configuration snapshot version changes.

mod registry;

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
pub use registry::{ModelOverride, Override, OverrideRegistry, RequestOverride, Selection};

use crate::{
    config::{PatternKind, SearchPattern, candidate_in_scope},
    models::{EntityType, Operation},
    settings::ConfigSnapshot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExclusionKind {
    Model,
    Field,
    Request,
    Unspecified,
}

/// Something a probe wants to record.
#[derive(Debug, Clone, Copy)]
pub enum Candidate<'a> {
    Model {
        entity: &'a EntityType,
        operation: Operation,
    },
    Field {
        entity: &'a EntityType,
        field: &'a str,
    },
    Request {
        handler: Option<&'a str>,
        method: &'a str,
        application: Option<&'a str>,
        status: u16,
    },
    Log {
        application: Option<&'a str>,
        file: Option<&'a str>,
    },
}

impl Candidate<'_> {
    pub fn kind(&self) -> ExclusionKind {
        match self {
            Candidate::Model { .. } => ExclusionKind::Model,
            Candidate::Field { .. } => ExclusionKind::Field,
            Candidate::Request { .. } => ExclusionKind::Request,
            Candidate::Log { .. } => ExclusionKind::Unspecified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MemoKey {
    version: u64,
    entity: String,
    application: Option<String>,
    kind: ExclusionKind,
    detail: String,
}

#[derive(Debug, Default)]
pub struct RuleEngine {
    registry: OverrideRegistry,
    memo: DashMap<MemoKey, bool>,
    memo_version: AtomicU64,
    /// Derived path globs for file patterns, keyed by pattern value.
    path_globs: DashMap<String, Vec<SearchPattern>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &OverrideRegistry {
        &self.registry
    }

    /// Drop memoized decisions.
    pub fn invalidate(&self) {
        self.memo.clear();
        self.path_globs.clear();
    }

    pub fn should_exclude(&self, config: &ConfigSnapshot, candidate: Candidate<'_>) -> bool {
        let excluded = match candidate {
            Candidate::Model { entity, operation } => {
                self.model_excluded(config, entity, operation)
            }
            Candidate::Field { entity, field } => self.field_excluded(config, entity, field),
            Candidate::Request {
                handler,
                method,
                application,
                status,
            } => self.request_excluded(config, handler, method, application, status),
            Candidate::Log { application, file } => self.log_excluded(config, application, file),
        };
        tracing::trace!(kind = ?candidate.kind(), excluded, "Rule evaluated");
        excluded
    }

    fn model_excluded(
        &self,
        config: &ConfigSnapshot,
        entity: &EntityType,
        operation: Operation,
    ) -> bool {
        let identity = entity.qualified_name();

        if let Some(include) = self.registry.model_inclusion(&identity)
            && include.operations.contains(&operation)
        {
            return false;
        }
        if let Some(exclude) = self.registry.model_exclusion(&identity)
            && exclude.operations.contains(&operation)
        {
            return true;
        }

        if entity.ignore.complete || entity.ignore.operations.contains(&operation) {
            return true;
        }

        self.memoized(config, entity, ExclusionKind::Model, operation.as_str(), || {
            let exclude = &config.model.exclude;
            let name = entity.name.as_str();

            let mut qualified = vec![name.to_string()];
            if let Some(module) = &entity.module {
                qualified.push(format!("{module}.{name}"));
            }
            if let Some(application) = &entity.application {
                qualified.push(format!("{application}.{name}"));
            }
            if qualified.iter().any(|c| candidate_in_scope(c, &exclude.models)) {
                return true;
            }

            if let Some(module) = &entity.module
                && candidate_in_scope(module, &exclude.models)
            {
                return true;
            }

            match &entity.application {
                Some(application) => candidate_in_scope(application, &exclude.applications),
                None => exclude.unknown,
            }
        })
    }

    fn field_excluded(&self, config: &ConfigSnapshot, entity: &EntityType, field: &str) -> bool {
        let identity = entity.qualified_name();
        let field_name = field.to_string();

        if let Some(include) = self.registry.model_inclusion(&identity)
            && include.fields.contains(&field_name)
        {
            return false;
        }
        if let Some(exclude) = self.registry.model_exclusion(&identity)
            && exclude.fields.contains(&field_name)
        {
            return true;
        }

        if entity.ignore.complete || entity.ignore.fields.contains(field) {
            return true;
        }

        self.memoized(config, entity, ExclusionKind::Field, field, || {
            let patterns = &config.model.exclude.fields;
            let name = entity.name.as_str();

            let mut candidates = vec![field.to_string(), format!("{name}.{field}")];
            if let Some(application) = &entity.application {
                candidates.push(format!("{application}.{name}.{field}"));
            }
            candidates.iter().any(|c| candidate_in_scope(c, patterns))
        })
    }

    fn request_excluded(
        &self,
        config: &ConfigSnapshot,
        handler: Option<&str>,
        method: &str,
        application: Option<&str>,
        status: u16,
    ) -> bool {
        if let Some(handler) = handler {
            if let Some(include) = self.registry.request_inclusion(handler)
                && include.covers(method)
            {
                return false;
            }
            if let Some(exclude) = self.registry.request_exclusion(handler)
                && exclude.covers(method)
            {
                return true;
            }
        }

        let exclude = &config.request.exclude;
        let method = method.to_lowercase();
        if exclude.methods.contains(&method) {
            return true;
        }
        if let Some(application) = application
            && candidate_in_scope(application, &exclude.applications)
        {
            return true;
        }
        if exclude.status.contains(&status) {
            return true;
        }
        application.is_none() && exclude.unknown
    }

    fn log_excluded(
        &self,
        config: &ConfigSnapshot,
        application: Option<&str>,
        file: Option<&str>,
    ) -> bool {
        let exclude = &config.unspecified.exclude;

        if let Some(application) = application
            && candidate_in_scope(application, &exclude.applications)
        {
            return true;
        }

        if let Some(file) = file {
            if candidate_in_scope(file, &exclude.files) {
                return true;
            }
            if exclude
                .files
                .iter()
                .filter(|pattern| pattern.kind() != PatternKind::Regex)
                .any(|pattern| self.path_matches(file, pattern))
            {
                return true;
            }
        }

        application.is_none() && exclude.unknown
    }

    /// Match a file pattern against trailing sub-paths, directory prefixes and
    /// single directory segments of `file`.
    fn path_matches(&self, file: &str, pattern: &SearchPattern) -> bool {
        let parts: Vec<&str> = file.split(['/', '\\']).filter(|p| !p.is_empty()).collect();
        let suffix_hit = (0..parts.len()).any(|i| pattern.matches(&parts[i..].join("/")));
        if suffix_hit {
            return true;
        }

        let normalized = format!("/{}", parts.join("/"));
        let globs = self
            .path_globs
            .entry(pattern.value().to_string())
            .or_insert_with(|| {
                let value = pattern.value();
                [format!("{value}/*"), format!("/*{value}"), format!("/*{value}/*")]
                    .into_iter()
                    .filter_map(|glob| SearchPattern::glob(glob).ok())
                    .collect()
            })
            .clone();
        candidate_in_scope(&normalized, &globs)
            || candidate_in_scope(normalized.trim_start_matches('/'), &globs)
    }

    fn memoized(
        &self,
        config: &ConfigSnapshot,
        entity: &EntityType,
        kind: ExclusionKind,
        detail: &str,
        evaluate: impl FnOnce() -> bool,
    ) -> bool {
        let version = config.version();
        if self.memo_version.swap(version, Ordering::AcqRel) != version {
            self.memo.clear();
        }

        // Decisions also depend on the application, not only on the type identity.
        let key = MemoKey {
            version,
            entity: entity.qualified_name(),
            application: entity.application.clone(),
            kind,
            detail: detail.to_string(),
        };
        if let Some(hit) = self.memo.get(&key) {
            return *hit;
        }
        let decision = evaluate();
        self.memo.insert(key, decision);
        decision
    }

    #[cfg(test)]
    fn memo_len(&self) -> usize {
        self.memo.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AutologConfig,
        models::LoggingIgnore,
        settings::Settings,
    };

    fn snapshot(toml: &str) -> Arc<ConfigSnapshot> {
        Settings::from_str(toml).unwrap().snapshot()
    }

    fn order() -> EntityType {
        EntityType::new("Order")
            .module("shop.models")
            .application("shop")
            .field("total", "DecimalField")
            .field("note", "TextField")
    }

    fn model(entity: &EntityType, operation: Operation) -> Candidate<'_> {
        Candidate::Model { entity, operation }
    }

    fn field<'a>(entity: &'a EntityType, field: &'a str) -> Candidate<'a> {
        Candidate::Field { entity, field }
    }

    #[test]
    fn test_default_records_everything_from_named_application() {
        let engine = RuleEngine::new();
        let config = snapshot("");
        let entity = order();
        assert!(!engine.should_exclude(&config, model(&entity, Operation::Create)));
        assert!(!engine.should_exclude(&config, field(&entity, "total")));
    }

    #[test]
    fn test_model_patterns_match_all_name_forms() {
        let engine = RuleEngine::new();
        let entity = order();
        for pattern in ["pl:Order", "pl:shop.models.Order", "pl:shop.Order", "pl:shop.models"] {
            let config = snapshot(&format!("[model.exclude]\nmodels = [\"{pattern}\"]"));
            assert!(
                engine.should_exclude(&config, model(&entity, Operation::Modify)),
                "{pattern} should exclude"
            );
        }
    }

    #[test]
    fn test_global_applications_apply_to_models() {
        let engine = RuleEngine::new();
        let config = snapshot("");
        let session = EntityType::new("Session").application("sessions");
        assert!(engine.should_exclude(&config, model(&session, Operation::Create)));
    }

    #[test]
    fn test_unknown_application() {
        let engine = RuleEngine::new();
        let loose = EntityType::new("Loose");
        assert!(!engine.should_exclude(&snapshot(""), model(&loose, Operation::Create)));

        let strict = snapshot("[model.exclude]\nunknown = true");
        assert!(engine.should_exclude(&strict, model(&loose, Operation::Create)));
    }

    #[test]
    fn test_logging_ignore() {
        let engine = RuleEngine::new();
        let config = snapshot("");

        let ignored = order().ignore(LoggingIgnore::operations([Operation::Delete]));
        assert!(engine.should_exclude(&config, model(&ignored, Operation::Delete)));
        assert!(!engine.should_exclude(&config, model(&ignored, Operation::Modify)));

        let complete = order().ignore(LoggingIgnore::complete());
        assert!(engine.should_exclude(&config, model(&complete, Operation::Create)));
        assert!(engine.should_exclude(&config, field(&complete, "total")));
    }

    #[test]
    fn test_inclusion_beats_exclusion_and_config() {
        let engine = RuleEngine::new();
        let config = snapshot("[model.exclude]\nmodels = [\"Order\"]");
        let entity = order();
        assert!(engine.should_exclude(&config, model(&entity, Operation::Create)));

        engine
            .registry()
            .register_exclusion("shop.models.Order", ModelOverride::exclude_all());
        engine.registry().register_inclusion(
            "shop.models.Order",
            ModelOverride::include_all().operations([Operation::Create]),
        );
        assert!(!engine.should_exclude(&config, model(&entity, Operation::Create)));
        assert!(engine.should_exclude(&config, model(&entity, Operation::Delete)));
    }

    #[test]
    fn test_exclusion_beats_logging_ignore_order() {
        let engine = RuleEngine::new();
        let config = snapshot("");
        let entity = order();
        engine.registry().register_exclusion(
            "shop.models.Order",
            ModelOverride::exclude_all()
                .operations([Operation::Modify])
                .no_fields(),
        );
        assert!(engine.should_exclude(&config, model(&entity, Operation::Modify)));
        assert!(!engine.should_exclude(&config, model(&entity, Operation::Create)));
        assert!(!engine.should_exclude(&config, field(&entity, "note")));
    }

    #[test]
    fn test_field_patterns() {
        let engine = RuleEngine::new();
        let entity = order();
        for pattern in ["note", "Order.note", "shop.Order.note", "re:^no"] {
            let config = snapshot(&format!("[model.exclude]\nfields = [\"{pattern}\"]"));
            assert!(
                engine.should_exclude(&config, field(&entity, "note")),
                "{pattern} should exclude"
            );
            assert!(!engine.should_exclude(&config, field(&entity, "total")));
        }
    }

    #[test]
    fn test_memo_follows_config_version() {
        let engine = RuleEngine::new();
        let settings = Settings::new(AutologConfig::default()).unwrap();
        let entity = order();

        assert!(!engine.should_exclude(&settings.snapshot(), model(&entity, Operation::Create)));
        assert_eq!(engine.memo_len(), 1);

        settings.update(|config| {
            config.model.exclude.models = vec![SearchPattern::plain("order").unwrap()];
        });
        // Same snapshot: memoized answer.
        assert!(!engine.should_exclude(&settings.snapshot(), model(&entity, Operation::Create)));

        settings.invalidate().unwrap();
        assert!(engine.should_exclude(&settings.snapshot(), model(&entity, Operation::Create)));
    }

    #[test]
    fn test_memo_separates_same_name_types_of_different_applications() {
        let engine = RuleEngine::new();
        let config = snapshot("[model.exclude]\napplications = [\"pl:billing\"]");
        let shop = EntityType::new("Order").application("shop");
        let billing = EntityType::new("Order").application("billing");

        assert!(!engine.should_exclude(&config, model(&shop, Operation::Create)));
        assert!(engine.should_exclude(&config, model(&billing, Operation::Create)));

        let config = snapshot("[model.exclude]\nfields = [\"billing.Order.total\"]");
        assert!(!engine.should_exclude(&config, field(&shop, "total")));
        assert!(engine.should_exclude(&config, field(&billing, "total")));
    }

    fn request<'a>(handler: Option<&'a str>, method: &'a str, status: u16) -> Candidate<'a> {
        Candidate::Request {
            handler,
            method,
            application: handler.and_then(|h| h.split('.').next()),
            status,
        }
    }

    #[test]
    fn test_request_defaults() {
        let engine = RuleEngine::new();
        let config = snapshot("");
        assert!(engine.should_exclude(&config, request(Some("shop.views.list"), "GET", 201)));
        assert!(engine.should_exclude(&config, request(Some("shop.views.create"), "POST", 200)));
        assert!(!engine.should_exclude(&config, request(Some("shop.views.create"), "POST", 201)));
        assert!(engine.should_exclude(&config, request(Some("admin.views.index"), "POST", 302)));
        assert!(!engine.should_exclude(&config, request(None, "POST", 201)));

        let strict = snapshot("[request.exclude]\nunknown = true");
        assert!(engine.should_exclude(&strict, request(None, "POST", 201)));
    }

    #[test]
    fn test_request_overrides() {
        let engine = RuleEngine::new();
        let config = snapshot("");

        engine
            .registry()
            .register_inclusion("shop.views.list", RequestOverride::methods(["GET"]));
        assert!(!engine.should_exclude(&config, request(Some("shop.views.list"), "get", 200)));

        engine
            .registry()
            .register_exclusion("shop.views.create", RequestOverride::all_methods());
        assert!(engine.should_exclude(&config, request(Some("shop.views.create"), "POST", 201)));
    }

    fn log<'a>(application: Option<&'a str>, file: &'a str) -> Candidate<'a> {
        Candidate::Log {
            application,
            file: Some(file),
        }
    }

    #[test]
    fn test_log_file_patterns() {
        let engine = RuleEngine::new();
        let config = snapshot(
            r#"
            [unspecified.exclude]
            files = ["pl:vendor", "gl:*/migrations/*", "re:^/tmp/"]
        "#,
        );

        // Directory segment.
        assert!(engine.should_exclude(&config, log(Some("shop"), "/srv/app/vendor/lib.py")));
        // Directory prefix.
        assert!(engine.should_exclude(&config, log(Some("shop"), "vendor/lib.py")));
        // Glob over the whole path.
        assert!(engine.should_exclude(&config, log(Some("shop"), "/srv/shop/migrations/0001.py")));
        // Regex only against the whole path.
        assert!(engine.should_exclude(&config, log(Some("shop"), "/tmp/x.py")));
        assert!(!engine.should_exclude(&config, log(Some("shop"), "/srv/tmp/x.py")));

        assert!(!engine.should_exclude(&config, log(Some("shop"), "/srv/app/views.py")));
    }

    #[test]
    fn test_log_trailing_subpath() {
        let engine = RuleEngine::new();
        let config = snapshot("[unspecified.exclude]\nfiles = [\"app/views.py\"]");
        assert!(engine.should_exclude(&config, log(Some("shop"), "/srv/project/app/views.py")));
        assert!(!engine.should_exclude(&config, log(Some("shop"), "/srv/project/app/models.py")));
    }

    #[test]
    fn test_log_applications_and_unknown() {
        let engine = RuleEngine::new();
        let config = snapshot("[unspecified.exclude]\nunknown = true");
        assert!(engine.should_exclude(&config, log(Some("migrations"), "/srv/a.py")));
        assert!(engine.should_exclude(&config, log(None, "/srv/a.py")));
        assert!(!engine.should_exclude(&config, log(Some("shop"), "/srv/a.py")));
    }
}
