use std::collections::HashMap;

use crate::config::ResolvedConfig;
use crate::error::CompareError;

/// A rule the analyzer can be asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    name: String,
    dependency_sensitive: bool,
}

impl RuleSpec {
    pub fn new(name: impl Into<String>, dependency_sensitive: bool) -> Self {
        Self {
            name: name.into(),
            dependency_sensitive,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The rule loads the package's code, so its dependencies must resolve.
    pub fn dependency_sensitive(&self) -> bool {
        self.dependency_sensitive
    }
}

/// Built-in rules, with the ones that execute package code marked.
const BUILTIN_RULES: &[(&str, bool)] = &[
    ("absolute_path_linter", false),
    ("assignment_linter", false),
    ("brace_linter", false),
    ("commas_linter", false),
    ("commented_code_linter", false),
    ("cyclocomp_linter", false),
    ("equals_na_linter", false),
    ("function_left_parentheses_linter", false),
    ("indentation_linter", false),
    ("infix_spaces_linter", false),
    ("line_length_linter", false),
    ("object_length_linter", true),
    ("object_name_linter", true),
    ("object_usage_linter", true),
    ("paren_body_linter", false),
    ("pipe_continuation_linter", false),
    ("quotes_linter", false),
    ("semicolon_linter", false),
    ("seq_linter", false),
    ("spaces_inside_linter", false),
    ("T_and_F_symbol_linter", false),
    ("trailing_blank_lines_linter", false),
    ("trailing_whitespace_linter", false),
    ("vector_logic_linter", false),
    ("whitespace_linter", false),
];

pub struct RuleRegistry {
    rules: Vec<RuleSpec>,
    index: HashMap<String, usize>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build the default registry with all built-in rules.
    pub fn default_registry() -> Self {
        let mut registry = Self::new();
        for (name, sensitive) in BUILTIN_RULES {
            registry.register(RuleSpec::new(*name, *sensitive));
        }
        registry
    }

    /// Built-in rules plus the `rules:` section of the config. Config entries
    /// override built-ins of the same name.
    pub fn from_config(config: &ResolvedConfig) -> Self {
        let mut registry = Self::default_registry();
        for (name, options) in config.rules() {
            registry.register(RuleSpec::new(name.clone(), options.dependency_sensitive));
        }
        registry
    }

    /// Register `rule`, replacing any rule with the same name.
    pub fn register(&mut self, rule: RuleSpec) {
        if let Some(&idx) = self.index.get(rule.name()) {
            self.rules[idx] = rule;
            return;
        }
        let idx = self.rules.len();
        self.index.insert(rule.name().to_string(), idx);
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[RuleSpec] {
        &self.rules
    }

    pub fn get(&self, name: &str) -> Option<&RuleSpec> {
        self.index.get(name).map(|&idx| &self.rules[idx])
    }

    /// Look up every name, failing on the first unknown one.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<RuleSpec>, CompareError> {
        let mut resolved: Vec<RuleSpec> = Vec::with_capacity(names.len());
        for name in names {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let rule = self.get(name).ok_or_else(|| {
                CompareError::config(format!(
                    "unknown rule '{name}' (see --list-rules)"
                ))
            })?;
            if !resolved.iter().any(|r| r.name() == rule.name()) {
                resolved.push(rule.clone());
            }
        }
        if resolved.is_empty() {
            return Err(CompareError::config("no rules selected"));
        }
        Ok(resolved)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::default_registry()
    }
}
