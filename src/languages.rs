//! Language adapter registry.
//!
//! Maps a submission's declared language to a compile/run recipe. Adapters
//! are pure data loaded from TOML; adding a language never touches the
//! executor or the runner.

use std::collections::HashMap;

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;

/// A submission declared a language the registry does not know.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

/// Compile/run recipe for one supported language.
#[derive(Debug, Clone)]
pub struct AdapterSpec {
    /// Name the source file is written under (e.g. "main.cpp").
    pub source_file: String,
    /// Compile command (None for pure interpreters).
    pub compile_command: Option<Vec<String>>,
    /// Run command, executed from the submission workspace.
    pub run_command: Vec<String>,
    /// Time limit multiplier and bonus: (multiplier, bonus_seconds).
    /// actual_time = base_time * multiplier + bonus
    pub time_limit: Option<(u32, u32)>,
    /// Memory limit multiplier and bonus: (multiplier, bonus_mb).
    /// actual_memory = base_memory * multiplier + bonus
    pub memory_limit: Option<(u32, u32)>,
}

impl AdapterSpec {
    /// Adjusted time limit in milliseconds for this language.
    pub fn calculate_time_limit(&self, base_time_ms: u64) -> u64 {
        match self.time_limit {
            Some((multiplier, bonus_seconds)) => {
                base_time_ms * u64::from(multiplier) + u64::from(bonus_seconds) * 1000
            }
            None => base_time_ms,
        }
    }

    /// Adjusted memory limit in KB for this language.
    pub fn calculate_memory_limit(&self, base_memory_kb: u64) -> u64 {
        match self.memory_limit {
            Some((multiplier, bonus_mb)) => {
                base_memory_kb * u64::from(multiplier) + u64::from(bonus_mb) * 1024
            }
            None => base_memory_kb,
        }
    }
}

/// Raw TOML configuration for a language.
#[derive(Debug, Deserialize)]
struct RawAdapter {
    source_file: String,
    compile_command: Option<String>,
    run_command: String,
    #[serde(default)]
    time_limit: Vec<String>,
    #[serde(default)]
    memory_limit: Vec<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Registry of language adapters, keyed by lowercase name and alias.
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    adapters: HashMap<String, AdapterSpec>,
}

impl LanguageRegistry {
    /// Registry with no adapters; languages are added via [`insert`].
    ///
    /// [`insert`]: LanguageRegistry::insert
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry built from the bundled adapter table.
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_toml(include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/files/languages.toml"
        )))
    }

    /// Parse a registry from a TOML adapter table.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let raw_configs: HashMap<String, RawAdapter> = toml::from_str(content)?;

        let mut registry = Self::default();

        for (name, raw) in raw_configs {
            let parse_limit =
                |raw_limit: &[String], kind: &str| -> anyhow::Result<Option<(u32, u32)>> {
                    if raw_limit.is_empty() {
                        return Ok(None);
                    }
                    if raw_limit.len() != 2 {
                        anyhow::bail!("Invalid {} limit for {}: {:?}", kind, name, raw_limit);
                    }
                    let multiplier = raw_limit[0].parse::<u32>().with_context(|| {
                        format!("Invalid {} multiplier for {}: {}", kind, name, raw_limit[0])
                    })?;
                    let offset = raw_limit[1].parse::<u32>().with_context(|| {
                        format!("Invalid {} offset for {}: {}", kind, name, raw_limit[1])
                    })?;
                    Ok(Some((multiplier, offset)))
                };

            let spec = AdapterSpec {
                source_file: raw.source_file,
                compile_command: raw.compile_command.as_deref().map(into_command),
                run_command: into_command(&raw.run_command),
                time_limit: parse_limit(&raw.time_limit, "time")?,
                memory_limit: parse_limit(&raw.memory_limit, "memory")?,
            };

            registry.insert(&name, spec.clone());
            for alias in &raw.aliases {
                registry.insert(alias, spec.clone());
            }
        }

        Ok(registry)
    }

    /// Register an adapter under a (lowercased) name.
    pub fn insert(&mut self, name: &str, spec: AdapterSpec) {
        self.adapters.insert(name.to_lowercase(), spec);
    }

    /// Resolve a declared language to its adapter.
    pub fn resolve(&self, language: &str) -> Result<&AdapterSpec, UnsupportedLanguage> {
        self.adapters
            .get(&language.to_lowercase())
            .ok_or_else(|| UnsupportedLanguage(language.to_string()))
    }

    /// All registered language names and aliases.
    pub fn supported(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_TOML: &str = r#"
[c]
source_file = "main.c"
compile_command = "gcc -o main main.c"
run_command = "./main"

[python]
source_file = "main.py"
run_command = "python3 main.py"
time_limit = ["3", "2"]
memory_limit = ["2", "32"]
aliases = ["py", "python3"]
"#;

    #[test]
    fn test_load_registry() {
        let registry = LanguageRegistry::from_toml(TEST_TOML).unwrap();
        assert!(registry.resolve("c").is_ok());
        assert!(registry.resolve("python").is_ok());
    }

    #[test]
    fn test_alias_resolution() {
        let registry = LanguageRegistry::from_toml(TEST_TOML).unwrap();
        let spec = registry.resolve("PY").unwrap();
        assert_eq!(spec.source_file, "main.py");
        assert!(spec.compile_command.is_none());
    }

    #[test]
    fn test_unsupported_language() {
        let registry = LanguageRegistry::from_toml(TEST_TOML).unwrap();
        let err = registry.resolve("brainfuck").unwrap_err();
        assert_eq!(err, UnsupportedLanguage("brainfuck".into()));
    }

    #[test]
    fn test_limit_adjustment() {
        let registry = LanguageRegistry::from_toml(TEST_TOML).unwrap();
        let python = registry.resolve("python").unwrap();
        // 1000ms * 3 + 2s
        assert_eq!(python.calculate_time_limit(1000), 5000);
        // 256MB * 2 + 32MB, in KB
        assert_eq!(
            python.calculate_memory_limit(256 * 1024),
            512 * 1024 + 32 * 1024
        );

        let c = registry.resolve("c").unwrap();
        assert_eq!(c.calculate_time_limit(1000), 1000);
    }

    #[test]
    fn test_builtin_registry_parses() {
        let registry = LanguageRegistry::builtin().unwrap();
        assert!(registry.resolve("cpp").is_ok());
        assert!(registry.resolve("c++").is_ok());
    }

    #[test]
    fn test_invalid_limit_arity() {
        let toml = r#"
[bad]
source_file = "main.bad"
run_command = "./bad"
time_limit = ["3"]
"#;
        assert!(LanguageRegistry::from_toml(toml).is_err());
    }
}
