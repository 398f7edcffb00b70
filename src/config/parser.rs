//! Configuration parser for loading documents and flattening them into nodes.
//!
//! This module loads YAML documents and `.env` files, collects variable
//! values from the environment and the command line, and turns a document
//! tree (root plus module bodies) into the flat node set the graph is built
//! from.

use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, Result, TerragraphError};
use crate::graph::{ModulePath, Node};

use super::spec::{Document, ModuleConfig};

/// Prefix of environment variables that set root variables.
pub const VAR_ENV_PREFIX: &str = "TERRAGRAPH_VAR_";

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["terragraph.yaml", "terragraph.yml"];

/// Configuration parser for loading documents.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Directory that relative module sources and `.env` resolve against.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Returns the directory relative paths resolve against.
    #[must_use]
    pub fn base_dir(&self) -> PathBuf {
        self.base_path.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Loads a document from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Document> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a document from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Document> {
        debug!("Parsing YAML configuration");

        let document: Document = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
            message: format!("YAML parse error: {e}"),
            location: source.map(|p| p.display().to_string()),
        })?;

        debug!(
            "Parsed configuration with {} resources and {} modules",
            document.resources.len(),
            document.modules.len()
        );
        Ok(document)
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self.base_dir().join(".env");

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Collects root variable values from `TERRAGRAPH_VAR_<name>` variables.
    #[must_use]
    pub fn variables_from_env() -> HashMap<String, Value> {
        Self::variables_from(std::env::vars())
    }

    fn variables_from(vars: impl IntoIterator<Item = (String, String)>) -> HashMap<String, Value> {
        vars.into_iter()
            .filter_map(|(key, raw)| {
                let name = key.strip_prefix(VAR_ENV_PREFIX)?;
                (!name.is_empty()).then(|| (name.to_string(), parse_value(&raw)))
            })
            .collect()
    }

    /// Flattens a root document and its modules into graph nodes.
    ///
    /// Module sources are resolved against the parser's base path.
    ///
    /// # Errors
    ///
    /// Returns an error if a module is malformed, declared twice, or its
    /// source cannot be loaded or includes itself.
    pub fn to_nodes(&self, document: &Document) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        let mut chain = Vec::new();
        self.flatten(document, &ModulePath::root(), &self.base_dir(), &mut chain, &mut nodes)?;
        debug!("Flattened configuration into {} nodes", nodes.len());
        Ok(nodes)
    }

    fn flatten(
        &self,
        document: &Document,
        path: &ModulePath,
        base_dir: &Path,
        chain: &mut Vec<PathBuf>,
        out: &mut Vec<Node>,
    ) -> Result<()> {
        for (name, variable) in &document.variables {
            let raw = variable
                .default
                .as_ref()
                .map_or_else(|| json!({}), |default| json!({ "default": default }));
            out.push(Node::variable(name, path.clone(), raw));
        }

        for provider in &document.providers {
            out.push(Node::provider(
                &provider.provider_type,
                provider.alias.as_deref(),
                path.clone(),
                Value::Object(provider.config.clone()),
            ));
        }

        for resource in &document.resources {
            let mut node = Node::resource(
                &resource.resource_type,
                &resource.name,
                path.clone(),
                Value::Object(resource.config.clone()),
            )
            .with_depends_on(resource.depends_on.iter().map(|d| path.qualify(d)));
            if let Some(provider) = &resource.provider {
                node = node.with_provider(provider.as_str());
            }
            out.push(node);
        }

        for data in &document.data {
            let mut node = Node::data_source(
                &data.data_type,
                &data.name,
                path.clone(),
                Value::Object(data.config.clone()),
            )
            .with_depends_on(data.depends_on.iter().map(|d| path.qualify(d)));
            if let Some(provider) = &data.provider {
                node = node.with_provider(provider.as_str());
            }
            out.push(node);
        }

        for (name, output) in &document.outputs {
            out.push(Node::output(name, path.clone(), json!({ "value": output.value })));
        }

        let mut seen = HashSet::new();
        for module in &document.modules {
            if !seen.insert(module.name.as_str()) {
                return Err(ConfigError::DuplicateName {
                    kind: String::from("module"),
                    name: path.qualify(&format!("module.{}", module.name)),
                }
                .into());
            }
            out.push(Node::module_call(
                &module.name,
                path.clone(),
                Value::Object(module.inputs.clone()),
            ));
            self.flatten_module(module, path, base_dir, chain, out)?;
        }

        Ok(())
    }

    fn flatten_module(
        &self,
        module: &ModuleConfig,
        parent: &ModulePath,
        base_dir: &Path,
        chain: &mut Vec<PathBuf>,
        out: &mut Vec<Node>,
    ) -> Result<()> {
        let path = parent.child(&module.name);
        let field = format!("{}module.{}", parent.prefix(), module.name);

        match (&module.source, &module.body) {
            (None, Some(body)) => self.flatten(body, &path, base_dir, chain, out),
            (Some(source), None) => {
                let file = base_dir.join(source);
                let canonical = file.canonicalize().unwrap_or_else(|_| file.clone());
                if chain.contains(&canonical) {
                    return Err(ConfigError::validation(
                        format!("module source {} includes itself", file.display()),
                        field,
                    )
                    .into());
                }

                let body = self.load_file(&file)?;
                let dir = file.parent().map_or_else(|| base_dir.to_path_buf(), Path::to_path_buf);
                debug!("Loaded module {} from {}", path, file.display());

                chain.push(canonical);
                let result = self.flatten(&body, &path, &dir, chain, out);
                chain.pop();
                result
            }
            (Some(_), Some(_)) => {
                Err(ConfigError::validation("module sets both source and body", field).into())
            }
            (None, None) => {
                Err(ConfigError::validation("module needs a source or a body", field).into())
            }
        }
    }
}

/// Parses a `name=value` variable assignment.
///
/// # Errors
///
/// Returns an error if the assignment has no `=` or an empty name.
pub fn parse_var(assignment: &str) -> Result<(String, Value)> {
    match assignment.split_once('=') {
        Some((name, raw)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), parse_value(raw)))
        }
        _ => Err(TerragraphError::Config(ConfigError::validation_general(format!(
            "variable assignment '{assignment}' must have the form name=value"
        )))),
    }
}

/// Parses a scalar the way YAML would, falling back to a plain string.
fn parse_value(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::String(raw.to_string());
    }
    serde_yaml::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, NodeKind};
    use tempfile::TempDir;

    const ROOT: &str = r#"
variables:
  env:
    default: dev
  size: {}
providers:
  - type: "null"
resources:
  - type: null_resource
    name: web
    depends_on: [null_resource.db]
    config:
      triggers:
        env: "${var.env}"
  - type: null_resource
    name: db
outputs:
  web:
    value: "${null_resource.web.id}"
modules:
  - name: net
    inputs:
      cidr: "10.0.0.0/16"
    body:
      variables:
        cidr: {}
      resources:
        - type: null_resource
          name: vpc
          depends_on: [null_resource.subnet]
          config:
            cidr: "${var.cidr}"
        - type: null_resource
          name: subnet
      outputs:
        vpc:
          value: "${null_resource.vpc.id}"
"#;

    #[test]
    fn test_flatten_root_and_inline_module() {
        let parser = ConfigParser::new();
        let document = parser.parse_yaml(ROOT, None).unwrap();
        let nodes = parser.to_nodes(&document).unwrap();

        let names: HashSet<&str> = nodes.iter().map(Node::name).collect();
        for expected in [
            "var.env",
            "var.size",
            "provider.null",
            "null_resource.web",
            "output.web",
            "module.net",
            "module.net.var.cidr",
            "module.net.null_resource.vpc",
            "module.net.output.vpc",
        ] {
            assert!(names.contains(expected), "missing {expected}");
        }

        let vpc = nodes.iter().find(|n| n.name() == "module.net.null_resource.vpc").unwrap();
        assert!(vpc.explicit_depends_on().contains("module.net.null_resource.subnet"));

        let size = nodes.iter().find(|n| n.name() == "var.size").unwrap();
        assert_eq!(size.kind(), NodeKind::Variable);
        assert!(size.raw_config().get("default").is_none());

        let graph = Graph::build(nodes).unwrap();
        let deps: Vec<&str> = graph
            .dependencies("module.net.var.cidr")
            .into_iter()
            .map(Node::name)
            .collect();
        assert_eq!(deps, vec!["module.net"]);
    }

    #[test]
    fn test_module_from_source_file() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("modules")).unwrap();
        std::fs::write(
            dir.path().join("modules/app.yaml"),
            "resources:\n  - type: null_resource\n    name: server\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("terragraph.yaml"),
            "modules:\n  - name: app\n    source: modules/app.yaml\n",
        )
        .unwrap();

        let parser = ConfigParser::new().with_base_path(dir.path());
        let document = parser.load_file(dir.path().join("terragraph.yaml")).unwrap();
        let nodes = parser.to_nodes(&document).unwrap();
        assert!(nodes.iter().any(|n| n.name() == "module.app.null_resource.server"));
    }

    #[test]
    fn test_self_including_module_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("loop.yaml"),
            "modules:\n  - name: again\n    source: loop.yaml\n",
        )
        .unwrap();

        let parser = ConfigParser::new().with_base_path(dir.path());
        let document = parser
            .parse_yaml("modules:\n  - name: first\n    source: loop.yaml\n", None)
            .unwrap();
        let err = parser.to_nodes(&document).unwrap_err();
        assert!(err.to_string().contains("includes itself"));
    }

    #[test]
    fn test_module_shape_errors() {
        let parser = ConfigParser::new();
        let both = parser
            .parse_yaml("modules:\n  - name: m\n    source: x.yaml\n    body: {}\n", None)
            .unwrap();
        assert!(parser.to_nodes(&both).is_err());

        let duplicate = parser
            .parse_yaml("modules:\n  - name: m\n    body: {}\n  - name: m\n    body: {}\n", None)
            .unwrap();
        let err = parser.to_nodes(&duplicate).unwrap_err();
        assert!(matches!(
            err,
            TerragraphError::Config(ConfigError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigParser::new().load_file("/nonexistent/terragraph.yaml").unwrap_err();
        assert!(matches!(err, TerragraphError::Config(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_parse_var_assignments() {
        assert_eq!(parse_var("size=3").unwrap(), (String::from("size"), json!(3)));
        assert_eq!(parse_var("name=web-1").unwrap(), (String::from("name"), json!("web-1")));
        assert_eq!(parse_var("tags=[a, b]").unwrap().1, json!(["a", "b"]));
        assert_eq!(parse_var("url=http://x?a=b").unwrap().1, json!("http://x?a=b"));
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=3").is_err());
    }

    #[test]
    fn test_variables_from_env_prefix() {
        let vars = ConfigParser::variables_from([
            (String::from("TERRAGRAPH_VAR_region"), String::from("eu")),
            (String::from("TERRAGRAPH_VAR_"), String::from("ignored")),
            (String::from("HOME"), String::from("/root")),
        ]);
        assert_eq!(vars.len(), 1);
        assert_eq!(vars["region"], json!("eu"));
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("terragraph.yaml"), "{}").unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("terragraph.yaml"));
    }
}
