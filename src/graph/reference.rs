//! Dependency extraction from interpolation references.
//!
//! A node depends on every name in its explicit `depends_on` list plus every
//! node referenced from a `${...}` interpolation inside its raw configuration.
//! References are resolved lexically: the node's own module first, then each
//! ancestor module, never a child module.

use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::LazyLock;

use crate::error::{ConfigError, Result, StructuralError};

use super::node::{ModulePath, Node, NodeKind};

#[allow(clippy::expect_used)]
static INTERPOLATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)\}").expect("interpolation pattern is valid"));

#[allow(clippy::expect_used)]
static STRING_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(?:[^"\\]|\\.)*""#).expect("string literal pattern is valid"));

#[allow(clippy::expect_used)]
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^A-Za-z0-9_.\-])([A-Za-z_][A-Za-z0-9_\-]*(?:\.(?:[A-Za-z0-9_\-]+|\*))+)")
        .expect("reference pattern is valid")
});

/// Prefixes that never name a graph node.
const PSEUDO_ROOTS: &[&str] = &["self", "count", "path", "terraform"];

/// A parsed interpolation reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// The reference as written, e.g. `aws_instance.web.public_ip`.
    pub expression: String,
    /// Module-relative stable name of the referenced node.
    pub target: String,
    /// Attribute path following the node name.
    pub attribute: Vec<String>,
}

impl Reference {
    /// Parses one dotted reference.
    ///
    /// Returns `Ok(None)` for pseudo-references that are not dependencies.
    ///
    /// # Errors
    ///
    /// Returns the reason when the reference has too few segments.
    pub fn parse(expression: &str) -> std::result::Result<Option<Self>, String> {
        let segments: Vec<&str> = expression.split('.').collect();
        if segments.len() < 2 {
            return Err(String::from("references need at least two segments"));
        }
        let root = segments[0];

        if PSEUDO_ROOTS.contains(&root) {
            return Ok(None);
        }

        let (target, rest) = match root {
            "var" => (format!("var.{}", segments[1]), &segments[2..]),
            "module" => {
                if segments.len() < 3 {
                    return Err(String::from("module references need the form module.NAME.OUTPUT"));
                }
                (format!("module.{}.output.{}", segments[1], segments[2]), &segments[3..])
            }
            "data" => {
                if segments.len() < 3 {
                    return Err(String::from("data references need the form data.TYPE.NAME.ATTR"));
                }
                (format!("data.{}.{}", segments[1], segments[2]), &segments[3..])
            }
            _ => (format!("{root}.{}", segments[1]), &segments[2..]),
        };

        if target.contains('*') {
            return Err(String::from("splat is only allowed after the resource name"));
        }

        Ok(Some(Self {
            expression: expression.to_string(),
            target,
            attribute: rest.iter().map(|s| (*s).to_string()).collect(),
        }))
    }

    /// Resolves the target against `from` and its ancestors.
    pub fn resolve(&self, from: &ModulePath, exists: impl Fn(&str) -> bool) -> Option<String> {
        from.scopes()
            .into_iter()
            .map(|scope| scope.qualify(&self.target))
            .find(|candidate| exists(candidate.as_str()))
    }
}

/// Returns the byte ranges and inner text of every `${...}` in `text`.
pub fn interpolations(text: &str) -> Vec<(Range<usize>, &str)> {
    INTERPOLATION
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let inner = caps.get(1)?;
            Some((whole.range(), inner.as_str()))
        })
        .collect()
}

/// Returns the dotted reference tokens inside one interpolation body.
pub fn reference_tokens(body: &str) -> Vec<String> {
    let stripped = STRING_LITERAL.replace_all(body, "\"\"");
    REFERENCE
        .captures_iter(&stripped)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Collects every reference in a node's raw configuration.
///
/// # Errors
///
/// Returns a configuration error for malformed references.
pub fn references(node: &Node) -> Result<Vec<Reference>> {
    let mut texts = Vec::new();
    collect_strings(node.raw_config(), &mut texts);

    let mut refs = Vec::new();
    for text in texts {
        for (_, body) in interpolations(text) {
            for token in reference_tokens(body) {
                match Reference::parse(&token) {
                    Ok(Some(reference)) => refs.push(reference),
                    Ok(None) => {}
                    Err(reason) => {
                        return Err(ConfigError::InvalidReference {
                            node: node.name().to_string(),
                            expression: token,
                            reason,
                        }
                        .into());
                    }
                }
            }
        }
    }
    Ok(refs)
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => {
            for (key, v) in map {
                out.push(key);
                collect_strings(v, out);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Computes the full set of node names `node` must wait for.
///
/// `exists` reports whether a stable name is present in the node set. The
/// provider edge is not included here; the graph builder adds it once the
/// provider reference has been resolved.
///
/// # Errors
///
/// Returns a configuration error for malformed references and a structural
/// error for references or `depends_on` names that do not resolve.
pub fn dependencies(node: &Node, exists: impl Fn(&str) -> bool) -> Result<HashSet<String>> {
    let mut deps: HashSet<String> = HashSet::new();

    for name in node.explicit_depends_on() {
        if !exists(name.as_str()) {
            return Err(StructuralError::UnresolvedReference {
                node: node.name().to_string(),
                expression: format!("depends_on {name}"),
            }
            .into());
        }
        deps.insert(name.clone());
    }

    for reference in references(node)? {
        let Some(resolved) = reference.resolve(node.module_path(), &exists) else {
            return Err(StructuralError::UnresolvedReference {
                node: node.name().to_string(),
                expression: reference.expression,
            }
            .into());
        };
        deps.insert(resolved);
    }

    // Variables inside a module get their value from the call site.
    if node.kind() == NodeKind::Variable {
        if let Some(parent) = node.module_path().parent() {
            let call = node
                .module_path()
                .segments()
                .last()
                .map(|name| parent.qualify(&format!("module.{name}")));
            if let Some(call) = call.filter(|c| exists(c.as_str())) {
                deps.insert(call);
            }
        }
    }

    Ok(deps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(list: &[&str]) -> impl Fn(&str) -> bool {
        let set: HashSet<String> = list.iter().map(|s| (*s).to_string()).collect();
        move |name: &str| set.contains(name)
    }

    #[test]
    fn test_parse_reference_forms() {
        let r = Reference::parse("aws_instance.web.public_ip").unwrap().unwrap();
        assert_eq!(r.target, "aws_instance.web");
        assert_eq!(r.attribute, vec!["public_ip"]);

        let r = Reference::parse("var.region").unwrap().unwrap();
        assert_eq!(r.target, "var.region");
        assert!(r.attribute.is_empty());

        let r = Reference::parse("data.aws_ami.ubuntu.id").unwrap().unwrap();
        assert_eq!(r.target, "data.aws_ami.ubuntu");

        let r = Reference::parse("module.network.vpc_id").unwrap().unwrap();
        assert_eq!(r.target, "module.network.output.vpc_id");

        let r = Reference::parse("aws_instance.web.*.id").unwrap().unwrap();
        assert_eq!(r.target, "aws_instance.web");
        assert_eq!(r.attribute, vec!["*", "id"]);

        assert_eq!(Reference::parse("count.index").unwrap(), None);
        assert_eq!(Reference::parse("self.private_ip").unwrap(), None);
        assert!(Reference::parse("module.network").is_err());
        assert!(Reference::parse("data.aws_ami").is_err());
    }

    #[test]
    fn test_tokens_skip_functions_and_literals() {
        let tokens = reference_tokens(r#"join(",", aws_instance.web.*.id, "var.not_a_ref")"#);
        assert_eq!(tokens, vec!["aws_instance.web.*.id"]);

        let tokens = reference_tokens("lookup(var.amis, var.region)");
        assert_eq!(tokens, vec!["var.amis", "var.region"]);

        assert!(reference_tokens("1.5").is_empty());
    }

    #[test]
    fn test_interpolations_in_text() {
        let found = interpolations("http://${aws_instance.web.ip}:${var.port}/");
        let bodies: Vec<&str> = found.iter().map(|(_, b)| *b).collect();
        assert_eq!(bodies, vec!["aws_instance.web.ip", "var.port"]);
        assert!(interpolations("plain").is_empty());
    }

    #[test]
    fn test_dependencies_from_config_and_depends_on() {
        let node = Node::resource(
            "aws_instance",
            "web",
            ModulePath::root(),
            json!({
                "ami": "${data.aws_ami.ubuntu.id}",
                "subnet": "${aws_subnet.main.id}",
                "tags": { "Name": "${var.name}-${var.name}" }
            }),
        )
        .with_depends_on(["aws_security_group.sg"]);

        let exists = names(&[
            "data.aws_ami.ubuntu",
            "aws_subnet.main",
            "var.name",
            "aws_security_group.sg",
        ]);
        let deps = dependencies(&node, exists).unwrap();

        let mut deps: Vec<_> = deps.into_iter().collect();
        deps.sort();
        assert_eq!(
            deps,
            vec![
                "aws_security_group.sg",
                "aws_subnet.main",
                "data.aws_ami.ubuntu",
                "var.name"
            ]
        );
    }

    #[test]
    fn test_unresolved_reference_names_node_and_expression() {
        let config = json!({"value": "${aws_instance.missing.ip}"});
        let node = Node::output("ip", ModulePath::root(), config);
        let err = dependencies(&node, names(&[])).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("output.ip"));
        assert!(text.contains("aws_instance.missing.ip"));
    }

    #[test]
    fn test_unresolved_depends_on() {
        let node = Node::variable("x", ModulePath::root(), json!({})).with_depends_on(["var.y"]);
        assert!(dependencies(&node, names(&[])).is_err());
    }

    #[test]
    fn test_resolution_prefers_own_module_then_ancestors() {
        let path = ModulePath::new(["child"]);
        let config = json!({"x": "${var.region}", "y": "${var.shared}"});
        let node = Node::resource("null_resource", "a", path, config);
        let exists = names(&[
            "module.child.var.region",
            "var.region",
            "var.shared",
            "module.child",
        ]);
        let deps = dependencies(&node, exists).unwrap();

        assert!(deps.contains("module.child.var.region"));
        assert!(!deps.contains("var.region"));
        assert!(deps.contains("var.shared"));
    }

    #[test]
    fn test_never_resolves_into_child_module() {
        let config = json!({"value": "${aws_instance.web.id}"});
        let node = Node::output("o", ModulePath::root(), config);
        let exists = names(&["module.child.aws_instance.web"]);
        assert!(dependencies(&node, exists).is_err());
    }

    #[test]
    fn test_module_variable_depends_on_call() {
        let node = Node::variable("cidr", ModulePath::new(["net"]), json!({}));
        let deps = dependencies(&node, names(&["module.net"])).unwrap();
        assert!(deps.contains("module.net"));
    }

    #[test]
    fn test_self_reference_is_kept() {
        let config = json!({"x": "${null_resource.a.id}"});
        let node = Node::resource("null_resource", "a", ModulePath::root(), config);
        let deps = dependencies(&node, names(&["null_resource.a"])).unwrap();
        assert!(deps.contains("null_resource.a"));
    }

    #[test]
    fn test_malformed_reference_is_an_error() {
        let node = Node::output("o", ModulePath::root(), json!({"value": "${module.net}"}));
        let err = dependencies(&node, names(&["module.net"])).unwrap_err();
        assert!(err.to_string().contains("module.net"));
    }
}
