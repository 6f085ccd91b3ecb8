//! Declarative template loading and the in-memory document model.
//!
//! Templates are TOML documents (comments come for free) with four sections:
//!
//! ```toml
//! [parameters.environment]
//! type = "string"
//! default = "dev"
//!
//! [resources.vnet]
//! type = "network/virtualNetwork"
//! api_version = "2024-01-01"
//! properties = { addressSpace = "10.0.0.0/16", tag = "${parameters.environment}" }
//!
//! [modules.storage]
//! path = "storage.toml"
//! parameters = { prefix = "${parameters.environment}" }
//!
//! [outputs.vnetId]
//! value = "${resources.vnet.id}"
//! ```
//!
//! Loading is recursive: module paths resolve relative to the including
//! template, nested templates load eagerly, and a template that includes
//! itself (directly or through other modules) is rejected with
//! [`StratusError::ModuleInclusionCycle`]. All structural validation happens
//! here, before any graph is built and long before any materialization.

pub mod value;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::core::{DeploymentEnvironment, StratusError, suggest_closest};
use crate::expr::{EmptyState, EvalContext};
use value::Value;

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("static name pattern is valid")
});

/// Declared type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// UTF-8 string.
    String,
    /// Integer number.
    Number,
    /// Boolean.
    Bool,
    /// Table of values.
    Object,
    /// List of values.
    Array,
}

impl ParamType {
    fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::String, Value::String(_))
                | (Self::Number, Value::Number(_))
                | (Self::Bool, Value::Bool(_))
                | (Self::Object, Value::Object(_))
                | (Self::Array, Value::Array(_))
        )
    }

    /// Name used in diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

/// A declared parameter: name, type, optional default.
///
/// The default may itself be an expression referencing earlier parameters;
/// it is evaluated during parameter resolution, in declaration order.
#[derive(Debug, Clone)]
pub struct ParameterDecl {
    /// Parameter name.
    pub name: String,
    /// Declared type; bindings and defaults must match it.
    pub ty: ParamType,
    /// Default value used when no binding is supplied.
    pub default: Option<Value>,
}

/// A declared resource.
#[derive(Debug, Clone)]
pub struct ResourceDecl {
    /// Symbolic name, unique within the template.
    pub name: String,
    /// Resource-type identifier, opaque to the engine.
    pub resource_type: String,
    /// API version passed through to the provisioner.
    pub api_version: String,
    /// Property bag; values may contain unresolved expressions.
    pub properties: BTreeMap<String, Value>,
    /// Explicit dependencies by symbolic name.
    pub depends_on: Vec<String>,
    /// Optional parent resource for nested child resources.
    pub parent: Option<String>,
    /// Optional scope override: another resource this one is created within.
    pub scope: Option<String>,
}

/// A module instantiation: a nested template plus a parameter binding map.
#[derive(Debug, Clone)]
pub struct ModuleDecl {
    /// Symbolic name, sharing a namespace with resources.
    pub name: String,
    /// Path of the nested template file.
    pub path: PathBuf,
    /// Outer-scope values bound to the module's parameters. Expressions here
    /// are evaluated in the *parent* scope before instantiation.
    pub bindings: BTreeMap<String, Value>,
    /// The loaded nested template.
    pub template: Template,
}

/// A named output expression, evaluated once the owning scope has fully
/// succeeded.
#[derive(Debug, Clone)]
pub struct OutputDecl {
    /// Output name.
    pub name: String,
    /// Expression (or plain value) to evaluate.
    pub value: Value,
}

/// A loaded template: the root of a (possibly nested) resource graph.
#[derive(Debug, Clone)]
pub struct Template {
    /// Template name, derived from the file stem.
    pub name: String,
    /// Path the template was loaded from.
    pub path: PathBuf,
    /// Parameters in declaration order.
    pub parameters: Vec<ParameterDecl>,
    /// Resources in declaration order.
    pub resources: Vec<ResourceDecl>,
    /// Modules in declaration order.
    pub modules: Vec<ModuleDecl>,
    /// Outputs in declaration order.
    pub outputs: Vec<OutputDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTemplate {
    #[serde(default)]
    parameters: toml::Table,
    #[serde(default)]
    resources: toml::Table,
    #[serde(default)]
    modules: toml::Table,
    #[serde(default)]
    outputs: toml::Table,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawParameter {
    #[serde(rename = "type")]
    ty: ParamType,
    default: Option<toml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawResource {
    #[serde(rename = "type")]
    resource_type: String,
    api_version: String,
    #[serde(default)]
    properties: toml::Table,
    #[serde(default)]
    depends_on: Vec<String>,
    parent: Option<String>,
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawModule {
    path: String,
    #[serde(default)]
    parameters: toml::Table,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOutput {
    value: toml::Value,
}

impl Template {
    /// Load a template and, recursively, every module it references.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StratusError> {
        let mut stack = Vec::new();
        Self::load_inner(path.as_ref(), &mut stack)
    }

    fn load_inner(path: &Path, stack: &mut Vec<PathBuf>) -> Result<Self, StratusError> {
        let canonical = path
            .canonicalize()
            .map_err(|_| StratusError::TemplateNotFound {
                path: path.display().to_string(),
            })?;
        if stack.contains(&canonical) {
            let mut chain: Vec<String> =
                stack.iter().map(|p| p.display().to_string()).collect();
            chain.push(canonical.display().to_string());
            return Err(StratusError::ModuleInclusionCycle { chain });
        }
        stack.push(canonical.clone());
        debug!(template = %canonical.display(), "loading template");

        let text = std::fs::read_to_string(&canonical)?;
        let raw: RawTemplate =
            toml::from_str(&text).map_err(|e| StratusError::TemplateParse {
                path: canonical.display().to_string(),
                reason: e.to_string(),
            })?;

        let name = canonical
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "template".to_string());
        let dir = canonical.parent().map(Path::to_path_buf).unwrap_or_default();

        let mut template = Self {
            name,
            path: canonical.clone(),
            parameters: Vec::new(),
            resources: Vec::new(),
            modules: Vec::new(),
            outputs: Vec::new(),
        };

        for (pname, entry) in raw.parameters {
            check_name(&pname, &template.name)?;
            let raw_param: RawParameter = decode_entry(&canonical, "parameters", &pname, entry)?;
            template.parameters.push(ParameterDecl {
                name: pname,
                ty: raw_param.ty,
                default: raw_param.default.map(Value::from_toml),
            });
        }

        for (rname, entry) in raw.resources {
            check_name(&rname, &template.name)?;
            let raw_res: RawResource = decode_entry(&canonical, "resources", &rname, entry)?;
            template.resources.push(ResourceDecl {
                name: rname,
                resource_type: raw_res.resource_type,
                api_version: raw_res.api_version,
                properties: raw_res
                    .properties
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_toml(v)))
                    .collect(),
                depends_on: raw_res.depends_on,
                parent: raw_res.parent,
                scope: raw_res.scope,
            });
        }

        for (mname, entry) in raw.modules {
            check_name(&mname, &template.name)?;
            let raw_mod: RawModule = decode_entry(&canonical, "modules", &mname, entry)?;
            let module_path = dir.join(&raw_mod.path);
            let nested = Self::load_inner(&module_path, stack)?;
            template.modules.push(ModuleDecl {
                name: mname,
                path: module_path,
                bindings: raw_mod
                    .parameters
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_toml(v)))
                    .collect(),
                template: nested,
            });
        }

        for (oname, entry) in raw.outputs {
            check_name(&oname, &template.name)?;
            let raw_out: RawOutput = decode_entry(&canonical, "outputs", &oname, entry)?;
            template.outputs.push(OutputDecl {
                name: oname,
                value: Value::from_toml(raw_out.value),
            });
        }

        template.check_structure()?;
        stack.pop();
        Ok(template)
    }

    /// Structural checks that do not require a graph: shared resource/module
    /// namespace, and `depends_on`/`parent`/`scope` targets that exist.
    fn check_structure(&self) -> Result<(), StratusError> {
        let mut names = BTreeSet::new();
        for name in self
            .resources
            .iter()
            .map(|r| &r.name)
            .chain(self.modules.iter().map(|m| &m.name))
        {
            if !names.insert(name.clone()) {
                return Err(StratusError::DuplicateName {
                    name: name.clone(),
                    scope: self.name.clone(),
                });
            }
        }

        for resource in &self.resources {
            for target in resource
                .depends_on
                .iter()
                .chain(&resource.parent)
                .chain(&resource.scope)
            {
                if !names.contains(target) {
                    return Err(StratusError::UnknownReference {
                        name: target.clone(),
                        closest: suggest_closest(target, names.iter().map(String::as_str)),
                    });
                }
            }
        }
        Ok(())
    }

    /// Resolve this scope's parameters from a binding map.
    ///
    /// Bindings win over defaults; defaults are evaluated in declaration
    /// order and may reference parameters declared before them. Parameters
    /// with neither a binding nor a default fail with
    /// [`StratusError::MissingParameter`]; bindings for undeclared parameters
    /// fail with a did-you-mean diagnostic. Values are immutable once
    /// resolved for the rest of the run.
    pub fn resolve_parameters(
        &self,
        bindings: &BTreeMap<String, Value>,
        env: &DeploymentEnvironment,
        scope: &str,
    ) -> Result<BTreeMap<String, Value>, StratusError> {
        let declared: BTreeSet<&str> = self.parameters.iter().map(|p| p.name.as_str()).collect();
        for bound in bindings.keys() {
            if !declared.contains(bound.as_str()) {
                return Err(StratusError::UnknownReference {
                    name: format!("parameters.{bound}"),
                    closest: suggest_closest(bound, declared.iter().copied())
                        .map(|c| format!("parameters.{c}")),
                });
            }
        }

        let mut resolved = BTreeMap::new();
        for decl in &self.parameters {
            let value = match bindings.get(&decl.name) {
                Some(bound) => bound.clone(),
                None => match &decl.default {
                    Some(default) => {
                        let ctx = EvalContext {
                            scope,
                            params: &resolved,
                            env,
                            state: &EmptyState,
                        };
                        ctx.evaluate_value(default)?
                    }
                    None => {
                        return Err(StratusError::MissingParameter {
                            name: decl.name.clone(),
                            scope: scope.to_string(),
                        });
                    }
                },
            };
            if !decl.ty.matches(&value) {
                return Err(StratusError::TypeMismatch {
                    expression: format!("parameters.{}", decl.name),
                    message: format!(
                        "declared as {} but got {}",
                        decl.ty.as_str(),
                        value.type_name()
                    ),
                });
            }
            resolved.insert(decl.name.clone(), value);
        }
        Ok(resolved)
    }
}

fn check_name(name: &str, scope: &str) -> Result<(), StratusError> {
    if NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(StratusError::TemplateParse {
            path: scope.to_string(),
            reason: format!(
                "invalid symbolic name '{name}': names match [A-Za-z_][A-Za-z0-9_-]*"
            ),
        })
    }
}

fn decode_entry<T: serde::de::DeserializeOwned>(
    path: &Path,
    section: &str,
    name: &str,
    entry: toml::Value,
) -> Result<T, StratusError> {
    entry.try_into().map_err(|e| StratusError::TemplateParse {
        path: path.display().to_string(),
        reason: format!("[{section}.{name}]: {e}"),
    })
}

#[cfg(test)]
mod tests;
