//! evaluation of meta-programming sources against one module
//!
//! A [Config] binds a [Module] to a set of [MptfDocuments]. Creating it evaluates
//! - `variable` blocks (`default`, overridden by [VarBindings])
//! - `locals` blocks
//! - `data` blocks
//!
//! and makes the results available to expressions as `var.*`, `local.*` and `data.*`. Every root block of the
//! module is available as `tf["<address>"]`.
//!
//! Locals and data sources may reference each other in any order. They are evaluated in passes until everything
//! resolves. A pass without progress ends evaluation with the first error of the last pass.
use crate::block::address;
use crate::fs::FileSystem;
use crate::module::Module;
use crate::mptf_documents::MptfDocuments;
use hcl::eval::{Context, Evaluate};
use hcl::value::Map;
use hcl::Value;
use hcl_edit::structure::Block;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Data source that lists the module's resource blocks
pub const RESOURCE_DATA_SOURCE: &str = "resource";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("no value for variable {0}")]
    MissingVariable(String),
    #[error("variable {0} is declared more than once")]
    DuplicateVariable(String),
    #[error("local.{0} is declared more than once")]
    DuplicateLocal(String),
    #[error("{0} is declared more than once")]
    DuplicateDataSource(String),
    #[error("unknown data source {0}")]
    UnknownDataSource(String),
    #[error("{address}: {message}")]
    Invalid { address: String, message: String },
    #[error("unable to evaluate {address}")]
    Evaluate {
        address: String,
        #[source]
        source: hcl::eval::Error,
    },
    #[error("unable to read {}", path.display())]
    VarFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse {}", path.display())]
    VarFileParse {
        path: PathBuf,
        #[source]
        source: hcl_edit::parser::Error,
    },
}

/// `name=value` from the command line
///
/// The value is parsed as an expression without context, anything that does not evaluate is taken as a plain
/// string (`--var name=abc` is the string `"abc"`).
#[derive(Debug, Clone, PartialEq)]
pub struct VarBinding {
    pub name: String,
    pub value: Value,
}

impl FromStr for VarBinding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((name, raw)) = s.split_once('=') else {
            return Err(format!("expected name=value, got {s:?}"));
        };

        let name = name.trim();
        if name.is_empty() {
            return Err(format!("variable name missing in {s:?}"));
        }

        Ok(Self {
            name: name.to_owned(),
            value: parse_value(raw).unwrap_or_else(|| Value::String(raw.to_owned())),
        })
    }
}

fn parse_value(raw: &str) -> Option<Value> {
    let expr: hcl_edit::expr::Expression = raw.parse().ok()?;
    let expr: hcl::Expression = expr.into();
    expr.evaluate(&Context::new()).ok()
}

/// Variable values by name, later bindings win
#[derive(Debug, Clone, Default)]
pub struct VarBindings(Map<String, Value>);

impl VarBindings {
    pub fn insert(&mut self, binding: VarBinding) {
        self.0.insert(binding.name, binding.value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Reads `name = expression` attributes from a file
    pub fn load_file(&mut self, fs: &dyn FileSystem, path: &Path) -> Result<(), ConfigError> {
        tracing::info!(path=%path.display(), "loading variable file");
        let text = fs
            .read_to_string(path)
            .map_err(|source| ConfigError::VarFile {
                path: path.to_owned(),
                source,
            })?;
        let body =
            hcl_edit::parser::parse_body(&text).map_err(|source| ConfigError::VarFileParse {
                path: path.to_owned(),
                source,
            })?;

        for attribute in body.attributes() {
            let name = attribute.key.value().as_str();
            let expr: hcl::Expression = attribute.value.clone().into();
            let value = expr
                .evaluate(&Context::new())
                .map_err(|source| ConfigError::Evaluate {
                    address: format!("var.{name}"),
                    source,
                })?;
            self.0.insert(name.to_owned(), value);
        }

        Ok(())
    }
}

impl FromIterator<VarBinding> for VarBindings {
    fn from_iter<T: IntoIterator<Item = VarBinding>>(iter: T) -> Self {
        let mut bindings = Self::default();
        for binding in iter {
            bindings.insert(binding);
        }
        bindings
    }
}

#[derive(Debug)]
pub struct Config {
    module: Module,
    documents: Arc<MptfDocuments>,
    variables: Map<String, Value>,
    locals: Map<String, Value>,
    /// data source kind -> name -> result
    data: Map<String, Value>,
    /// root block address -> block value
    blocks: Map<String, Value>,
}

enum Pending<'d> {
    Local { name: String, expr: hcl::Expression },
    Data { kind: String, name: String, block: &'d Block },
}

impl Pending<'_> {
    fn address(&self) -> String {
        match self {
            Pending::Local { name, .. } => format!("local.{name}"),
            Pending::Data { kind, name, .. } => format!("data.{kind}.{name}"),
        }
    }
}

impl Config {
    pub fn new(
        module: Module,
        documents: Arc<MptfDocuments>,
        bindings: &VarBindings,
    ) -> Result<Self, ConfigError> {
        let blocks = module
            .root_blocks()
            .map(|block| (block.address.clone(), block.eval_context()))
            .collect();

        let mut config = Self {
            module,
            documents,
            variables: Default::default(),
            locals: Default::default(),
            data: Default::default(),
            blocks,
        };

        config.variables = config.evaluate_variables(bindings)?;
        config.evaluate_locals_and_data()?;

        Ok(config)
    }

    fn evaluate_variables(&self, bindings: &VarBindings) -> Result<Map<String, Value>, ConfigError> {
        let mut variables = Map::new();

        for (_, _, block) in self.documents.blocks_of_type("variable") {
            let [name] = block.labels.as_slice() else {
                return Err(ConfigError::Invalid {
                    address: "variable".to_owned(),
                    message: "variable blocks require exactly one label".to_owned(),
                });
            };
            let name = AsRef::<str>::as_ref(name).to_owned();
            if variables.contains_key(&name) {
                return Err(ConfigError::DuplicateVariable(name));
            }

            let value = match bindings.get(&name) {
                Some(value) => value.clone(),
                None => {
                    let default = block
                        .body
                        .attributes()
                        .find(|attribute| attribute.key.value().as_str() == "default")
                        .ok_or_else(|| ConfigError::MissingVariable(name.clone()))?;
                    let expr: hcl::Expression = default.value.clone().into();
                    expr.evaluate(&Context::new())
                        .map_err(|source| ConfigError::Evaluate {
                            address: format!("var.{name}"),
                            source,
                        })?
                }
            };

            tracing::trace!(%name, ?value, "variable");
            variables.insert(name, value);
        }

        for name in bindings.0.keys() {
            if !variables.contains_key(name) {
                tracing::warn!(%name, "value given for undeclared variable");
            }
        }

        Ok(variables)
    }

    fn evaluate_locals_and_data(&mut self) -> Result<(), ConfigError> {
        let documents = self.documents.clone();
        let mut pending = vec![];
        let mut seen_data = std::collections::HashSet::new();

        for (_, _, block) in documents.blocks_of_type("locals") {
            for attribute in block.body.attributes() {
                let name = attribute.key.value().as_str().to_owned();
                if pending
                    .iter()
                    .any(|p| matches!(p, Pending::Local { name: n, .. } if *n == name))
                {
                    return Err(ConfigError::DuplicateLocal(name));
                }
                pending.push(Pending::Local {
                    name,
                    expr: attribute.value.clone().into(),
                });
            }
        }

        for (_, _, block) in documents.blocks_of_type("data") {
            let labels: Vec<String> = block
                .labels
                .iter()
                .map(|label| AsRef::<str>::as_ref(label).to_owned())
                .collect();
            let [kind, name] = labels.as_slice() else {
                return Err(ConfigError::Invalid {
                    address: address("data", &labels),
                    message: "data blocks require a kind and a name".to_owned(),
                });
            };
            if kind != RESOURCE_DATA_SOURCE {
                return Err(ConfigError::UnknownDataSource(kind.clone()));
            }
            if !seen_data.insert(labels.clone()) {
                return Err(ConfigError::DuplicateDataSource(address("data", &labels)));
            }

            pending.push(Pending::Data {
                kind: kind.clone(),
                name: name.clone(),
                block,
            });
        }

        while !pending.is_empty() {
            let context = self.eval_context();
            let before = pending.len();
            let mut remaining = vec![];
            let mut first_error = None;

            for entry in pending.drain(..) {
                match self.evaluate_pending(&entry, &context) {
                    Ok(value) => {
                        tracing::trace!(address=%entry.address(), "resolved");
                        self.store(&entry, value);
                    }
                    Err(err) => {
                        tracing::trace!(address=%entry.address(), error=%err, "unresolved");
                        first_error.get_or_insert(err);
                        remaining.push(entry);
                    }
                }
            }

            if remaining.len() == before {
                if let Some(err) = first_error {
                    return Err(err);
                }
            }

            pending = remaining;
        }

        Ok(())
    }

    fn evaluate_pending(&self, entry: &Pending, context: &Context) -> Result<Value, ConfigError> {
        match entry {
            Pending::Local { expr, .. } => {
                expr.evaluate(context)
                    .map_err(|source| ConfigError::Evaluate {
                        address: entry.address(),
                        source,
                    })
            }
            Pending::Data { block, .. } => self.resource_data(&entry.address(), block, context),
        }
    }

    /// `data "resource" "<name>" { resource_type = "<type>" }`
    fn resource_data(
        &self,
        data_address: &str,
        block: &Block,
        context: &Context,
    ) -> Result<Value, ConfigError> {
        let resource_type = match block
            .body
            .attributes()
            .find(|attribute| attribute.key.value().as_str() == "resource_type")
        {
            None => None,
            Some(attribute) => {
                let expr: hcl::Expression = attribute.value.clone().into();
                match expr
                    .evaluate(context)
                    .map_err(|source| ConfigError::Evaluate {
                        address: data_address.to_owned(),
                        source,
                    })? {
                    Value::String(resource_type) => Some(resource_type),
                    Value::Null => None,
                    _ => {
                        return Err(ConfigError::Invalid {
                            address: data_address.to_owned(),
                            message: "resource_type must be a string".to_owned(),
                        })
                    }
                }
            }
        };

        let mut result: Map<String, Value> = Map::new();
        for resource in &self.module.resource_blocks {
            let [block_type, name] = resource.labels.as_slice() else {
                continue;
            };
            if resource_type.as_ref().is_some_and(|t| t != block_type) {
                continue;
            }

            let entry = result
                .entry(block_type.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(by_name) = entry {
                by_name.insert(name.clone(), resource.eval_context());
            }
        }

        let mut value = Map::new();
        value.insert(
            "resource_type".to_owned(),
            resource_type.map(Value::String).unwrap_or(Value::Null),
        );
        value.insert("result".to_owned(), Value::Object(result));
        Ok(Value::Object(value))
    }

    fn store(&mut self, entry: &Pending, value: Value) {
        match entry {
            Pending::Local { name, .. } => {
                self.locals.insert(name.clone(), value);
            }
            Pending::Data { kind, name, .. } => {
                let by_kind = self
                    .data
                    .entry(kind.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(by_name) = by_kind {
                    by_name.insert(name.clone(), value);
                }
            }
        }
    }

    /// Context with `var`, `local`, `data` and `tf`
    pub fn eval_context(&self) -> Context<'static> {
        let mut context = Context::new();
        context.declare_var(
            hcl::Identifier::unchecked("var"),
            Value::Object(self.variables.clone()),
        );
        context.declare_var(
            hcl::Identifier::unchecked("local"),
            Value::Object(self.locals.clone()),
        );
        context.declare_var(
            hcl::Identifier::unchecked("data"),
            Value::Object(self.data.clone()),
        );
        context.declare_var(
            hcl::Identifier::unchecked("tf"),
            Value::Object(self.blocks.clone()),
        );
        context
    }

    pub fn evaluate(&self, expr: &hcl::Expression) -> Result<Value, hcl::eval::Error> {
        expr.evaluate(&self.eval_context())
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn documents(&self) -> &MptfDocuments {
        &self.documents
    }
}
