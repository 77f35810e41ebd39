//! transform declarations
//!
//! A transform is declared as `transform "<kind>" "<name>" { ... }` in a meta-programming source. The
//! [Registry] maps each kind to a decode function which turns the declaration into a [Transform]. Decoding
//! happens once per declaration (or once per element when the declaration has a `for_each`), with the
//! [Config]'s evaluation context plus `each`.
use crate::config::Config;
use crate::module::Module;
use crate::syntax::{self, SnippetError};
use hcl::eval::{Context, Evaluate};
use hcl::Value;
use hcl_edit::structure::{Attribute, Block, Body};
use indexmap::IndexMap;

pub mod new_block;
pub mod update_in_place;

/// Block type of transform declarations
pub const TRANSFORM_BLOCK: &str = "transform";

/// Top-level block types of meta-programming sources that are not transforms
const NON_TRANSFORM_BLOCKS: [&str; 3] = ["variable", "locals", "data"];

/// Pending edit of a module
pub trait Transform: std::fmt::Debug + Send + Sync {
    /// `new_block`, `update_in_place`, ...
    fn kind(&self) -> &'static str;

    /// Declaration name, `name[key]` for `for_each` elements
    fn name(&self) -> &str;

    /// What the transform edits, for display
    fn target(&self) -> String;

    /// Whether the transform has something to edit in `module`
    fn resolve(&self, module: &Module) -> bool;

    /// Edits the write trees of `module`
    ///
    /// Must be called at most once per transform.
    fn apply(&self, module: &Module) -> Result<(), ApplyError>;

    /// `<kind>.<name>`
    fn id(&self) -> String {
        format!("{}.{}", self.kind(), self.name())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("{address}: {field} is required")]
    Required {
        address: String,
        field: &'static str,
    },
    #[error("{address}: {field} must be a string")]
    NotAString { address: String, field: String },
    #[error("{address}: {field} must be a list of strings")]
    NotAStringList {
        address: String,
        field: &'static str,
    },
    #[error("{address}: {message}")]
    Invalid { address: String, message: String },
    #[error("{address}: unable to evaluate {field}")]
    Evaluate {
        address: String,
        field: String,
        #[source]
        source: hcl::eval::Error,
    },
    #[error("{address}: unable to generate configuration")]
    Generate {
        address: String,
        #[source]
        source: SnippetError,
    },
    #[error("{address}: unknown transform type {kind}")]
    UnknownKind { address: String, kind: String },
    #[error("transform blocks require a type and a name")]
    Labels,
    #[error("unknown block type {0}")]
    UnknownBlockType(String),
    #[error("top-level attribute {0} is not allowed")]
    RootAttribute(String),
}

/// Every issue found while decoding a set of declarations
#[derive(derive_new::new, Debug)]
pub struct DecodeErrors {
    #[new(default)]
    issues: Vec<DecodeError>,
}

impl DecodeErrors {
    pub fn log(&mut self, issue: DecodeError) {
        tracing::trace!(?issue, "issue found");
        self.issues.push(issue);
    }

    pub fn issues(&self) -> &[DecodeError] {
        &self.issues
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

impl std::error::Error for DecodeErrors {}

impl std::fmt::Display for DecodeErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} invalid transform declaration(s)", self.issues.len())?;
        for issue in &self.issues {
            write!(f, "\n  {issue}")?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ApplyError {
    #[error("block {0} is no longer part of the write tree")]
    MissingBlock(String),
    #[error("unable to generate configuration")]
    Generate(#[from] SnippetError),
}

/// Everything a decode function gets to see
pub struct DecodeInput<'a> {
    pub kind: &'a str,
    pub name: String,
    pub block: &'a Block,
    pub context: &'a Context<'a>,
}

impl DecodeInput<'_> {
    /// `transform.<kind>.<name>`
    pub fn address(&self) -> String {
        format!("{TRANSFORM_BLOCK}.{}.{}", self.kind, self.name)
    }

    pub fn attribute(&self, field: &str) -> Option<&Attribute> {
        find_attribute(&self.block.body, field)
    }

    pub fn evaluate(&self, field: &str, expr: &hcl_edit::expr::Expression) -> Result<Value, DecodeError> {
        let expr: hcl::Expression = expr.clone().into();
        expr.evaluate(self.context)
            .map_err(|source| DecodeError::Evaluate {
                address: self.address(),
                field: field.to_owned(),
                source,
            })
    }

    /// Fails with `<field> is required` / `<field> must be a string`
    pub fn required_string(&self, field: &'static str) -> Result<String, DecodeError> {
        let attribute = self.attribute(field).ok_or_else(|| DecodeError::Required {
            address: self.address(),
            field,
        })?;

        match self.evaluate(field, &attribute.value)? {
            Value::String(value) => Ok(value),
            _ => Err(DecodeError::NotAString {
                address: self.address(),
                field: field.to_owned(),
            }),
        }
    }

    /// A missing or `null` attribute is an empty list
    pub fn optional_string_list(&self, field: &'static str) -> Result<Vec<String>, DecodeError> {
        let Some(attribute) = self.attribute(field) else {
            return Ok(vec![]);
        };

        let not_a_list = || DecodeError::NotAStringList {
            address: self.address(),
            field,
        };
        match self.evaluate(field, &attribute.value)? {
            Value::Null => Ok(vec![]),
            Value::Array(values) => values
                .into_iter()
                .map(|value| match value {
                    Value::String(value) => Ok(value),
                    _ => Err(not_a_list()),
                })
                .collect(),
            _ => Err(not_a_list()),
        }
    }

    /// Text of the block content described by the declaration body, in declaration order
    ///
    /// - `asraw { ... }`: copied as written
    /// - `asstring { ... }`: every attribute evaluates to the source text of its expression
    /// - anything not in `reserved`: attributes are evaluated and written as literals, blocks recurse
    ///
    /// The result is not indented and ends with a newline unless empty.
    pub fn render_content(&self, reserved: &[&str]) -> Result<String, DecodeError> {
        let mut content = String::new();

        for structure in self.block.body.iter() {
            match structure {
                hcl_edit::structure::Structure::Attribute(attribute) => {
                    let key = attribute.key.value().as_str();
                    if reserved.contains(&key) {
                        continue;
                    }
                    let value = self.evaluate(key, &attribute.value)?;
                    let literal = hcl::Body::builder()
                        .add_attribute(hcl::Attribute::new(
                            hcl::Identifier::unchecked(key),
                            hcl::Expression::from(value),
                        ))
                        .build();
                    content.push_str(&self.format_literal(&literal)?);
                }
                hcl_edit::structure::Structure::Block(block) => {
                    match block.ident.value().as_str() {
                        "asraw" => content.push_str(&raw_content(block)),
                        "asstring" => content.push_str(&self.string_content(&block.body, "asstring")?),
                        ident if reserved.contains(&ident) => continue,
                        _ => {
                            let literal = hcl::Body::builder()
                                .add_block(self.literal_block(block)?)
                                .build();
                            content.push_str(&self.format_literal(&literal)?);
                        }
                    }
                }
            }
        }

        Ok(content)
    }

    fn format_literal(&self, literal: &hcl::Body) -> Result<String, DecodeError> {
        hcl::format::to_string(literal).map_err(|err| DecodeError::Invalid {
            address: self.address(),
            message: err.to_string(),
        })
    }

    fn literal_block(&self, block: &Block) -> Result<hcl::Block, DecodeError> {
        let mut builder = hcl::Block::builder(hcl::Identifier::unchecked(block.ident.value().as_str()))
            .add_labels(block.labels.iter().map(|label| AsRef::<str>::as_ref(label).to_owned()));

        for structure in block.body.iter() {
            match structure {
                hcl_edit::structure::Structure::Attribute(attribute) => {
                    let key = attribute.key.value().as_str();
                    let value = self.evaluate(key, &attribute.value)?;
                    builder = builder.add_attribute(hcl::Attribute::new(
                        hcl::Identifier::unchecked(key),
                        hcl::Expression::from(value),
                    ));
                }
                hcl_edit::structure::Structure::Block(nested) => {
                    builder = builder.add_block(self.literal_block(nested)?);
                }
            }
        }

        Ok(builder.build())
    }

    fn string_content(&self, body: &Body, path: &str) -> Result<String, DecodeError> {
        let mut content = String::new();

        for structure in body.iter() {
            match structure {
                hcl_edit::structure::Structure::Attribute(attribute) => {
                    let key = attribute.key.value().as_str();
                    let field = format!("{path}.{key}");
                    match self.evaluate(&field, &attribute.value)? {
                        Value::String(source) => {
                            content.push_str(&format!("{key} = {}\n", source.trim()));
                        }
                        _ => {
                            return Err(DecodeError::NotAString {
                                address: self.address(),
                                field,
                            })
                        }
                    }
                }
                hcl_edit::structure::Structure::Block(block) => {
                    let ident = block.ident.value().as_str();
                    let inner = self.string_content(&block.body, &format!("{path}.{ident}"))?;
                    content.push_str(&block_header(block));
                    content.push_str(" {\n");
                    content.push_str(&syntax::indent(&inner, "  "));
                    content.push_str("}\n");
                }
            }
        }

        Ok(content)
    }
}

/// Body text of an `asraw` block without its own indentation
fn raw_content(block: &Block) -> String {
    let text = syntax::dedent(&block.body.to_string());
    if text.is_empty() {
        text
    } else {
        text + "\n"
    }
}

/// `ident "label1" "label2"`
pub(crate) fn block_header(block: &Block) -> String {
    let mut header = block.ident.value().as_str().to_owned();
    for label in &block.labels {
        header.push(' ');
        header.push_str(&quote(AsRef::<str>::as_ref(label)));
    }
    header
}

/// HCL string literal
pub(crate) fn quote(value: &str) -> String {
    hcl::format::to_string(&hcl::Expression::String(value.to_owned()))
        .unwrap_or_else(|_| format!("{value:?}"))
}

pub(crate) fn find_attribute<'b>(body: &'b Body, key: &str) -> Option<&'b Attribute> {
    body.attributes()
        .find(|attribute| attribute.key.value().as_str() == key)
}

pub type DecodeFn = fn(&DecodeInput) -> Result<Box<dyn Transform>, DecodeError>;

/// Transform kinds by label
#[derive(Debug, Clone)]
pub struct Registry {
    kinds: IndexMap<&'static str, DecodeFn>,
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(new_block::KIND, new_block::decode);
        registry.register(update_in_place::KIND, update_in_place::decode);
        registry
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            kinds: IndexMap::new(),
        }
    }

    pub fn register(&mut self, kind: &'static str, decode: DecodeFn) {
        self.kinds.insert(kind, decode);
    }

    pub fn get(&self, kind: &str) -> Option<DecodeFn> {
        self.kinds.get(kind).copied()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.kinds.keys().copied()
    }

    /// Decodes every transform declaration of the config's documents
    ///
    /// All declarations are decoded, errors are collected and returned together.
    pub fn decode_all(&self, config: &Config) -> Result<Vec<Box<dyn Transform>>, DecodeErrors> {
        let mut errors = DecodeErrors::new();
        let mut transforms = vec![];
        let context = config.eval_context();

        for (_, _, attribute) in config.documents().attributes() {
            errors.log(DecodeError::RootAttribute(
                attribute.key.value().as_str().to_owned(),
            ));
        }

        for (_, source, block) in config.documents().blocks() {
            let ident = block.ident.value().as_str();
            if NON_TRANSFORM_BLOCKS.contains(&ident) {
                continue;
            }
            if ident != TRANSFORM_BLOCK {
                errors.log(DecodeError::UnknownBlockType(ident.to_owned()));
                continue;
            }

            tracing::debug!(source=?source, header=%block_header(block), "decoding");
            match self.decode(block, &context) {
                Ok(decoded) => transforms.extend(decoded),
                Err(err) => errors.log(err),
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(transforms)
    }

    fn decode(
        &self,
        block: &Block,
        context: &Context,
    ) -> Result<Vec<Box<dyn Transform>>, DecodeError> {
        let [kind, name] = block.labels.as_slice() else {
            return Err(DecodeError::Labels);
        };
        let kind = AsRef::<str>::as_ref(kind);
        let name = AsRef::<str>::as_ref(name);

        let decode = self.get(kind).ok_or_else(|| DecodeError::UnknownKind {
            address: format!("{TRANSFORM_BLOCK}.{kind}.{name}"),
            kind: kind.to_owned(),
        })?;

        let input = DecodeInput {
            kind,
            name: name.to_owned(),
            block,
            context,
        };
        let Some(for_each) = input.attribute("for_each") else {
            return Ok(vec![decode(&input)?]);
        };

        let elements = for_each_elements(&input, input.evaluate("for_each", &for_each.value)?)?;
        elements
            .into_iter()
            .map(|(key, value)| {
                let mut each = hcl::value::Map::new();
                each.insert("key".to_owned(), Value::String(key.clone()));
                each.insert("value".to_owned(), value);

                let mut scope = context.clone();
                scope.declare_var(hcl::Identifier::unchecked("each"), Value::Object(each));

                decode(&DecodeInput {
                    kind: input.kind,
                    name: format!("{name}[{key}]"),
                    block,
                    context: &scope,
                })
            })
            .collect()
    }
}

/// `(each.key, each.value)` pairs
///
/// Objects yield their entries, lists of strings yield each string as key and value, other lists are keyed by
/// index.
fn for_each_elements(input: &DecodeInput, value: Value) -> Result<Vec<(String, Value)>, DecodeError> {
    match value {
        Value::Object(entries) => Ok(entries.into_iter().collect()),
        Value::Array(values) => Ok(values
            .into_iter()
            .enumerate()
            .map(|(index, value)| match value {
                Value::String(key) => (key.clone(), Value::String(key)),
                value => (index.to_string(), value),
            })
            .collect()),
        Value::Null => Ok(vec![]),
        _ => Err(DecodeError::Invalid {
            address: input.address(),
            message: "for_each must be an object or a list".to_owned(),
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::test::config;
    use crate::mptf_documents;
    use pretty_assertions::assert_eq;

    fn ids(transforms: &[Box<dyn Transform>]) -> Vec<String> {
        transforms.iter().map(|t| t.id()).collect()
    }

    fn decode_errors(documents: crate::mptf_documents::MptfDocuments) -> Vec<String> {
        Registry::default()
            .decode_all(&config(documents))
            .unwrap_err()
            .issues()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn default_registry_knows_both_kinds() {
        let registry = Registry::default();
        assert_eq!(
            registry.kinds().collect::<Vec<_>>(),
            vec!["new_block", "update_in_place"]
        );
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn errors_are_collected_across_declarations() {
        let errors = decode_errors(mptf_documents! {r#"
        stray = 1

        transform "new_block" "missing_type" {
          filename = "main.tf"
        }

        transform "new_block" "ok" {
          new_block_type = "locals"
          filename       = "main.tf"
        }

        transform "new_block" "wrong_type" {
          new_block_type = 1
          filename       = "main.tf"
        }

        transform "unknown" "x" {}

        output "x" {}
        "#});

        assert_eq!(
            errors,
            vec![
                "top-level attribute stray is not allowed",
                "transform.new_block.missing_type: new_block_type is required",
                "transform.new_block.wrong_type: new_block_type must be a string",
                "transform.unknown.x: unknown transform type unknown",
                "unknown block type output",
            ]
        );
    }

    #[test]
    fn for_each_expands_declarations() {
        let config = config(mptf_documents! {r#"
        locals {
          outputs = { a = 1, b = 2 }
        }

        transform "new_block" "outputs" {
          for_each       = local.outputs
          new_block_type = "output"
          filename       = "outputs.tf"
          labels         = [each.key]
          value          = each.value
        }

        transform "new_block" "names" {
          for_each       = ["x", "y"]
          new_block_type = "output"
          filename       = "outputs.tf"
          labels         = [each.value]
        }
        "#});

        let transforms = Registry::default().decode_all(&config).unwrap();
        assert_eq!(
            ids(&transforms),
            vec![
                "new_block.outputs[a]",
                "new_block.outputs[b]",
                "new_block.names[x]",
                "new_block.names[y]",
            ]
        );
    }

    #[test]
    fn render_content_keeps_declaration_order() {
        let documents = mptf_documents! {r#"
        transform "new_block" "x" {
          new_block_type = "resource"
          filename       = "main.tf"
          asraw {
            name = var.name
          }
          asstring {
            tags = "{ env = \"dev\" }"
            lifecycle {
              ignore_changes = "[tags]"
            }
          }
          count = 1 + 1
        }
        "#};
        let config = config(documents);
        let (_, _, block) = config.documents().get_block(0);
        let context = config.eval_context();
        let input = DecodeInput {
            kind: "new_block",
            name: "x".to_owned(),
            block,
            context: &context,
        };

        let content = input
            .render_content(&["new_block_type", "filename"])
            .unwrap();
        assert_eq!(
            content,
            "name = var.name\ntags = { env = \"dev\" }\nlifecycle {\n  ignore_changes = [tags]\n}\ncount = 2\n"
        );
    }

    #[test]
    fn quote_escapes() {
        assert_eq!(quote("plain"), r#""plain""#);
        assert_eq!(quote(r#"a"b"#), r#""a\"b""#);
    }
}
