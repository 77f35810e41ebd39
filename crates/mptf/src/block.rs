//! Terraform blocks
//!
//! A [Block] pairs a [ReadBlock] (used for analysis and evaluation) with a [WriteRef] into the write tree
//! (used for edits). Nested blocks are plain [Block]s, top-level blocks are [RootBlock]s which additionally
//! carry a lock and their source range.
use crate::syntax::{ReadAttribute, ReadBlock, SourceRange, WriteRef};
use hcl::value::Map;
use hcl::Value;
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};

/// Namespace in a root block's evaluation value that holds reflection information
pub const RESERVED_NAMESPACE: &str = "mptf";

/// `type.label1.label2...`
pub fn address(block_type: &str, labels: &[String]) -> String {
    std::iter::once(block_type)
        .chain(labels.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(".")
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    read: ReadAttribute,
    /// block the attribute belongs to
    write: WriteRef,
}

impl Attribute {
    pub fn new(read: &ReadAttribute, write: WriteRef) -> Self {
        Self {
            name: read.name.clone(),
            read: read.clone(),
            write,
        }
    }

    pub fn expression(&self) -> &hcl::Expression {
        &self.read.expr
    }

    pub fn range(&self) -> &SourceRange {
        &self.read.range
    }

    /// Expression text as currently found in the write tree
    pub fn write_source(&self) -> Option<String> {
        self.write
            .with_block(|block| {
                block
                    .body
                    .attributes()
                    .find(|attribute| attribute.key.value().as_str() == self.name)
                    .map(|attribute| attribute.value.to_string().trim().to_owned())
            })
            .flatten()
    }
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.read.source)
    }
}

/// Nested blocks by block type, each list ordered by start line
#[derive(Debug, Clone, Default)]
pub struct NestedBlocks(IndexMap<String, Vec<Block>>);

pub type NestedBlock = Block;

impl NestedBlocks {
    fn new(read: &ReadBlock, write: &WriteRef) -> Self {
        let mut nested: IndexMap<String, Vec<Block>> = IndexMap::new();
        for read_block in &read.body.blocks {
            let block = Block::new(read_block, write.child(read_block.position));
            nested.entry(block.block_type.clone()).or_default().push(block);
        }

        for blocks in nested.values_mut() {
            blocks.sort_by_key(|block| block.range().start.line);
        }

        Self(nested)
    }

    pub fn get(&self, block_type: &str) -> &[NestedBlock] {
        self.0.get(block_type).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<NestedBlock>)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn values(&self) -> Map<String, Value> {
        self.0
            .iter()
            .map(|(block_type, blocks)| {
                (
                    block_type.clone(),
                    Value::Array(blocks.iter().map(Block::eval_context).collect()),
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub block_type: String,
    pub labels: Vec<String>,
    pub address: String,
    pub count: Option<Attribute>,
    pub for_each: Option<Attribute>,
    pub attributes: IndexMap<String, Attribute>,
    pub nested_blocks: NestedBlocks,
    read: ReadBlock,
    write: WriteRef,
}

impl Block {
    /// `read` and `write` must be the same block of two parses of the same text
    pub fn new(read: &ReadBlock, write: WriteRef) -> Self {
        let attribute = |name: &str| {
            read.body
                .attributes
                .get(name)
                .map(|attribute| Attribute::new(attribute, write.clone()))
        };

        Self {
            block_type: read.ident.clone(),
            labels: read.labels.clone(),
            address: address(&read.ident, &read.labels),
            count: attribute("count"),
            for_each: attribute("for_each"),
            attributes: read
                .body
                .attributes
                .values()
                .map(|attribute| {
                    (
                        attribute.name.clone(),
                        Attribute::new(attribute, write.clone()),
                    )
                })
                .collect(),
            nested_blocks: NestedBlocks::new(read, &write),
            read: read.clone(),
            write,
        }
    }

    pub fn range(&self) -> &SourceRange {
        &self.read.range
    }

    pub fn read(&self) -> &ReadBlock {
        &self.read
    }

    pub fn write(&self) -> &WriteRef {
        &self.write
    }

    /// Value exposed to expressions
    ///
    /// Attributes are rendered as their source text, nested blocks as lists of objects.
    pub fn eval_context(&self) -> Value {
        Value::Object(self.values())
    }

    fn values(&self) -> Map<String, Value> {
        let mut values: Map<String, Value> = self
            .attributes
            .iter()
            .map(|(name, attribute)| (name.clone(), Value::String(attribute.to_string())))
            .collect();

        if let Some(count) = &self.count {
            values.insert("count".to_owned(), Value::String(count.to_string()));
        }
        if let Some(for_each) = &self.for_each {
            values.insert("for_each".to_owned(), Value::String(for_each.to_string()));
        }

        values.extend(self.nested_blocks.values());
        values
    }
}

/// Top-level block of a configuration file
#[derive(Debug)]
pub struct RootBlock {
    block: Block,
    lock: Mutex<()>,
}

impl RootBlock {
    pub fn new(read: &ReadBlock, write: WriteRef) -> Self {
        Self {
            block: Block::new(read, write),
            lock: Mutex::new(()),
        }
    }

    /// Serializes mutations of this block
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    pub fn eval_context(&self) -> Value {
        let mut values = self.block.values();
        values.insert(RESERVED_NAMESPACE.to_owned(), self.reflection());
        Value::Object(values)
    }

    fn reflection(&self) -> Value {
        let range = self.range();
        let number = |n: usize| Value::Number(hcl::Number::from(n as u64));

        let range: Map<String, Value> = [
            ("file_name", Value::String(range.file_name.clone())),
            ("start_line", number(range.start.line)),
            ("start_column", number(range.start.column)),
            ("end_line", number(range.end.line)),
            ("end_column", number(range.end.column)),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value))
        .collect();

        let mut reflection = Map::new();
        reflection.insert(
            "block_address".to_owned(),
            Value::String(self.address.clone()),
        );
        reflection.insert("range".to_owned(), Value::Object(range));
        Value::Object(reflection)
    }
}

impl std::ops::Deref for RootBlock {
    type Target = Block;

    fn deref(&self) -> &Self::Target {
        &self.block
    }
}
