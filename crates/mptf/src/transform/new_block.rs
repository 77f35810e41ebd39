//! `transform "new_block" "<name>"`
//!
//! ```hcl
//! transform "new_block" "x" {
//!   new_block_type = "output"
//!   filename       = "outputs.tf"
//!   labels         = ["x"]
//!   value          = 1
//! }
//! ```
//!
//! appends `output "x" { value = 1 }` to `outputs.tf` of the target module.
use super::{block_header, quote, ApplyError, DecodeError, DecodeInput, Transform};
use crate::module::Module;
use crate::syntax::{self, CONFIG_FILE_EXTENSION};
use hcl_edit::structure::Block;

pub const KIND: &str = "new_block";

const RESERVED: [&str; 6] = [
    "new_block_type",
    "for_each",
    "asraw",
    "asstring",
    "labels",
    "filename",
];

#[derive(Debug)]
pub struct NewBlock {
    name: String,
    pub new_block_type: String,
    pub labels: Vec<String>,
    pub filename: String,
    /// synthesized block, already parsed
    block: Block,
}

impl NewBlock {
    pub fn block(&self) -> &Block {
        &self.block
    }
}

pub fn decode(input: &DecodeInput) -> Result<Box<dyn Transform>, DecodeError> {
    let new_block_type = input.required_string("new_block_type")?;
    let filename = input.required_string("filename")?;
    if !filename.ends_with(CONFIG_FILE_EXTENSION) {
        return Err(DecodeError::Invalid {
            address: input.address(),
            message: format!("filename must end with {CONFIG_FILE_EXTENSION}, got {filename}"),
        });
    }
    let labels = input.optional_string_list("labels")?;

    let content = input.render_content(&RESERVED)?;
    let mut text = new_block_type.clone();
    for label in &labels {
        text.push(' ');
        text.push_str(&quote(label));
    }
    if content.is_empty() {
        text.push_str(" {}\n");
    } else {
        text.push_str(" {\n");
        text.push_str(&syntax::indent(&content, "  "));
        text.push_str("}\n");
    }

    tracing::trace!(%text, "synthesized block");
    let block = syntax::parse_block_snippet(&text).map_err(|source| DecodeError::Generate {
        address: input.address(),
        source,
    })?;

    Ok(Box::new(NewBlock {
        name: input.name.clone(),
        new_block_type,
        labels,
        filename,
        block,
    }))
}

impl Transform for NewBlock {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn target(&self) -> String {
        format!("{} ({})", self.filename, block_header(&self.block))
    }

    fn resolve(&self, _module: &Module) -> bool {
        true
    }

    fn apply(&self, module: &Module) -> Result<(), ApplyError> {
        tracing::info!(file_name=%self.filename, block=%block_header(&self.block), "adding block");
        module.add_block(&self.filename, self.block.clone());
        Ok(())
    }
}
