//! collection of meta-programming documents
//!
//! [MptfDocuments] tracks
//! - the source path
//! - the root blocks
//! - the root attributes
//! and defines a numeric index for each. Once added those indices are stable (removal is not possible)
use crate::fs::FileSystem;
use hcl_edit::structure::{Attribute, Block, Body, Structure};
use std::path::{Path, PathBuf};

/// Suffix of meta-programming source files
pub const MPTF_FILE_SUFFIX: &str = ".mptf.hcl";

#[derive(Default, Debug)]
pub struct MptfDocuments {
    sources: Vec<Source>,
    root_attributes: Vec<(usize, Attribute)>,
    root_blocks: Vec<(usize, Block)>,
}

impl MptfDocuments {
    /// Inserts and indexes a document
    pub fn insert(&mut self, document: Body, path: impl Into<Option<PathBuf>>) {
        let source_index = self.sources.len();
        self.sources.push(path.into());

        for structure in document.into_iter() {
            match structure {
                Structure::Block(block) => self.root_blocks.push((source_index, block)),
                Structure::Attribute(attribute) => {
                    self.root_attributes.push((source_index, attribute))
                }
            }
        }
    }

    pub fn attributes(&self) -> impl Iterator<Item = SourceAttribute> {
        self.root_attributes
            .iter()
            .enumerate()
            .map(|(index, (source_index, attribute))| {
                (index, &self.sources[*source_index], attribute)
            })
    }

    pub fn get_block(&self, index: usize) -> SourceBlock {
        let (source_index, block) = &self.root_blocks[index];
        (index, &self.sources[*source_index], block)
    }

    pub fn blocks(&self) -> impl Iterator<Item = SourceBlock> {
        self.root_blocks
            .iter()
            .enumerate()
            .map(|(index, (source_index, block))| (index, &self.sources[*source_index], block))
    }

    /// Root blocks with the given identifier, in load order
    pub fn blocks_of_type<'a>(&'a self, ident: &'a str) -> impl Iterator<Item = SourceBlock<'a>> {
        self.blocks()
            .filter(move |(_, _, block)| block.ident.value().as_str() == ident)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

impl MptfDocuments {
    pub fn load_file(&mut self, fs: &dyn FileSystem, file_path: &Path) -> Result<(), LoadError> {
        tracing::info!(path=%file_path.display(), "loading file");

        let file_contents = fs.read_to_string(file_path)?;
        let body = hcl_edit::parser::parse_body(&file_contents).map_err(|source| {
            LoadError::HclParseFailed {
                path: file_path.to_owned(),
                source,
            }
        })?;

        self.insert(body, Some(file_path.to_owned()));
        Ok(())
    }

    /// Loads every `*.mptf.hcl` file directly inside `dir_path`
    pub fn load_directory(&mut self, fs: &dyn FileSystem, dir_path: &Path) -> Result<(), LoadError> {
        let mut any_files_loaded = false;

        for dir_entry in fs.list_dir(dir_path)? {
            if dir_entry.is_dir || !dir_entry.name.ends_with(MPTF_FILE_SUFFIX) {
                continue;
            }

            self.load_file(fs, &dir_path.join(&dir_entry.name))?;
            any_files_loaded = true;
        }

        if !any_files_loaded {
            return Err(LoadError::NoFilesFound(dir_path.to_owned()));
        }

        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("No {MPTF_FILE_SUFFIX} files found in {}", .0.display())]
    NoFilesFound(PathBuf),
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    #[error("Unable to parse {}", path.display())]
    HclParseFailed {
        path: PathBuf,
        #[source]
        source: hcl_edit::parser::Error,
    },
}

impl From<Body> for MptfDocuments {
    fn from(value: Body) -> Self {
        let mut documents = MptfDocuments::default();
        documents.insert(value, None);
        documents
    }
}

/// Utility macro to create [MptfDocuments]
///
/// Create from a single document
/// ```
/// # use mptf::mptf_documents;
/// mptf_documents!(r#"transform "new_block" "x" {}"#);
/// ```
///
/// Create from multiple documents (path required)
/// ```
/// # use mptf::mptf_documents;
/// mptf_documents! {
///   "one.mptf.hcl" => "locals {}",
///   "two.mptf.hcl" => "locals {}"
/// };
/// ```
///
/// # Panic
/// Panics on invalid input
///
/// ```should_panic
/// # use mptf::mptf_documents;
/// mptf_documents!("not = valid = hcl");
/// ```
#[macro_export]
macro_rules! mptf_documents {
    // single document without source
    { $expr:expr } => {
        $crate::mptf_documents::MptfDocuments::from(hcl_edit::parser::parse_body($expr).expect("body must parse"))
    };
    // multi document with sources
    { $($source:expr => $expr:expr),+ } => {{
        let mut docs = $crate::mptf_documents::MptfDocuments::default();
        $(
            docs.insert(hcl_edit::parser::parse_body($expr).expect("body must parse"), Some(std::path::PathBuf::from($source)));
        )+

        docs
    }};
}

pub type Source = Option<PathBuf>;
pub type SourceAttribute<'a> = (usize, &'a Source, &'a Attribute);
pub type SourceBlock<'a> = (usize, &'a Source, &'a Block);
