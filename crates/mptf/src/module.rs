//! Terraform modules
//!
//! A [Module] holds every `resource`, `data` and `module` block of one directory together with the write trees
//! of all loaded files. Transforms edit the write trees, [Module::save_to_disk] persists them.
use crate::backup;
use crate::block::RootBlock;
use crate::fs::FileSystem;
use crate::syntax::{self, SharedBody, WriteRef, CONFIG_FILE_EXTENSION};
use hcl_edit::structure::{Block, Body};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

/// Module directory as listed in `.terraform/modules/modules.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct ModuleRef {
    #[serde(rename = "Key", default)]
    pub key: String,
    #[serde(rename = "Source", default)]
    pub source: String,
    #[serde(rename = "Dir", default)]
    pub dir: PathBuf,
    #[serde(skip)]
    pub abs_dir: PathBuf,
    #[serde(rename = "Version", default)]
    pub version: String,
}

impl ModuleRef {
    /// Reference to a plain directory (the root module)
    pub fn root(dir: impl Into<PathBuf>, abs_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            abs_dir: abs_dir.into(),
            ..Default::default()
        }
    }
}

/// Top-level block types that get loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Resource,
    Data,
    Module,
}

impl BlockKind {
    pub fn from_ident(ident: &str) -> Option<Self> {
        match ident {
            "resource" => Some(Self::Resource),
            "data" => Some(Self::Data),
            "module" => Some(Self::Module),
            _ => None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("unable to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Parse(#[from] syntax::ParseError),
}

#[derive(thiserror::Error, Debug)]
pub enum SaveError {
    #[error("unable to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Marker(#[from] backup::BackupError),
}

/// Write tree of one file plus what is needed to tell whether it changed
#[derive(Debug, Clone)]
struct ConfigFile {
    body: SharedBody,
    /// rendering of the write tree right after loading, `None` for files created in memory
    loaded: Option<String>,
    crlf: bool,
}

impl ConfigFile {
    fn new_in_memory() -> Self {
        Self {
            body: Arc::new(Mutex::new(Body::default())),
            loaded: None,
            crlf: false,
        }
    }

    /// Canonical text, `None` when nothing changed since loading
    fn render_changed(&self) -> Option<String> {
        let body = self.body.lock();
        if self.loaded.as_deref() == Some(body.to_string().as_str()) {
            return None;
        }
        Some(self.render_body(&body))
    }

    fn render(&self) -> String {
        self.render_body(&self.body.lock())
    }

    fn render_body(&self, body: &Body) -> String {
        let text = syntax::canonical_format(body);
        if self.crlf {
            syntax::restore_crlf(&text)
        } else {
            text
        }
    }
}

#[derive(Debug)]
pub struct Module {
    pub dir: PathBuf,
    pub abs_dir: PathBuf,
    pub key: String,
    pub source: String,
    pub version: String,
    pub resource_blocks: Vec<RootBlock>,
    pub data_blocks: Vec<RootBlock>,
    pub module_blocks: Vec<RootBlock>,
    /// write trees by file name, the mutex is the module-wide lock
    files: Mutex<IndexMap<String, ConfigFile>>,
    fs: Arc<dyn FileSystem>,
}

impl Module {
    /// Loads every `.tf` file in `module_ref.abs_dir`
    pub fn load(fs: Arc<dyn FileSystem>, module_ref: &ModuleRef) -> Result<Self, LoadError> {
        let dir = &module_ref.abs_dir;
        tracing::info!(dir=%dir.display(), "loading module");

        let mut module = Self {
            dir: module_ref.dir.clone(),
            abs_dir: module_ref.abs_dir.clone(),
            key: module_ref.key.clone(),
            source: module_ref.source.clone(),
            version: module_ref.version.clone(),
            resource_blocks: vec![],
            data_blocks: vec![],
            module_blocks: vec![],
            files: Default::default(),
            fs: fs.clone(),
        };

        let entries = fs.list_dir(dir).map_err(|source| LoadError::Io {
            path: dir.clone(),
            source,
        })?;

        for entry in entries {
            if entry.is_dir || !entry.name.ends_with(CONFIG_FILE_EXTENSION) {
                continue;
            }

            let path = dir.join(&entry.name);
            let text = fs
                .read_to_string(&path)
                .map_err(|source| LoadError::Io { path, source })?;
            module.load_config(&text, &entry.name)?;
        }

        Ok(module)
    }

    fn load_config(&mut self, text: &str, file_name: &str) -> Result<(), LoadError> {
        tracing::debug!(file_name, "parsing file");
        let write_body = syntax::parse_write(text, file_name)?;
        let loaded = write_body.to_string();
        let write_body: SharedBody = Arc::new(Mutex::new(write_body));
        let read_body = syntax::parse_read(text, file_name)?;

        for read_block in &read_body.blocks {
            let Some(kind) = BlockKind::from_ident(&read_block.ident) else {
                tracing::trace!(ident = %read_block.ident, "skipping block");
                continue;
            };

            let block = RootBlock::new(
                read_block,
                WriteRef::root(write_body.clone(), read_block.position),
            );
            match kind {
                BlockKind::Resource => self.resource_blocks.push(block),
                BlockKind::Data => self.data_blocks.push(block),
                BlockKind::Module => self.module_blocks.push(block),
            }
        }

        self.files.get_mut().insert(
            file_name.to_owned(),
            ConfigFile {
                body: write_body,
                loaded: Some(loaded),
                crlf: syntax::uses_crlf(text),
            },
        );
        Ok(())
    }

    /// All root blocks: resources, then data blocks, then module calls
    pub fn root_blocks(&self) -> impl Iterator<Item = &RootBlock> {
        self.resource_blocks
            .iter()
            .chain(&self.data_blocks)
            .chain(&self.module_blocks)
    }

    pub fn blocks_by_address<'m>(&'m self, address: &'m str) -> impl Iterator<Item = &'m RootBlock> {
        self.root_blocks().filter(move |block| block.address == address)
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files.lock().keys().cloned().collect()
    }

    /// Current text of a file's write tree, canonically formatted
    pub fn render_file(&self, file_name: &str) -> Option<String> {
        let file = self.files.lock().get(file_name).cloned()?;
        Some(file.render())
    }

    /// Appends `block` to `file_name`, creating the file in memory if needed
    pub fn add_block(&self, file_name: &str, block: Block) {
        let file = self
            .files
            .lock()
            .entry(file_name.to_owned())
            .or_insert_with(ConfigFile::new_in_memory)
            .body
            .clone();

        let mut body = file.lock();
        // one blank line between the new block and the structure before it
        let separator = if body.is_empty() { "" } else { "\n" };

        let block_text = format!("{separator}{}\n", syntax::block_source(&block).trim());
        match syntax::parse_block_snippet(&block_text) {
            Ok(block) => body.push(block),
            // a block renders into valid text, keep it with its own decor if it does not
            Err(err) => {
                tracing::warn!(error=%err, file_name, "unable to re-parse new block");
                body.push(block);
            }
        }

        tracing::debug!(file_name, "block added");
    }

    /// Writes every changed write tree to `abs_dir/<file name>`
    ///
    /// Files whose write tree is unchanged since loading are not touched. Stops at the first error, files
    /// written before stay written.
    pub fn save_to_disk(&self) -> Result<(), SaveError> {
        let files = self.files.lock();
        for (file_name, file) in files.iter() {
            let path = self.abs_dir.join(file_name);
            let Some(content) = file.render_changed() else {
                tracing::trace!(path=%path.display(), "unchanged");
                continue;
            };

            let exists = self.fs.exists(&path).map_err(|source| SaveError::Io {
                path: path.clone(),
                source,
            })?;
            if !exists {
                backup::mark_new_file(self.fs.as_ref(), &path)?;
            }

            tracing::info!(path=%path.display(), "writing file");
            self.fs
                .write(&path, content.as_bytes())
                .map_err(|source| SaveError::Io { path, source })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fs::MemoryFs;
    use crate::syntax::parse_block_snippet;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    const MAIN_TF: &str = r#"terraform {
  required_version = ">= 1.0"
}

resource "fake_resource" "this" {
  name = "a"
}

data "fake_data" "that" {}

variable "ignored" {}

module "child" {
  source = "./child"
}
"#;

    const OTHER_TF: &str = r#"resource "fake_resource" "other" {
  nested {
    value = 1
  }
}
"#;

    const HEREDOC_TF: &str = "resource \"fake_resource\" \"script\" {\n  script = <<EOT\nline1\n\n\n\nline2\n    \nEOT\n}\n";

    fn output_block() -> Block {
        parse_block_snippet("output \"x\" {\n  value = 1\n}\n").unwrap()
    }

    fn load(files: &[(&str, &str)]) -> (Arc<MemoryFs>, Module) {
        let fs = Arc::new(MemoryFs::with_files(files.iter().copied()));
        let module = Module::load(fs.clone(), &ModuleRef::root("/cfg", "/cfg")).unwrap();
        (fs, module)
    }

    fn read(fs: &MemoryFs, path: &str) -> String {
        fs.read_to_string(Path::new(path)).unwrap()
    }

    #[test]
    fn load_classifies_blocks() {
        let (_, module) = load(&[
            ("/cfg/main.tf", MAIN_TF),
            ("/cfg/other.tf", OTHER_TF),
            ("/cfg/readme.md", "not hcl {"),
            ("/cfg/sub/ignored.tf", "not hcl {"),
        ]);

        let addresses: Vec<_> = module.root_blocks().map(|b| b.address.as_str()).collect();
        assert_eq!(
            addresses,
            vec![
                "resource.fake_resource.this",
                "resource.fake_resource.other",
                "data.fake_data.that",
                "module.child",
            ]
        );
        assert_eq!(module.file_names(), vec!["main.tf", "other.tf"]);
    }

    #[test]
    fn load_fails_on_syntax_errors() {
        let fs = Arc::new(MemoryFs::with_files([("/cfg/main.tf", "resource {")]));
        let err = Module::load(fs, &ModuleRef::root("/cfg", "/cfg")).unwrap_err();
        assert!(matches!(err, LoadError::Parse(e) if e.file_name == "main.tf"));
    }

    #[test]
    fn load_fails_on_missing_directory() {
        let fs = Arc::new(MemoryFs::new());
        let err = Module::load(fs, &ModuleRef::root("/cfg", "/cfg")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn read_and_write_trees_stay_correlated() {
        let (_, module) = load(&[("/cfg/main.tf", MAIN_TF), ("/cfg/other.tf", OTHER_TF)]);

        for block in module.root_blocks() {
            let written = block.write().to_source().unwrap();
            let expected_head = format!(
                "{} {}",
                block.block_type,
                block
                    .labels
                    .iter()
                    .map(|label| format!("\"{label}\""))
                    .collect::<Vec<_>>()
                    .join(" ")
            );
            assert!(
                written.starts_with(&expected_head),
                "{written} does not start with {expected_head}"
            );

            let text = module.render_file(&block.range().file_name).unwrap();
            let offset = text.find(&written).unwrap();
            assert_eq!(text[..offset].lines().count() + 1, block.range().start.line);
        }
    }

    #[test]
    fn add_block_appends_after_existing_blocks() {
        let (fs, module) = load(&[("/cfg/main.tf", OTHER_TF)]);

        let block = parse_block_snippet("output \"x\" {\n  value = 1\n}\n").unwrap();
        module.add_block("main.tf", block);
        module.save_to_disk().unwrap();

        assert_eq!(
            read(&fs, "/cfg/main.tf"),
            format!("{OTHER_TF}\noutput \"x\" {{\n  value = 1\n}}\n")
        );
        assert!(!fs
            .exists(Path::new(&format!("/cfg/main.tf{}", backup::NEW_FILE_EXTENSION)))
            .unwrap());
    }

    #[test]
    fn add_block_to_new_file_marks_it_as_new() {
        let (fs, module) = load(&[("/cfg/main.tf", OTHER_TF)]);

        let block = parse_block_snippet("locals {\n  a = 1\n}\n").unwrap();
        module.add_block("locals.tf", block);
        module.save_to_disk().unwrap();

        assert_eq!(read(&fs, "/cfg/locals.tf"), "locals {\n  a = 1\n}\n");
        assert!(fs
            .exists(Path::new(&format!("/cfg/locals.tf{}", backup::NEW_FILE_EXTENSION)))
            .unwrap());
        assert_eq!(read(&fs, "/cfg/main.tf"), OTHER_TF);
    }

    #[test]
    fn concurrent_add_block() {
        let (_, module) = load(&[("/cfg/main.tf", OTHER_TF)]);

        std::thread::scope(|scope| {
            for i in 0..8 {
                let module = &module;
                scope.spawn(move || {
                    let file_name = if i % 2 == 0 { "main.tf" } else { "extra.tf" };
                    let block =
                        parse_block_snippet(&format!("output \"o{i}\" {{\n  value = {i}\n}}\n"))
                            .unwrap();
                    module.add_block(file_name, block);
                });
            }
        });

        for file_name in ["main.tf", "extra.tf"] {
            let rendered = module.render_file(file_name).unwrap();
            let body = syntax::parse_read(&rendered, file_name).unwrap();
            let outputs = body.blocks.iter().filter(|b| b.ident == "output").count();
            assert_eq!(outputs, 4, "{rendered}");
        }
    }

    #[test]
    fn save_leaves_unchanged_files_alone() {
        let untouched = format!("\n\n{HEREDOC_TF}\n\n\n");
        let (fs, module) = load(&[("/cfg/main.tf", untouched.as_str()), ("/cfg/other.tf", OTHER_TF)]);

        module.add_block("other.tf", output_block());
        module.save_to_disk().unwrap();

        assert_eq!(read(&fs, "/cfg/main.tf"), untouched);
        assert_eq!(
            read(&fs, "/cfg/other.tf"),
            format!("{OTHER_TF}\noutput \"x\" {{\n  value = 1\n}}\n")
        );
    }

    #[test]
    fn save_keeps_heredocs_in_edited_files() {
        let (fs, module) = load(&[("/cfg/main.tf", HEREDOC_TF)]);

        module.add_block("main.tf", output_block());
        module.save_to_disk().unwrap();

        assert_eq!(
            read(&fs, "/cfg/main.tf"),
            format!("{HEREDOC_TF}\noutput \"x\" {{\n  value = 1\n}}\n")
        );
    }

    #[test]
    fn save_keeps_crlf_line_endings() {
        let crlf = "resource \"fake_resource\" \"this\" {\r\n  name = \"a\"\r\n}\r\n";
        let (fs, module) = load(&[("/cfg/main.tf", crlf), ("/cfg/other.tf", crlf)]);

        module.add_block("main.tf", output_block());
        module.save_to_disk().unwrap();

        assert_eq!(
            read(&fs, "/cfg/main.tf"),
            format!("{crlf}\r\noutput \"x\" {{\r\n  value = 1\r\n}}\r\n")
        );
        assert_eq!(read(&fs, "/cfg/other.tf"), crlf);
    }

    #[test]
    fn add_block_after_trailing_blank_lines() {
        let (fs, module) = load(&[("/cfg/main.tf", "locals {}\n\n\n")]);

        module.add_block("main.tf", output_block());
        module.save_to_disk().unwrap();

        assert_eq!(
            read(&fs, "/cfg/main.tf"),
            "locals {}\n\noutput \"x\" {\n  value = 1\n}\n"
        );
    }
}
