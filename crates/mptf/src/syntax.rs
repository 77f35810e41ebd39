//! read tree and write tree
//!
//! Each configuration file is parsed twice from the same text.
//!
//! - the first parse is converted into a [ReadBody]: immutable, with evaluated-ready [hcl::Expression]s and
//!   line/column ranges. It is never modified after loading.
//! - the second parse ([Body]) is kept as-is and becomes the write tree. It preserves comments and formatting
//!   and is what gets written back to disk.
//!
//! Both trees are visited in the same order, so the structure at position `i` of a read body is the structure
//! at position `i` of the corresponding write body. Write tree nodes are addressed by that position path
//! ([WriteRef]). Mutations must only replace structures in place or append to the end of a body, otherwise
//! recorded positions would point at the wrong structure.
use hcl_edit::structure::{Attribute, Block, Body, Structure};
use hcl_edit::{Decorate, Span};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::ops::Range;
use std::sync::Arc;

/// Extension of configuration files that get loaded, backed up and written
pub const CONFIG_FILE_EXTENSION: &str = ".tf";

#[derive(thiserror::Error, Debug)]
#[error("unable to parse {file_name}")]
pub struct ParseError {
    pub file_name: String,
    #[source]
    pub source: hcl_edit::parser::Error,
}

/// Position in a source file. `line` and `column` start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
    pub byte: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceRange {
    pub file_name: String,
    pub start: Pos,
    pub end: Pos,
}

/// Translates byte offsets into line/column positions
struct LineIndex<'s> {
    text: &'s str,
    line_starts: Vec<usize>,
}

impl<'s> LineIndex<'s> {
    fn new(text: &'s str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(index, _)| index + 1))
            .collect();
        Self { text, line_starts }
    }

    fn pos(&self, byte: usize) -> Pos {
        let byte = byte.min(self.text.len());
        let line = match self.line_starts.binary_search(&byte) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let line_start = self.line_starts[line];
        let column = self
            .text
            .get(line_start..byte)
            .map(|prefix| prefix.chars().count())
            .unwrap_or(byte - line_start);

        Pos {
            line: line + 1,
            column: column + 1,
            byte,
        }
    }

    fn range(&self, file_name: &str, span: Option<Range<usize>>) -> SourceRange {
        let span = span.unwrap_or_default();
        SourceRange {
            file_name: file_name.to_owned(),
            start: self.pos(span.start),
            end: self.pos(span.end),
        }
    }

    fn slice(&self, span: Option<Range<usize>>) -> Option<&'s str> {
        span.and_then(|span| self.text.get(span))
    }
}

/// Read-only attribute
#[derive(Debug, Clone)]
pub struct ReadAttribute {
    pub name: String,
    pub expr: hcl::Expression,
    /// expression as written in the source file
    pub source: String,
    pub range: SourceRange,
}

/// Read-only block
#[derive(Debug, Clone)]
pub struct ReadBlock {
    pub ident: String,
    pub labels: Vec<String>,
    pub body: ReadBody,
    /// index of this block among all structures of its parent body
    pub position: usize,
    pub range: SourceRange,
}

#[derive(Debug, Clone, Default)]
pub struct ReadBody {
    pub attributes: IndexMap<String, ReadAttribute>,
    /// in source order
    pub blocks: Vec<ReadBlock>,
}

impl ReadBody {
    fn new(body: &Body, file_name: &str, index: &LineIndex) -> Self {
        let mut read_body = ReadBody::default();

        for (position, structure) in body.iter().enumerate() {
            match structure {
                Structure::Attribute(attribute) => {
                    let name = attribute.key.value().as_str().to_owned();
                    let source = index
                        .slice(attribute.value.span())
                        .map(|source| source.trim().to_owned())
                        .unwrap_or_else(|| attribute.value.to_string().trim().to_owned());

                    tracing::trace!(%name, %source, "read attribute");
                    read_body.attributes.insert(
                        name.clone(),
                        ReadAttribute {
                            name,
                            expr: attribute.value.clone().into(),
                            source,
                            range: index.range(file_name, attribute.span()),
                        },
                    );
                }
                Structure::Block(block) => read_body.blocks.push(ReadBlock {
                    ident: block.ident.value().as_str().to_owned(),
                    labels: block
                        .labels
                        .iter()
                        .map(|label| AsRef::<str>::as_ref(label).to_owned())
                        .collect(),
                    body: ReadBody::new(&block.body, file_name, index),
                    position,
                    range: index.range(file_name, block.span()),
                }),
            }
        }

        read_body
    }
}

/// Parses `text` into the read tree
pub fn parse_read(text: &str, file_name: &str) -> Result<ReadBody, ParseError> {
    let body = parse_write(text, file_name)?;
    Ok(ReadBody::new(&body, file_name, &LineIndex::new(text)))
}

/// Parses `text` into a write tree
pub fn parse_write(text: &str, file_name: &str) -> Result<Body, ParseError> {
    hcl_edit::parser::parse_body(text).map_err(|source| ParseError {
        file_name: file_name.to_owned(),
        source,
    })
}

/// Write tree of a single file, shared between its module and all blocks loaded from it
///
/// The mutex is the per-file lock.
pub type SharedBody = Arc<Mutex<Body>>;

/// Handle to a block inside a write tree
#[derive(Debug, Clone)]
pub struct WriteRef {
    file: SharedBody,
    path: Vec<usize>,
}

impl WriteRef {
    pub(crate) fn root(file: SharedBody, position: usize) -> Self {
        Self {
            file,
            path: vec![position],
        }
    }

    pub(crate) fn child(&self, position: usize) -> Self {
        let mut path = self.path.clone();
        path.push(position);
        Self {
            file: self.file.clone(),
            path,
        }
    }

    /// Structure positions from the file body down to the block
    pub fn path(&self) -> &[usize] {
        &self.path
    }

    /// Runs `f` on the write block while holding the file lock
    ///
    /// Returns `None` when the path does not lead to a block.
    pub fn with_block<R>(&self, f: impl FnOnce(&mut Block) -> R) -> Option<R> {
        let mut body = self.file.lock();
        with_block_at(&mut body, &self.path, f)
    }

    /// Current text of the write block
    pub fn to_source(&self) -> Option<String> {
        self.with_block(|block| block_source(block).trim().to_owned())
    }
}

fn with_block_at<R>(body: &mut Body, path: &[usize], f: impl FnOnce(&mut Block) -> R) -> Option<R> {
    let (&position, rest) = path.split_first()?;
    if position >= body.len() {
        return None;
    }

    let mut structure = body.remove(position);
    let result = match &mut structure {
        Structure::Block(block) if rest.is_empty() => Some(f(block)),
        Structure::Block(block) => with_block_at(&mut block.body, rest, f),
        Structure::Attribute(_) => None,
    };
    body.insert(position, structure);

    result
}

#[derive(thiserror::Error, Debug)]
pub enum SnippetError {
    #[error("generated configuration is invalid")]
    Parse(#[from] ParseError),
    #[error("generated configuration does not contain {0}")]
    Missing(&'static str),
}

const GENERATED: &str = "<generated>";

/// Parses generated text and returns its first block
pub fn parse_block_snippet(text: &str) -> Result<Block, SnippetError> {
    parse_write(text, GENERATED)?
        .into_iter()
        .find_map(|structure| match structure {
            Structure::Block(block) => Some(block),
            Structure::Attribute(_) => None,
        })
        .ok_or(SnippetError::Missing("a block"))
}

/// Parses generated text and returns its first attribute
pub fn parse_attribute_snippet(text: &str) -> Result<Attribute, SnippetError> {
    parse_write(text, GENERATED)?
        .into_iter()
        .find_map(|structure| match structure {
            Structure::Attribute(attribute) => Some(attribute),
            Structure::Block(_) => None,
        })
        .ok_or(SnippetError::Missing("an attribute"))
}

/// Removes surrounding blank lines and the common indentation
pub fn dedent(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let Some(first) = lines.iter().position(|line| !line.trim().is_empty()) else {
        return String::new();
    };
    let last = lines
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .unwrap_or(first);
    let lines = &lines[first..=last];

    let margin = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    lines
        .iter()
        .map(|line| line.get(margin..).unwrap_or("").trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prefixes every non-empty line with `prefix`, every line ends with a newline
pub fn indent(text: &str, prefix: &str) -> String {
    let mut indented = String::with_capacity(text.len());
    for line in text.lines() {
        if !line.is_empty() {
            indented.push_str(prefix);
            indented.push_str(line);
        }
        indented.push('\n');
    }
    indented
}

/// Text of a single block, including its decor
pub fn block_source(block: &Block) -> String {
    Body::builder().block(block.clone()).build().to_string()
}

/// Text of a write tree in canonical layout
///
/// Only the whitespace between top-level structures is touched: no leading blank lines, at most one blank line
/// in a row, one trailing newline. Expressions (heredocs included) and block bodies are written as they are.
pub fn canonical_format(body: &Body) -> String {
    let mut body = body.clone();

    for (index, mut structure) in body.iter_mut().enumerate() {
        let Some(prefix) = structure.decor().prefix().map(|prefix| String::from(&**prefix)) else {
            continue;
        };
        structure
            .decor_mut()
            .set_prefix(collapse_blank_lines(&prefix, index == 0));
    }

    let trailing_blank = body
        .decor()
        .suffix()
        .is_some_and(|suffix| suffix.trim().is_empty());
    if trailing_blank {
        body.decor_mut().set_suffix("");
    }
    body.set_prefer_omit_trailing_newline(false);

    body.to_string()
}

/// Collapses blank lines of a structure prefix, `leading` drops them entirely
///
/// The last segment of `prefix` is the indentation in front of the structure and is kept.
fn collapse_blank_lines(prefix: &str, leading: bool) -> String {
    let mut lines: Vec<&str> = prefix.split('\n').collect();
    let indentation = lines.pop().unwrap_or_default();

    let mut collapsed = String::with_capacity(prefix.len());
    let mut previous_blank = leading;
    for line in lines {
        let blank = line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        previous_blank = blank;
        if !blank {
            collapsed.push_str(line);
        }
        collapsed.push('\n');
    }
    collapsed.push_str(indentation);
    collapsed
}

/// Whether `text` uses CRLF line endings
pub fn uses_crlf(text: &str) -> bool {
    text.contains("\r\n")
}

/// Turns every lone `\n` into `\r\n`
pub fn restore_crlf(text: &str) -> String {
    let mut restored = String::with_capacity(text.len() + text.len() / 16);
    let mut previous = None;
    for c in text.chars() {
        if c == '\n' && previous != Some('\r') {
            restored.push('\r');
        }
        restored.push(c);
        previous = Some(c);
    }
    restored
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    const SOURCE: &str = r#"resource "fake_resource" "this" {
  name = "a"
  tags = { env = "dev" } # trailing comment

  nested {
    value = 1
  }
}

data "fake_data" "that" {}
"#;

    #[test]
    fn read_tree_keeps_source_and_ranges() {
        let body = parse_read(SOURCE, "main.tf").unwrap();
        assert_eq!(body.blocks.len(), 2);

        let resource = &body.blocks[0];
        assert_eq!(resource.ident, "resource");
        assert_eq!(resource.labels, vec!["fake_resource", "this"]);
        assert_eq!(resource.position, 0);
        assert_eq!(resource.range.file_name, "main.tf");
        assert_eq!(resource.range.start.line, 1);
        assert_eq!(resource.range.start.column, 1);
        assert_eq!(resource.range.end.line, 8);

        assert_eq!(resource.body.attributes["name"].source, r#""a""#);
        assert_eq!(resource.body.attributes["tags"].source, r#"{ env = "dev" }"#);
        assert_eq!(resource.body.blocks[0].ident, "nested");
        assert_eq!(resource.body.blocks[0].position, 2);
        assert_eq!(resource.body.blocks[0].range.start.line, 5);

        let data = &body.blocks[1];
        assert_eq!(data.position, 1);
        assert_eq!(data.range.start.line, 10);
    }

    #[test]
    fn syntax_errors_name_the_file() {
        let err = parse_read("resource {", "broken.tf").unwrap_err();
        assert_eq!(err.file_name, "broken.tf");
    }

    #[test]
    fn write_ref_reaches_nested_blocks() {
        let file: SharedBody = Arc::new(Mutex::new(parse_write(SOURCE, "main.tf").unwrap()));
        let nested = WriteRef::root(file.clone(), 0).child(2);
        assert_eq!(nested.path(), &[0, 2]);

        let ident = nested.with_block(|block| block.ident.value().as_str().to_owned());
        assert_eq!(ident.as_deref(), Some("nested"));

        // position 0 inside the resource is an attribute
        assert!(WriteRef::root(file.clone(), 0).child(0).with_block(|_| ()).is_none());
        assert!(WriteRef::root(file, 7).with_block(|_| ()).is_none());
    }

    #[test]
    fn with_block_keeps_the_text_unchanged() {
        let file: SharedBody = Arc::new(Mutex::new(parse_write(SOURCE, "main.tf").unwrap()));
        WriteRef::root(file.clone(), 0).child(2).with_block(|_| ());
        assert_eq!(file.lock().to_string(), SOURCE);
    }

    #[test]
    fn snippets() {
        let block = parse_block_snippet("output \"x\" {\n  value = 1\n}\n").unwrap();
        assert_eq!(block.ident.value().as_str(), "output");

        let attribute = parse_attribute_snippet("value = 1\n").unwrap();
        assert_eq!(attribute.key.value().as_str(), "value");

        assert!(matches!(
            parse_block_snippet("value = 1\n"),
            Err(SnippetError::Missing(_))
        ));
        assert!(matches!(
            parse_block_snippet("output {"),
            Err(SnippetError::Parse(_))
        ));
    }

    #[test]
    fn dedent_and_indent() {
        let text = "\n\n    a = 1\n      b {\n      }\n\n";
        assert_eq!(dedent(text), "a = 1\n  b {\n  }");
        assert_eq!(indent("a = 1\n\nb = 2", "  "), "  a = 1\n\n  b = 2\n");
        assert_eq!(dedent("   \n  "), "");
    }

    #[test]
    fn canonical_format_collapses_blank_lines_between_structures() {
        let text = "\n\na = 1\n\n\n\nb {\n  c = 2\n\n\n  d = 3\n}\n   \n# comment\n\n\ne = 3\n\n\n";
        let body = parse_write(text, "main.tf").unwrap();
        assert_eq!(
            canonical_format(&body),
            "a = 1\n\nb {\n  c = 2\n\n\n  d = 3\n}\n\n# comment\n\ne = 3\n"
        );
        assert_eq!(canonical_format(&Body::new()), "");
    }

    #[test]
    fn collapse_blank_lines_keeps_comments_and_indentation() {
        assert_eq!(collapse_blank_lines("\n\n# header\n\n\n", true), "# header\n\n");
        assert_eq!(collapse_blank_lines("\n  \n\n  ", false), "\n  ");
        assert_eq!(collapse_blank_lines("", true), "");
    }

    #[test]
    fn canonical_format_keeps_heredocs() {
        let text = "resource \"fake_resource\" \"this\" {\n  script = <<EOT\nline1\n\n\n\nline2\n    \nEOT\n}\n";
        let body = parse_write(text, "main.tf").unwrap();
        assert_eq!(canonical_format(&body), text);
    }

    #[test]
    fn block_source_renders_a_single_block() {
        let body = parse_write(SOURCE, "main.tf").unwrap();
        let Some(Structure::Block(block)) = body.get(1) else {
            panic!("expected a block");
        };
        assert_eq!(block_source(block).trim(), r#"data "fake_data" "that" {}"#);
    }

    #[test]
    fn crlf_line_endings() {
        assert!(uses_crlf("a = 1\r\nb = 2\r\n"));
        assert!(!uses_crlf("a = 1\nb = 2\n"));
        assert_eq!(restore_crlf("a = 1\r\nb = <<EOT\nx\nEOT\n"), "a = 1\r\nb = <<EOT\r\nx\r\nEOT\r\n");
    }
}
