//! `transform "update_in_place" "<name>"`
//!
//! Patches existing root blocks. The target is matched by exact address, every matching block is patched:
//! - a patch attribute replaces the expression of the attribute with the same name, or is appended
//! - a patch block is merged into the first nested block with the same type and labels, or is appended
//!
//! Everything else in the block stays as written. Replaced expressions are not type checked.
use super::{ApplyError, DecodeError, DecodeInput, Transform};
use crate::module::Module;
use crate::syntax::{self, SnippetError};
use hcl_edit::structure::{Block, Body, Structure};

pub const KIND: &str = "update_in_place";

const RESERVED: [&str; 2] = ["target_block_address", "for_each"];

const INDENT: &str = "  ";

#[derive(Debug)]
pub struct UpdateInPlace {
    name: String,
    pub target_block_address: String,
    /// block whose body holds the patch
    patch: Block,
}

pub fn decode(input: &DecodeInput) -> Result<Box<dyn Transform>, DecodeError> {
    let target_block_address = input.required_string("target_block_address")?;

    let content = input.render_content(&RESERVED)?;
    let text = format!("patch {{\n{}}}\n", syntax::indent(&content, INDENT));
    let patch = syntax::parse_block_snippet(&text).map_err(|source| DecodeError::Generate {
        address: input.address(),
        source,
    })?;

    Ok(Box::new(UpdateInPlace {
        name: input.name.clone(),
        target_block_address,
        patch,
    }))
}

impl Transform for UpdateInPlace {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn target(&self) -> String {
        self.target_block_address.clone()
    }

    fn resolve(&self, module: &Module) -> bool {
        let found = module
            .blocks_by_address(&self.target_block_address)
            .next()
            .is_some();
        if !found {
            tracing::debug!(target=%self.target_block_address, dir=%module.abs_dir.display(), "no matching block");
        }
        found
    }

    fn apply(&self, module: &Module) -> Result<(), ApplyError> {
        for block in module.blocks_by_address(&self.target_block_address) {
            let _guard = block.lock();
            tracing::info!(address=%block.address, file_name=%block.range().file_name, "updating block");

            block
                .write()
                .with_block(|write| merge(&mut write.body, &self.patch.body, 1))
                .ok_or_else(|| ApplyError::MissingBlock(block.address.clone()))??;
        }

        Ok(())
    }
}

fn same_header(a: &Block, b: &Block) -> bool {
    a.ident.value().as_str() == b.ident.value().as_str()
        && a.labels.len() == b.labels.len()
        && a.labels
            .iter()
            .zip(&b.labels)
            .all(|(a, b)| AsRef::<str>::as_ref(a) == AsRef::<str>::as_ref(b))
}

fn append(target: &mut Body, structure: Structure) {
    target.set_prefer_oneline(false);
    target.push(structure);
}

/// Merges `patch` into `target`, `depth` is the nesting level of `target`
fn merge(target: &mut Body, patch: &Body, depth: usize) -> Result<(), SnippetError> {
    let indent = INDENT.repeat(depth);

    for structure in patch.iter() {
        match structure {
            Structure::Attribute(attribute) => {
                let key = attribute.key.value().as_str();
                let source = attribute.value.to_string();
                let replacement =
                    syntax::parse_attribute_snippet(&format!("{indent}{key} = {}\n", source.trim()))?;

                let position = target.iter().position(|existing| {
                    matches!(existing, Structure::Attribute(existing) if existing.key.value().as_str() == key)
                });
                match position {
                    Some(position) => {
                        tracing::trace!(key, "replacing attribute");
                        let mut existing = target.remove(position);
                        if let Structure::Attribute(existing) = &mut existing {
                            existing.value = replacement.value;
                        }
                        target.insert(position, existing);
                    }
                    None => {
                        tracing::trace!(key, "appending attribute");
                        append(target, Structure::Attribute(replacement));
                    }
                }
            }
            Structure::Block(block) => {
                let position = target.iter().position(|existing| {
                    matches!(existing, Structure::Block(existing) if same_header(existing, block))
                });
                match position {
                    Some(position) => {
                        let mut existing = target.remove(position);
                        let merged = match &mut existing {
                            Structure::Block(existing) => {
                                merge(&mut existing.body, &block.body, depth + 1)
                            }
                            Structure::Attribute(_) => Ok(()),
                        };
                        target.insert(position, existing);
                        merged?;
                    }
                    None => {
                        let source = syntax::dedent(&syntax::block_source(block));
                        let text = syntax::indent(&source, &indent);
                        append(target, Structure::Block(syntax::parse_block_snippet(&text)?));
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::test::config_for;
    use crate::mptf_documents;
    use crate::transform::Registry;
    use pretty_assertions::assert_eq;

    const MAIN_TF: &str = r#"resource "fake_resource" "this" {
  # comment stays
  name = "this"

  rule {
    priority = 1
  }
}

resource "fake_resource" "that" {
  name = "that"
}
"#;

    fn apply(documents: crate::mptf_documents::MptfDocuments) -> String {
        let (_, config) = config_for(&[("/cfg/main.tf", MAIN_TF)], documents);
        let transforms = Registry::default().decode_all(&config).unwrap();
        for transform in &transforms {
            assert!(transform.resolve(config.module()));
            transform.apply(config.module()).unwrap();
        }
        config.module().render_file("main.tf").unwrap()
    }

    #[test]
    fn replaces_and_appends_attributes() {
        let text = apply(mptf_documents! {r#"
        transform "update_in_place" "this" {
          target_block_address = "resource.fake_resource.this"
          asstring {
            name = "\"renamed\""
          }
          asraw {
            tags = { env = var.env }
          }
        }
        "#});

        assert!(
            text.starts_with("resource \"fake_resource\" \"this\" {\n  # comment stays\n  name = \"renamed\"\n"),
            "{text}"
        );
        assert!(text.contains("  tags = { env = var.env }\n"), "{text}");
        assert!(
            text.ends_with("resource \"fake_resource\" \"that\" {\n  name = \"that\"\n}\n"),
            "{text}"
        );
    }

    #[test]
    fn merges_nested_blocks() {
        let text = apply(mptf_documents! {r#"
        transform "update_in_place" "this" {
          target_block_address = "resource.fake_resource.this"
          asraw {
            rule {
              priority = 2
              enabled  = true
            }
            lifecycle {
              create_before_destroy = true
            }
          }
        }
        "#});

        let body = syntax::parse_read(&text, "main.tf").unwrap();
        let this = &body.blocks[0].body;
        assert_eq!(this.attributes["name"].source, r#""this""#);

        let rules: Vec<_> = this.blocks.iter().filter(|b| b.ident == "rule").collect();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].body.attributes["priority"].source, "2");
        assert_eq!(rules[0].body.attributes["enabled"].source, "true");

        let lifecycle: Vec<_> = this.blocks.iter().filter(|b| b.ident == "lifecycle").collect();
        assert_eq!(lifecycle.len(), 1);
        assert_eq!(
            lifecycle[0].body.attributes["create_before_destroy"].source,
            "true"
        );

        assert_eq!(body.blocks[1].body.attributes["name"].source, r#""that""#);
    }

    #[test]
    fn literal_values_are_evaluated() {
        let text = apply(mptf_documents! {r#"
        transform "update_in_place" "that" {
          target_block_address = "resource.fake_resource.that"
          name = "${tf["resource.fake_resource.this"].mptf.block_address}-copy"
        }
        "#});

        let body = syntax::parse_read(&text, "main.tf").unwrap();
        assert_eq!(
            body.blocks[1].body.attributes["name"].source,
            r#""resource.fake_resource.this-copy""#
        );
    }

    #[test]
    fn unmatched_target_does_not_resolve() {
        let (_, config) = config_for(
            &[("/cfg/main.tf", MAIN_TF)],
            mptf_documents! {r#"
            transform "update_in_place" "missing" {
              target_block_address = "resource.fake_resource.missing"
            }
            "#},
        );

        let transforms = Registry::default().decode_all(&config).unwrap();
        assert_eq!(transforms[0].target(), "resource.fake_resource.missing");
        assert!(!transforms[0].resolve(config.module()));
    }

    #[test]
    fn target_block_address_is_required() {
        let (_, config) = config_for(
            &[("/cfg/main.tf", MAIN_TF)],
            mptf_documents! {r#"transform "update_in_place" "x" {}"#},
        );

        let errors = Registry::default().decode_all(&config).unwrap_err();
        assert_eq!(
            errors.issues()[0].to_string(),
            "transform.update_in_place.x: target_block_address is required"
        );
    }

    #[test]
    fn concurrent_updates_all_land() {
        let (_, config) = config_for(
            &[("/cfg/main.tf", MAIN_TF)],
            mptf_documents! {r#"
            transform "update_in_place" "this_a" {
              target_block_address = "resource.fake_resource.this"
              a = 1
            }
            transform "update_in_place" "this_b" {
              target_block_address = "resource.fake_resource.this"
              b = 2
            }
            transform "update_in_place" "that_a" {
              target_block_address = "resource.fake_resource.that"
              a = 3
            }
            transform "update_in_place" "that_b" {
              target_block_address = "resource.fake_resource.that"
              b = 4
            }
            "#},
        );
        let transforms = Registry::default().decode_all(&config).unwrap();
        assert_eq!(transforms.len(), 4);

        std::thread::scope(|scope| {
            for transform in &transforms {
                let module = config.module();
                scope.spawn(move || transform.apply(module).unwrap());
            }
        });

        let text = config.module().render_file("main.tf").unwrap();
        let body = syntax::parse_read(&text, "main.tf").unwrap();
        let this = &body.blocks[0].body;
        assert_eq!(this.attributes["name"].source, r#""this""#);
        assert_eq!(this.attributes["a"].source, "1");
        assert_eq!(this.attributes["b"].source, "2");
        assert_eq!(this.blocks.len(), 1);

        let that = &body.blocks[1].body;
        assert_eq!(that.attributes["name"].source, r#""that""#);
        assert_eq!(that.attributes["a"].source, "3");
        assert_eq!(that.attributes["b"].source, "4");
    }

    #[test]
    fn appended_nested_blocks_keep_their_content() {
        let text = apply(mptf_documents! {r#"
        transform "update_in_place" "that" {
          target_block_address = "resource.fake_resource.that"
          asraw {
            timeouts {
              create = "5m"
            }
          }
        }
        "#});

        assert!(
            text.ends_with("  name = \"that\"\n  timeouts {\n    create = \"5m\"\n  }\n}\n"),
            "{text}"
        );
    }
}
