//! # mptf - meta-programming for terraform
//!
//! `mptf` edits terraform configuration with transforms that are themselves written in HCL.
//!
//! ## Introduction for developers
//!
//! Read this to understand how `mptf` works internally.
//!
//! ### HCL Terms
//!
//! In hcl terms...
//! - a file gets parsed as a `body`
//! - ...which is just a list of `structures`
//! - ...where there are two kinds:
//!   - `attribute`: a "key = value" pair
//!   - or `block`:
//!     - 1 `identifier`
//!     - followed by 0 or more `labels`
//!     - and a `body` enclosed in `{` and `}`
//!
//! A block is addressed by joining identifier and labels with `.`: `resource "azurerm_subnet" "this" {}` is
//! `resource.azurerm_subnet.this`.
//!
//! ### Loading a module
//!
//! see [module::Module::load]
//!
//! Every `.tf` file of a directory is parsed twice ([syntax]):
//! - the read tree is immutable and holds [hcl::Expression]s and source ranges. It is used for evaluation.
//! - the write tree ([hcl_edit::structure::Body]) keeps comments and formatting. It is the only thing that gets
//!   modified and written back.
//!
//! `resource`, `data` and `module` blocks become [block::RootBlock]s, pairing both trees. Which directories are
//! modules is decided by [resolver::module_refs] (`.terraform/modules/modules.json`).
//!
//! ### Meta-programming sources
//!
//! `*.mptf.hcl` files are loaded into [mptf_documents::MptfDocuments]. A [config::Config] binds them to one
//! module and evaluates `variable`, `locals` and `data` blocks:
//!
//! ```hcl
//! data "resource" "subnets" {
//!   resource_type = "azurerm_subnet"
//! }
//!
//! transform "update_in_place" "subnets" {
//!   for_each             = data.resource.subnets.result.azurerm_subnet
//!   target_block_address = each.value.mptf.block_address
//!   asraw {
//!     tags = var.tags
//!   }
//! }
//! ```
//!
//! ### Evaluation
//!
//! We use [hcl::eval] to evaluate expressions. The [hcl::eval::Context] provides
//!
//! | **variable** | **content**                                              |
//! |--------------|----------------------------------------------------------|
//! | `var`        | variables                                                |
//! | `local`      | locals                                                   |
//! | `data`       | data source results                                      |
//! | `tf`         | every root block of the module, keyed by address         |
//! | `each`       | `key` and `value` while decoding a `for_each` transform  |
//!
//! Attributes of terraform blocks are exposed as their source text, they are never evaluated.
//!
//! ### Plan and apply
//!
//! [plan::Plan::compute] decodes every `transform` block through the [transform::Registry] and drops
//! transforms with nothing to edit. [plan::Plan::apply] runs each transform once, in order, and saves the module.
//!
//! Callers wrap this with [backup]: back up the module directories first, [backup::reset] on failure,
//! [backup::commit_folder] on success.
//!
pub mod backup;
pub mod block;
pub mod config;
pub mod fs;
pub mod module;
pub mod mptf_documents;
pub mod plan;
pub mod resolver;
pub mod syntax;
pub mod transform;
pub mod value;
