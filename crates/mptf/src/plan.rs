//! plan computation and application
use crate::config::Config;
use crate::module::SaveError;
use crate::transform::{ApplyError, DecodeErrors, Registry, Transform};

#[derive(thiserror::Error, Debug)]
pub enum PlanError {
    #[error("unable to apply {transform}")]
    Apply {
        transform: String,
        #[source]
        source: ApplyError,
    },
    #[error("unable to save module")]
    Save(#[from] SaveError),
}

/// Decoded transforms that have something to edit, in declaration order
#[derive(Debug)]
pub struct Plan<'c> {
    config: &'c Config,
    transforms: Vec<Box<dyn Transform>>,
}

impl<'c> Plan<'c> {
    pub fn compute(config: &'c Config) -> Result<Self, DecodeErrors> {
        Self::compute_with(config, &Registry::default())
    }

    pub fn compute_with(config: &'c Config, registry: &Registry) -> Result<Self, DecodeErrors> {
        let transforms = registry
            .decode_all(config)?
            .into_iter()
            .filter(|transform| {
                let resolved = transform.resolve(config.module());
                if !resolved {
                    tracing::debug!(transform=%transform.id(), "dropping transform without target");
                }
                resolved
            })
            .collect();

        Ok(Self { config, transforms })
    }

    pub fn transforms(&self) -> &[Box<dyn Transform>] {
        &self.transforms
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Applies every transform once, in order, then saves the module
    ///
    /// Stops at the first failing transform. Nothing is rolled back.
    pub fn apply(self) -> Result<(), PlanError> {
        if self.is_empty() {
            return Ok(());
        }

        let module = self.config.module();
        for transform in &self.transforms {
            tracing::info!(transform=%transform.id(), "applying");
            transform
                .apply(module)
                .map_err(|source| PlanError::Apply {
                    transform: transform.id(),
                    source,
                })?;
        }

        module.save_to_disk()?;
        Ok(())
    }
}

impl std::fmt::Display for Plan<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return writeln!(f, "No transforms to apply.");
        }

        writeln!(f, "Plan: {} transform(s)", self.len())?;
        for transform in &self.transforms {
            writeln!(f, "  {} -> {}", transform.id(), transform.target())?;
        }
        Ok(())
    }
}
