//! Dependency Validator - pure read + check over registered definitions
//!
//! Confirms that declared prerequisites resolve and that the forward SQL
//! payload is present. Performs no execution and has no side effects.

use serde::Serialize;

use crate::error::EngineResult;
use crate::repository::Store;

/// Validation outcome for one migration id
#[derive(Debug, Clone, Serialize)]
pub struct MigrationValidation {
    pub migration_id: String,
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Validation outcome across all requested ids
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    /// Logical AND across all per-migration results
    pub valid: bool,
    pub results: Vec<MigrationValidation>,
}

#[derive(Clone)]
pub struct DependencyValidator {
    store: Store,
}

impl DependencyValidator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn validate(&self, migration_ids: &[String]) -> EngineResult<ValidationReport> {
        let mut results = Vec::with_capacity(migration_ids.len());
        for migration_id in migration_ids {
            let mut errors = Vec::new();
            match self.store.definitions.get(migration_id).await? {
                None => errors.push("Migration not found".to_string()),
                Some(definition) => {
                    for dependency in &definition.dependencies {
                        if !self.store.definitions.exists(dependency).await? {
                            errors.push(format!("Dependency not found: {}", dependency));
                        }
                    }
                    if definition.up_sql.trim().is_empty() {
                        errors.push("UP SQL is required".to_string());
                    }
                }
            }
            results.push(MigrationValidation {
                migration_id: migration_id.clone(),
                valid: errors.is_empty(),
                errors,
            });
        }
        Ok(ValidationReport {
            valid: results.iter().all(|r| r.valid),
            results,
        })
    }
}
