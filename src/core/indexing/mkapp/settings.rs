//! Tree settings, fixed for a tree's lifetime.

use serde::{Deserialize, Serialize};

use crate::core::common::{MkAppError, MkAppResult};

/// Read-only parameters of an [`MkAppTree`](super::MkAppTree).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MkAppSettings {
    /// Largest k for which the stored distance models are meaningful.
    pub k_max: usize,
    /// Degree of the fitted polynomials; must stay below `k_max`.
    pub degree: usize,
    /// Fit and evaluate the models in log-log space.
    pub log_space: bool,
    /// Run the full structural check after every batch insertion.
    pub integrity_checks: bool,
}

impl MkAppSettings {
    /// Starts building settings.
    #[must_use]
    pub fn builder() -> MkAppSettingsBuilder {
        MkAppSettingsBuilder::default()
    }
}

/// Builder for [`MkAppSettings`]; `k_max` and `degree` are required.
#[derive(Debug, Clone, Default)]
pub struct MkAppSettingsBuilder {
    k_max: Option<usize>,
    degree: Option<usize>,
    log_space: bool,
    integrity_checks: bool,
}

impl MkAppSettingsBuilder {
    /// Sets the largest supported query parameter k.
    #[must_use]
    pub fn k_max(mut self, k_max: usize) -> Self {
        self.k_max = Some(k_max);
        self
    }

    /// Sets the polynomial degree of the distance models.
    #[must_use]
    pub fn degree(mut self, degree: usize) -> Self {
        self.degree = Some(degree);
        self
    }

    /// Fits and evaluates the models in log-log space.
    #[must_use]
    pub fn log_space(mut self, log_space: bool) -> Self {
        self.log_space = log_space;
        self
    }

    /// Enables the expensive structural check after each batch.
    #[must_use]
    pub fn integrity_checks(mut self, enabled: bool) -> Self {
        self.integrity_checks = enabled;
        self
    }

    /// Validates and builds the settings.
    pub fn build(self) -> MkAppResult<MkAppSettings> {
        let k_max = self
            .k_max
            .ok_or_else(|| MkAppError::TreeLogic("k_max is required".into()))?;
        let degree = self
            .degree
            .ok_or_else(|| MkAppError::TreeLogic("polynomial degree is required".into()))?;
        if k_max < 1 {
            return Err(MkAppError::TreeLogic("k_max must be at least 1".into()));
        }
        if degree >= k_max {
            return Err(MkAppError::TreeLogic(format!(
                "polynomial degree {degree} must be below k_max {k_max}"
            )));
        }
        Ok(MkAppSettings {
            k_max,
            degree,
            log_space: self.log_space,
            integrity_checks: self.integrity_checks,
        })
    }
}
