// ABOUTME: Diagnostics accumulator for non-fatal warnings raised during convergence.
// ABOUTME: Collects warnings that shouldn't fail an operation but should be surfaced to the caller.

/// Collects non-fatal warnings during an operation.
#[derive(Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!(kind = ?warning.kind, "{}", warning.message);
        self.warnings.push(warning);
    }

    /// Get all collected warnings.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Check if any warnings were collected.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// A non-fatal warning collected during an operation.
#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn orphan_left(service: &str) -> Self {
        Self::new(
            WarningKind::OrphanLeft,
            format!("orphaned service container '{service}' left in place (pass --remove-orphans to remove it)"),
        )
    }

    pub fn unknown_extension(kind_name: &str) -> Self {
        Self::new(
            WarningKind::UnknownExtension,
            format!("unrecognized extension block kind '{kind_name}', ignoring"),
        )
    }

    pub fn image_pull_downgraded(image: &str, message: impl Into<String>) -> Self {
        Self::new(
            WarningKind::ImagePullDowngraded,
            format!("pull failed for {image}, falling back to build: {}", message.into()),
        )
    }

    pub fn ambiguous_resource_removed_all(resource: &str) -> Self {
        Self::new(
            WarningKind::AmbiguousResourceRemovedAll,
            format!("multiple matches for resource '{resource}', removed all"),
        )
    }

    pub fn network_create_failed(name: &str, message: impl Into<String>) -> Self {
        Self::new(
            WarningKind::NetworkCreateFailed,
            format!("failed to create network '{name}': {}", message.into()),
        )
    }

    pub fn network_in_use(name: &str) -> Self {
        Self::new(WarningKind::NetworkInUse, format!("network '{name}' still in use, not removed"))
    }

    pub fn network_remove_failed(name: &str, message: impl Into<String>) -> Self {
        Self::new(
            WarningKind::NetworkRemoveFailed,
            format!("failed to remove network '{name}': {}", message.into()),
        )
    }

    pub fn volume_remove_failed(name: &str, message: impl Into<String>) -> Self {
        Self::new(
            WarningKind::VolumeRemoveFailed,
            format!("failed to remove volume '{name}': {}", message.into()),
        )
    }

    pub fn resource_remove_failed(name: &str, message: impl Into<String>) -> Self {
        Self::new(
            WarningKind::ResourceRemoveFailed,
            format!("failed to remove config/secret '{name}': {}", message.into()),
        )
    }

    pub fn recreate_aborted(service: &str, message: impl Into<String>) -> Self {
        Self::new(
            WarningKind::RecreateAborted,
            format!("recreate aborted for service '{service}', both old and new containers remain: {}", message.into()),
        )
    }
}

/// Categories of warnings that can occur during an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    OrphanLeft,
    UnknownExtension,
    ImagePullDowngraded,
    AmbiguousResourceRemovedAll,
    NetworkCreateFailed,
    NetworkInUse,
    NetworkRemoveFailed,
    VolumeRemoveFailed,
    ResourceRemoveFailed,
    RecreateAborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_starts_empty() {
        let diag = Diagnostics::default();
        assert!(!diag.has_warnings());
        assert!(diag.warnings().is_empty());
    }

    #[test]
    fn diagnostics_collects_warnings() {
        let mut diag = Diagnostics::default();

        diag.warn(Warning::orphan_left("legacy"));
        diag.warn(Warning::network_in_use("demo_default"));

        assert!(diag.has_warnings());
        assert_eq!(diag.warnings().len(), 2);
    }

    #[test]
    fn warning_constructors_set_correct_kind() {
        let warning = Warning::orphan_left("legacy");
        assert_eq!(warning.kind, WarningKind::OrphanLeft);

        let warning = Warning::unknown_extension("x-develop");
        assert_eq!(warning.kind, WarningKind::UnknownExtension);
    }
}
