// ABOUTME: Diagnostics accumulator for non-fatal warnings during plan and apply.
// ABOUTME: Collects warnings that shouldn't fail a run but should be shown to users.

/// Collects non-fatal warnings.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!("{}", warning.message);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// A non-fatal warning.
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

    pub fn lock_broken(message: impl Into<String>) -> Self {
        Self::new(WarningKind::LockBroken, message)
    }

    pub fn lock_release(message: impl Into<String>) -> Self {
        Self::new(WarningKind::LockRelease, message)
    }

    pub fn hook(message: impl Into<String>) -> Self {
        Self::new(WarningKind::Hook, message)
    }

    pub fn drift(message: impl Into<String>) -> Self {
        Self::new(WarningKind::Drift, message)
    }

    pub fn snapshot_save(message: impl Into<String>) -> Self {
        Self::new(WarningKind::SnapshotSave, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// A stale or forced apply lock was broken.
    LockBroken,
    /// Failed to release the apply lock (lock file may remain).
    LockRelease,
    /// A post-apply or on-error hook failed.
    Hook,
    /// A recorded resource is missing from the runtime.
    Drift,
    /// The final snapshot write after an apply failed.
    SnapshotSave,
}
