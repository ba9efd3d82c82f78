//! Driving the external verifier and recording its verdict on the type.
use crate::{
    dex::AccessFlags,
    error::LinkError,
    linker::ClassLinker,
    types::{Class, ClassStatus},
    utils::sync::Arc,
    vm::{sync::ObjectLock, FailureKind},
};
use tracing::{debug, error, trace, warn};

impl ClassLinker {
    /// Verifies `class`, its superclass and the default-method interfaces it
    /// implements. A hard failure makes the type erroneous and is returned
    /// as a `VerifyError`.
    pub fn verify_class(&self, class: &Arc<Class>) -> Result<FailureKind, LinkError> {
        let lock = ObjectLock::new(class.monitor(), &self.metrics);

        if class.is_verified() {
            if class.status() == ClassStatus::Verified {
                mark_skip_access_checks(class);
            }
            return Ok(FailureKind::NoFailure);
        }
        if class.status() == ClassStatus::VerifiedNeedsAccessChecks {
            if !self.config.aot_compiler {
                class.set_status(ClassStatus::Verified);
                self.update_entry_points(class);
            }
            return Ok(FailureKind::AccessChecksFailure);
        }
        if class.is_erroneous() {
            return Err(self.earlier_failure(class));
        }
        if class.status() == ClassStatus::Verifying {
            // Reentrant call from this thread's own verification.
            return Ok(FailureKind::NoFailure);
        }
        debug_assert!(
            class.status() == ClassStatus::Resolved
                || class.status() == ClassStatus::RetryVerificationAtRuntime,
            "verifying {} in status {}",
            class.descriptor(),
            class.status()
        );
        class.set_status(ClassStatus::Verifying);

        if !self.config.verification_enabled {
            class.set_status(ClassStatus::Verified);
            mark_skip_access_checks(class);
            self.update_entry_points(class);
            return Ok(FailureKind::NoFailure);
        }

        if let Some(super_class) = class.super_class() {
            if !super_class.is_verified() {
                if let Err(cause) = self.verify_class(&super_class) {
                    let error = LinkError::Verify {
                        message: format!(
                            "Rejecting class {} that attempts to sub-type erroneous class {}",
                            class.pretty_descriptor(),
                            super_class.pretty_descriptor()
                        ),
                        cause: Some(Box::new(cause)),
                    };
                    warn!(descriptor = class.descriptor(), %error, "verification failed");
                    class.set_erroneous(&error);
                    return Err(error);
                }
            }
        }

        for entry in class.iftable().entries() {
            let interface = &entry.interface;
            if !interface.has_default_methods() || interface.is_verified() {
                continue;
            }
            if let Err(cause) = self.verify_class(interface) {
                let error = LinkError::Verify {
                    message: format!(
                        "Rejecting class {} that attempts to implement interface {} that failed verification",
                        class.pretty_descriptor(),
                        interface.pretty_descriptor()
                    ),
                    cause: Some(Box::new(cause)),
                };
                warn!(descriptor = class.descriptor(), %error, "verification failed");
                class.set_erroneous(&error);
                return Err(error);
            }
        }

        let outcome = self.verifier().verify(class);
        trace!(descriptor = class.descriptor(), kind = ?outcome.kind, "verifier verdict");
        match outcome.kind {
            FailureKind::HardFailure => {
                let message = outcome.message.unwrap_or_else(|| {
                    format!("Verification of {} failed", class.pretty_descriptor())
                });
                let error = LinkError::verify(message);
                error!(descriptor = class.descriptor(), %error, "verification failed");
                class.set_erroneous(&error);
                return Err(error);
            }
            FailureKind::NoFailure => {
                class.set_status(ClassStatus::Verified);
                mark_skip_access_checks(class);
            }
            FailureKind::AccessChecksFailure if self.config.aot_compiler => {
                class.set_status(ClassStatus::VerifiedNeedsAccessChecks);
            }
            FailureKind::SoftFailure | FailureKind::TypeChecksFailure
                if self.config.aot_compiler =>
            {
                class.set_status(ClassStatus::RetryVerificationAtRuntime);
            }
            FailureKind::SoftFailure
            | FailureKind::TypeChecksFailure
            | FailureKind::AccessChecksFailure => {
                class.set_status(ClassStatus::Verified);
                class.add_access_flags(AccessFlags::VERIFICATION_ATTEMPTED);
            }
        }
        self.update_entry_points(class);
        drop(lock);
        debug!(descriptor = class.descriptor(), status = %class.status(), "verified");
        Ok(outcome.kind)
    }
}

/// Lets the interpreter skip access checks in every method of a type that
/// passed verification cleanly.
fn mark_skip_access_checks(class: &Class) {
    let linkage = class.linkage();
    for method in linkage
        .direct_methods
        .iter()
        .chain(linkage.virtual_methods.iter())
    {
        if !method.is_native() && !method.is_abstract() {
            method.add_access_flags(AccessFlags::SKIP_ACCESS_CHECKS);
        }
    }
}
