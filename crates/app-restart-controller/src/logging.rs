//! Facilities for reporting Kubernetes controller outcomes
//!
//! The primary entry point is [`report_controller_reconciled`].

use std::error::Error;

use kube::{
    Resource,
    core::DynamicObject,
    runtime::{
        controller::{self, Action},
        reflector::ObjectRef,
    },
};

/// [`Error`] extensions that help report reconciliation errors
///
/// This should be implemented for reconciler error types.
pub trait ReconcilerError: Error {
    /// `PascalCase`d name for the error category
    ///
    /// This can typically be implemented by delegating to [`strum::EnumDiscriminants`] and
    /// [`strum::IntoStaticStr`].
    fn category(&self) -> &'static str;

    /// A reference to a secondary object providing additional context, if any
    ///
    /// This should be [`Some`] if the error happens while acting on an object other than the
    /// one the reconciliation was invoked for, such as a Deployment consuming a ConfigMap.
    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        None
    }
}

/// Reports the controller reconciliation result to the current [`tracing::Subscriber`].
pub fn report_controller_reconciled<K, ReconcileErr, QueueErr>(
    controller_name: &str,
    result: &Result<(ObjectRef<K>, Action), controller::Error<ReconcileErr, QueueErr>>,
) where
    K: Resource,
    ReconcileErr: ReconcilerError + 'static,
    QueueErr: std::error::Error + 'static,
{
    match result {
        Ok((obj, _)) => {
            tracing::info!(
                controller.name = controller_name,
                object = %obj,
                "Reconciled object"
            );
        }
        Err(err) => report_controller_error(controller_name, err),
    }
}

fn report_controller_error<ReconcileErr, QueueErr>(
    controller_name: &str,
    error: &controller::Error<ReconcileErr, QueueErr>,
) where
    ReconcileErr: ReconcilerError + 'static,
    QueueErr: std::error::Error + 'static,
{
    match error {
        controller::Error::ReconcilerFailed(reconcile_error, obj) => {
            let secondary_object = reconcile_error.secondary_object();
            tracing::error!(
                controller.name = controller_name,
                object = %obj,
                error.category = reconcile_error.category(),
                secondary_object = secondary_object.as_ref().map(tracing::field::display),
                error = reconcile_error as &dyn std::error::Error,
                "Failed to reconcile object",
            );
        }
        _ => {
            tracing::error!(
                controller.name = controller_name,
                error = error as &dyn std::error::Error,
                "Failed to reconcile object",
            );
        }
    }
}
