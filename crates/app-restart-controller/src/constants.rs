//! Well-known keys and names written or read by the controller.

/// The Pod template annotation `kubectl.kubernetes.io/restartedAt`. A changed
/// value makes the Deployment controller roll out new replicas, which is the
/// same mechanism `kubectl rollout restart` uses.
pub const RESTARTED_AT_ANNOTATION_KEY: &str = "kubectl.kubernetes.io/restartedAt";

/// The Deployment label a user sets to request an immediate restart.
pub const RESTART_LABEL_KEY: &str = "restart";

/// The only value of [`RESTART_LABEL_KEY`] that counts as an opt-in. The
/// comparison is exact and case-sensitive.
pub const RESTART_LABEL_VALUE: &str = "true";

/// The label selector used to narrow the Deployment watch in label mode.
pub const RESTART_LABEL_SELECTOR: &str = "restart=true";

/// The name this controller reports itself as, in logs and as field manager.
pub const CONTROLLER_NAME: &str = "app-restart-controller";

/// The default address the metrics endpoint binds to.
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:8080";
