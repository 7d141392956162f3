//! Well-known label, annotation and finalizer keys.

/// Label stamped on ReplicaSets and their pods with the template hash.
pub const POD_TEMPLATE_HASH: &str = "pod-template-hash";

/// Label carrying a StatefulSet pod's ordinal.
pub const STATEFULSET_POD_ORDINAL: &str = "statefulset.kubernetes.io/pod-ordinal";

/// Label tying a Job's pods back to their Job.
pub const JOB_NAME: &str = "job-name";

/// Label tying a CronJob's Jobs back to their CronJob.
pub const CRONJOB_NAME: &str = "cronjob-name";

/// Template annotation written by `rollout restart`.
pub const RESTARTED_AT: &str = "kubectl.kubernetes.io/restartedAt";

/// Annotation recording the replica count before a ScaleToZero fault.
pub const PRE_FAULT_REPLICAS: &str = "k3sim.io/pre-fault-replicas";

/// Taint added by `cordon`.
pub const UNSCHEDULABLE_TAINT: &str = "node.kubernetes.io/unschedulable";
