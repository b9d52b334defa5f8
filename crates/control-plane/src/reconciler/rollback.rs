use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use crate::cluster::{ClusterApi, ClusterResult, ObjectKind};
use crate::telemetry::ROLLBACK_STEPS;

type UndoFn = Box<dyn FnOnce() -> BoxFuture<'static, ClusterResult<()>> + Send>;

/// Ordered compensating actions for a multi-object create.
///
/// Steps are pushed as objects are created and run newest-first by [`UndoStack::unwind`].
/// [`UndoStack::discard`] drops them unrun once the whole create has succeeded.
#[derive(Default)]
pub struct UndoStack {
    steps: Vec<(String, UndoFn)>,
}

impl fmt::Debug for UndoStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.steps.iter().map(|(what, _)| what)).finish()
    }
}

impl UndoStack {
    pub fn new() -> Self { Self::default() }

    pub fn push<F>(&mut self, what: impl Into<String>, undo: F)
    where
        F: FnOnce() -> BoxFuture<'static, ClusterResult<()>> + Send + 'static,
    {
        self.steps.push((what.into(), Box::new(undo)));
    }

    /// Compensate a created object by marking it for deletion.
    pub fn push_mark(&mut self, cluster: Arc<dyn ClusterApi>, kind: ObjectKind, namespace: &str, name: &str) {
        let (ns, n) = (namespace.to_string(), name.to_string());
        self.push(format!("mark {kind} {namespace}/{name}"), move || {
            Box::pin(async move { cluster.mark_for_deletion(kind, &ns, &n).await })
        });
    }

    pub fn len(&self) -> usize { self.steps.len() }

    /// Descriptions of the pending steps, oldest first.
    pub fn describe(&self) -> Vec<String> { self.steps.iter().map(|(what, _)| what.clone()).collect() }

    pub fn is_empty(&self) -> bool { self.steps.is_empty() }

    pub fn discard(self) {
        debug!(steps = self.steps.len(), "reconcile.rollback.discarded");
    }

    /// Run every step newest-first. Step failures are logged and counted, never returned.
    /// Returns the number of steps that failed.
    pub async fn unwind(mut self) -> usize {
        let mut failed = 0;
        while let Some((what, undo)) = self.steps.pop() {
            match undo().await {
                Ok(()) => {
                    ROLLBACK_STEPS.with_label_values(&["success"]).inc();
                    debug!(step=%what, "reconcile.rollback.step");
                }
                Err(e) => {
                    failed += 1;
                    ROLLBACK_STEPS.with_label_values(&["error"]).inc();
                    warn!(step=%what, error=%e, "reconcile.rollback.step_failed");
                }
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterError;
    use std::sync::Mutex;

    #[tokio::test]
    async fn unwinds_newest_first_and_survives_failures() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut stack = UndoStack::new();
        for i in 0..3 {
            let order = order.clone();
            stack.push(format!("step {i}"), move || {
                Box::pin(async move {
                    order.lock().unwrap().push(i);
                    if i == 1 { Err(ClusterError::Api("boom".into())) } else { Ok(()) }
                })
            });
        }
        assert_eq!(stack.len(), 3);
        assert_eq!(stack.unwind().await, 1);
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn discard_runs_nothing() {
        let ran = Arc::new(Mutex::new(false));
        let mut stack = UndoStack::new();
        let flag = ran.clone();
        stack.push("never", move || {
            Box::pin(async move {
                *flag.lock().unwrap() = true;
                Ok(())
            })
        });
        stack.discard();
        assert!(!*ran.lock().unwrap());
    }
}
