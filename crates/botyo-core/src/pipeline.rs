//! Ordered filter chain applied to every inbound message.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;

use crate::{
    chat::Message,
    module::{FilterModule, ModuleContext, Runtime},
};

/// How one traversal of the chain ended.
#[derive(Debug)]
pub enum PassOutcome {
    /// Every enabled filter ran; carries the final message.
    Completed(Message),
    /// A filter returned no message.
    Dropped { by: String },
    /// A filter failed or panicked; later filters did not run.
    Aborted { by: String, error: anyhow::Error },
}

impl PassOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PassOutcome::Completed(_))
    }
}

pub struct FilterPipeline {
    rt: Arc<Runtime>,
    filters: Vec<Arc<dyn FilterModule>>,
}

impl FilterPipeline {
    pub fn new(rt: Arc<Runtime>, filters: Vec<Arc<dyn FilterModule>>) -> Self {
        Self { rt, filters }
    }

    pub fn filter_names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Run `msg` through the chain. Independent calls may overlap; each
    /// traversal owns its message.
    pub async fn pass(&self, msg: Message) -> PassOutcome {
        let thread = msg.thread_id.clone();
        let sender = msg.sender_id.clone();
        let mut current = msg;

        for filter in &self.filters {
            // enablement follows the context of the inbound message
            if !self
                .rt
                .resolver
                .is_enabled(filter.name(), &thread, Some(&sender))
            {
                continue;
            }

            let ctx = ModuleContext::new(self.rt.clone(), filter.name());
            let result = AssertUnwindSafe(filter.filter(&ctx, current))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(anyhow::anyhow!("filter panicked")));

            match result {
                Ok(Some(next)) => current = next,
                Ok(None) => {
                    tracing::debug!(filter = %filter.name(), thread = %thread, "message dropped");
                    return PassOutcome::Dropped {
                        by: filter.name().to_string(),
                    };
                }
                Err(error) => {
                    tracing::error!(
                        filter = %filter.name(),
                        thread = %thread,
                        "filter chain broke due to an error: {error:#}"
                    );
                    return PassOutcome::Aborted {
                        by: filter.name().to_string(),
                        error,
                    };
                }
            }
        }

        PassOutcome::Completed(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{runtime, FakeChat, FilterBehavior, RecordingFilter};
    use serde_json::json;
    use std::sync::Mutex;

    fn chain(
        config: serde_json::Value,
        steps: &[(&str, FilterBehavior)],
    ) -> (FilterPipeline, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let filters = steps
            .iter()
            .map(|(name, behavior)| {
                Arc::new(RecordingFilter::new(name, behavior.clone(), log.clone()))
                    as Arc<dyn FilterModule>
            })
            .collect();
        let rt = runtime(config, vec![], Arc::new(FakeChat::new()));
        (FilterPipeline::new(rt, filters), log)
    }

    #[tokio::test]
    async fn drop_stops_the_chain() {
        let (pipeline, log) = chain(
            json!({}),
            &[
                ("A", FilterBehavior::Pass),
                ("B", FilterBehavior::Drop),
                ("C", FilterBehavior::Pass),
            ],
        );

        let outcome = pipeline.pass(Message::new("1", "2", "hi")).await;
        assert!(!outcome.is_completed());
        assert!(matches!(outcome, PassOutcome::Dropped { by } if by == "B"));
        assert_eq!(*log.lock().unwrap(), ["A", "B"]);
    }

    #[tokio::test]
    async fn error_and_panic_abort_without_propagating() {
        for behavior in [FilterBehavior::Fail, FilterBehavior::Panic] {
            let (pipeline, log) = chain(
                json!({}),
                &[
                    ("A", behavior),
                    ("B", FilterBehavior::Pass),
                    ("C", FilterBehavior::Pass),
                ],
            );

            let outcome = pipeline.pass(Message::new("1", "2", "hi")).await;
            assert!(matches!(outcome, PassOutcome::Aborted { ref by, .. } if by == "A"));
            assert_eq!(*log.lock().unwrap(), ["A"]);

            // next message gets a fresh traversal
            log.lock().unwrap().clear();
            let _ = pipeline.pass(Message::new("1", "2", "again")).await;
            assert_eq!(*log.lock().unwrap(), ["A"]);
        }
    }

    #[tokio::test]
    async fn rewrites_flow_downstream_and_disabled_filters_are_skipped() {
        let (pipeline, log) = chain(
            json!({
                "chatThreads": {"1": {"participants": {"2": {"overrides": {"modules": {"Upper": {"enable": false}}}}}}},
            }),
            &[
                ("Rewrite", FilterBehavior::Rewrite("changed".into())),
                ("Upper", FilterBehavior::Drop),
                ("Last", FilterBehavior::Pass),
            ],
        );

        let outcome = pipeline.pass(Message::new("1", "2", "original")).await;
        assert!(outcome.is_completed());
        match outcome {
            PassOutcome::Completed(msg) => assert_eq!(msg.body, "changed"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(*log.lock().unwrap(), ["Rewrite", "Last"]);

        // a different sender still sees the filter
        let outcome = pipeline.pass(Message::new("1", "3", "original")).await;
        assert!(matches!(outcome, PassOutcome::Dropped { by } if by == "Upper"));
    }
}
