// Sequential enrichment loop: one event at a time, selector -> invoker -> merger -> sink

use crate::config::{EnrichmentConfig, WriteBack};
use crate::event::{merge, Event};
use crate::feed::{self, FeedSource};
use crate::modules::{
    select_modules, AllowList, Catalog, EnrichmentRequest, EnrichmentResponse, ModuleInvoker,
};
use crate::sink::EventSink;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Everything enrichment decisions depend on, built once at startup
#[derive(Debug, Clone)]
pub struct EnrichmentContext {
    pub catalog: Arc<Catalog>,
    pub allow_list: AllowList,
    pub module_config: HashMap<String, serde_json::Value>,
    pub write_back: WriteBack,
    /// Bytes stripped from each feed message before JSON decoding
    pub prefix_len: usize,
}

impl EnrichmentContext {
    pub fn new(catalog: Catalog, enrichment: &EnrichmentConfig, prefix_len: usize) -> Self {
        Self {
            catalog: Arc::new(catalog),
            allow_list: enrichment.enabled.clone(),
            module_config: enrichment.config.clone(),
            write_back: enrichment.write_back,
            prefix_len,
        }
    }
}

/// Loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for the next feed message
    Idle,
    /// Running an event through its modules
    Processing,
}

/// Outcome of one event's processing cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub event_id: String,
    pub attributes_seen: usize,
    pub invocations: usize,
    pub invocation_failures: usize,
    pub module_errors: usize,
    pub attributes_added: usize,
    pub updates: usize,
    pub update_failures: usize,
}

/// Counters across the life of the loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub messages: u64,
    pub dropped: u64,
    pub feed_errors: u64,
    pub events: u64,
    pub invocations: u64,
    pub invocation_failures: u64,
    pub module_errors: u64,
    pub attributes_added: u64,
    pub updates: u64,
    pub update_failures: u64,
}

impl LoopStats {
    fn record(&mut self, report: &CycleReport) {
        self.events += 1;
        self.invocations += report.invocations as u64;
        self.invocation_failures += report.invocation_failures as u64;
        self.module_errors += report.module_errors as u64;
        self.attributes_added += report.attributes_added as u64;
        self.updates += report.updates as u64;
        self.update_failures += report.update_failures as u64;
    }
}

/// Drives events from the feed through enrichment and back to the sink
pub struct Orchestrator {
    context: EnrichmentContext,
    invoker: Arc<dyn ModuleInvoker>,
    sink: Arc<dyn EventSink>,
    state: LoopState,
    stats: LoopStats,
}

impl Orchestrator {
    pub fn new(
        context: EnrichmentContext,
        invoker: Arc<dyn ModuleInvoker>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            context,
            invoker,
            sink,
            state: LoopState::Idle,
            stats: LoopStats::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Consume the feed until shutdown is signalled or the feed closes.
    ///
    /// Shutdown is only observed while idle; an event already being processed
    /// runs to completion first.
    pub async fn run<F>(&mut self, feed: &mut F, mut shutdown: watch::Receiver<bool>) -> LoopStats
    where
        F: FeedSource + ?Sized,
    {
        tracing::info!(
            modules = self.context.catalog.len(),
            write_back = ?self.context.write_back,
            "Enrichment loop started"
        );

        loop {
            self.state = LoopState::Idle;

            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    // A dropped sender can never signal again; treat it as shutdown
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                received = feed.recv() => received,
            };

            match received {
                Ok(Some(raw)) => {
                    self.handle_message(&raw).await;
                }
                Ok(None) => {
                    tracing::info!("Feed closed");
                    break;
                }
                Err(e) => {
                    self.stats.feed_errors += 1;
                    tracing::warn!("Feed receive failed: {}", e);
                }
            }
        }

        self.state = LoopState::Idle;
        tracing::info!(
            "Enrichment loop stopped: {} messages, {} dropped, {} events, \
             {} attributes added, {} updates ({} failed)",
            self.stats.messages,
            self.stats.dropped,
            self.stats.events,
            self.stats.attributes_added,
            self.stats.updates,
            self.stats.update_failures
        );

        self.stats.clone()
    }

    /// Decode and process one raw feed message. Returns `None` when the
    /// message was dropped as undecodable.
    pub async fn handle_message(&mut self, raw: &[u8]) -> Option<CycleReport> {
        self.stats.messages += 1;
        tracing::info!("Received a message ({} bytes)", raw.len());

        let mut event = match feed::decode_message(raw, self.context.prefix_len) {
            Ok(event) => event,
            Err(e) => {
                self.stats.dropped += 1;
                tracing::warn!("Dropping message: {}", e);
                return None;
            }
        };

        self.state = LoopState::Processing;
        let report = self.process_event(&mut event).await;
        self.state = LoopState::Idle;

        self.stats.record(&report);
        Some(report)
    }

    /// Run every attribute of the event through its eligible modules
    pub async fn process_event(&self, event: &mut Event) -> CycleReport {
        let mut report = CycleReport {
            event_id: event.id.clone(),
            ..CycleReport::default()
        };

        // Only attributes present on arrival are enriched, not ones added below
        let targets: Vec<(String, String)> = event
            .attributes
            .iter()
            .map(|a| (a.attr_type.clone(), a.value.clone()))
            .collect();
        report.attributes_seen = targets.len();

        tracing::debug!(event_id = %event.id, attributes = targets.len(), "Processing event");

        for (attr_type, value) in &targets {
            let modules =
                select_modules(attr_type, &self.context.catalog, &self.context.allow_list);
            if modules.is_empty() {
                tracing::trace!(event_id = %event.id, attribute_type = %attr_type, "No modules");
                continue;
            }

            for module in modules {
                let request = EnrichmentRequest {
                    module: &module.name,
                    attribute_type: attr_type,
                    attribute_value: value,
                    config: self.context.module_config.get(&module.name),
                };

                report.invocations += 1;
                let added = match self.invoker.invoke(&request).await {
                    Ok(EnrichmentResponse::Results(groups)) => merge(event, &groups),
                    Ok(EnrichmentResponse::ModuleError(message)) => {
                        report.module_errors += 1;
                        tracing::warn!(
                            event_id = %event.id,
                            module = %module.name,
                            attribute_type = %attr_type,
                            "Module reported an error: {}",
                            message
                        );
                        continue;
                    }
                    Err(e) => {
                        report.invocation_failures += 1;
                        tracing::warn!(
                            event_id = %event.id,
                            module = %module.name,
                            attribute_type = %attr_type,
                            transport = e.is_invocation_failure(),
                            "Module invocation failed: {}",
                            e
                        );
                        continue;
                    }
                };

                tracing::debug!(
                    event_id = %event.id,
                    module = %module.name,
                    "Module added {} attributes",
                    added
                );
                report.attributes_added += added;

                if self.context.write_back == WriteBack::PerModule && added > 0 {
                    self.write_back(event, &mut report).await;
                }
            }
        }

        if self.context.write_back == WriteBack::PerEvent && report.attributes_added > 0 {
            self.write_back(event, &mut report).await;
        }

        tracing::info!(
            event_id = %report.event_id,
            invocations = report.invocations,
            added = report.attributes_added,
            failures = report.invocation_failures + report.module_errors,
            "Event processed"
        );

        report
    }

    async fn write_back(&self, event: &Event, report: &mut CycleReport) {
        match self.sink.persist(event).await {
            Ok(()) => report.updates += 1,
            Err(e) => {
                report.update_failures += 1;
                tracing::error!(event_id = %event.id, "Failed to update event: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GlueError, Result};
    use crate::event::Attribute;
    use crate::modules::{ModuleAttributes, ModuleDescriptor, ModuleMeta, ResultGroup};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedInvoker {
        responses: HashMap<String, Result<EnrichmentResponse>>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ModuleInvoker for ScriptedInvoker {
        async fn invoke(&self, request: &EnrichmentRequest<'_>) -> Result<EnrichmentResponse> {
            self.calls.lock().unwrap().push(request.module.to_string());
            match self.responses.get(request.module) {
                Some(Ok(response)) => Ok(response.clone()),
                Some(Err(_)) | None => Err(GlueError::HttpStatus {
                    status: 500,
                    context: request.module.to_string(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct CountingSink {
        sizes: Mutex<Vec<usize>>,
        uuids: Mutex<Vec<Vec<Option<String>>>>,
    }

    #[async_trait]
    impl EventSink for CountingSink {
        async fn persist(&self, event: &Event) -> Result<()> {
            self.sizes.lock().unwrap().push(event.attributes.len());
            self.uuids
                .lock()
                .unwrap()
                .push(event.attributes.iter().map(|a| a.uuid.clone()).collect());
            Ok(())
        }
    }

    fn module(name: &str) -> ModuleDescriptor {
        ModuleDescriptor {
            name: name.to_string(),
            kind: None,
            meta: ModuleMeta {
                module_type: vec!["expansion".to_string()],
                description: None,
            },
            attributes: ModuleAttributes {
                input: vec!["ip-dst".to_string()],
                output: vec!["text".to_string()],
            },
        }
    }

    fn results(value: &str) -> Result<EnrichmentResponse> {
        Ok(EnrichmentResponse::Results(vec![ResultGroup {
            types: vec!["text".to_string()],
            values: vec![value.to_string()],
        }]))
    }

    fn orchestrator(
        write_back: WriteBack,
        responses: Vec<(&str, Result<EnrichmentResponse>)>,
    ) -> (Orchestrator, Arc<ScriptedInvoker>, Arc<CountingSink>) {
        let catalog = Catalog::new(vec![module("A"), module("B"), module("C")]);
        let context = EnrichmentContext {
            catalog: Arc::new(catalog),
            allow_list: AllowList::All,
            module_config: HashMap::new(),
            write_back,
            prefix_len: 10,
        };
        let invoker = Arc::new(ScriptedInvoker {
            responses: responses
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            calls: Mutex::new(Vec::new()),
        });
        let sink = Arc::new(CountingSink::default());
        let orchestrator = Orchestrator::new(context, invoker.clone(), sink.clone());
        (orchestrator, invoker, sink)
    }

    fn event() -> Event {
        let mut event = Event::new("9");
        event.attributes.push(Attribute::new("ip-dst", "1.2.3.4"));
        event
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_siblings() {
        let (orchestrator, invoker, sink) = orchestrator(
            WriteBack::PerEvent,
            vec![
                ("A", Ok(EnrichmentResponse::ModuleError("rate limited".to_string()))),
                ("C", results("from-c")),
            ],
        );
        let mut event = event();

        let report = orchestrator.process_event(&mut event).await;

        assert_eq!(*invoker.calls.lock().unwrap(), vec!["A", "B", "C"]);
        assert_eq!(report.invocations, 3);
        assert_eq!(report.module_errors, 1);
        assert_eq!(report.invocation_failures, 1);
        assert_eq!(report.attributes_added, 1);
        assert_eq!(event.attributes[1].attr_type, "text");
        assert_eq!(event.attributes[1].value, "from-c");
        assert_eq!(*sink.sizes.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_per_module_write_back() {
        let (orchestrator, _, sink) = orchestrator(
            WriteBack::PerModule,
            vec![("A", results("a")), ("B", results("b")), ("C", results("c"))],
        );
        let mut event = event();

        let report = orchestrator.process_event(&mut event).await;

        assert_eq!(report.updates, 3);
        assert_eq!(*sink.sizes.lock().unwrap(), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_per_module_updates_resend_the_same_uuids() {
        let (orchestrator, _, sink) = orchestrator(
            WriteBack::PerModule,
            vec![("A", results("a")), ("B", results("b"))],
        );
        let mut event = event();

        orchestrator.process_event(&mut event).await;

        let payloads = sink.uuids.lock().unwrap().clone();
        assert_eq!(payloads.len(), 2);
        let (first, second) = (&payloads[0], &payloads[1]);

        // the original attribute came without a uuid; everything merged has one
        assert_eq!(first[0], None);
        assert!(first[1].is_some());
        assert!(second[2].is_some());
        // the attribute added by A is resent under the uuid of the first update
        assert_eq!(second[1], first[1]);
        assert_ne!(second[2], second[1]);
    }

    #[tokio::test]
    async fn test_no_update_when_nothing_added() {
        let (orchestrator, _, sink) = orchestrator(
            WriteBack::PerEvent,
            vec![("A", Ok(EnrichmentResponse::Results(vec![])))],
        );
        let mut event = event();

        let report = orchestrator.process_event(&mut event).await;

        assert_eq!(report.updates, 0);
        assert!(sink.sizes.lock().unwrap().is_empty());
        assert_eq!(event.attributes.len(), 1);
    }

    #[tokio::test]
    async fn test_added_attributes_are_not_re_enriched() {
        let (orchestrator, invoker, _) = orchestrator(
            WriteBack::PerEvent,
            vec![(
                "A",
                Ok(EnrichmentResponse::Results(vec![ResultGroup {
                    types: vec!["ip-dst".to_string()],
                    values: vec!["9.9.9.9".to_string()],
                }])),
            )],
        );
        let mut event = event();

        orchestrator.process_event(&mut event).await;

        assert_eq!(invoker.calls.lock().unwrap().len(), 3);
        assert_eq!(event.attributes.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_message_is_dropped() {
        let (mut orchestrator, invoker, sink) = orchestrator(WriteBack::PerEvent, vec![]);

        let report = orchestrator.handle_message(b"misp_json {not json").await;

        assert!(report.is_none());
        assert_eq!(orchestrator.state(), LoopState::Idle);
        assert_eq!(orchestrator.stats().dropped, 1);
        assert!(invoker.calls.lock().unwrap().is_empty());
        assert!(sink.sizes.lock().unwrap().is_empty());
    }
}
