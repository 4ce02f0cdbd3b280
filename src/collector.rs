use log::{debug, error, info, trace, warn};

use crate::api::{EventLogApi, OwnedHandle, Pull, SubscriptionTarget};
use crate::err::{EventLogError, Result};
use crate::projection::{Accumulator, RecordProjector};
use crate::render::{EventRenderer, RenderedEvent};
use crate::settings::CollectorSettings;

/// Number of event handles requested per pull.
pub const EVENT_BATCH_SIZE: usize = 5;

/// One configured event log input.
///
/// The subscription is created on the first [`gather`](EventLogCollector::gather) and kept for
/// the lifetime of the collector. Each call drains the events that arrived since the previous one.
pub struct EventLogCollector<A: EventLogApi> {
    api: A,
    target: SubscriptionTarget,
    subscription: Option<A::Handle>,
    renderer: EventRenderer,
    projector: RecordProjector,
}

impl<A: EventLogApi> EventLogCollector<A> {
    pub fn new(api: A, settings: &CollectorSettings) -> Result<Self> {
        settings.validate()?;
        let target = settings
            .target()
            .ok_or_else(|| EventLogError::InvalidSettings {
                message: "no subscription target".to_string(),
            })?;

        Ok(EventLogCollector {
            api,
            target,
            subscription: None,
            renderer: EventRenderer::new(settings),
            projector: RecordProjector::new(settings),
        })
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn target(&self) -> &SubscriptionTarget {
        &self.target
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn renderer(&self) -> &EventRenderer {
        &self.renderer
    }

    fn subscription(&mut self) -> Result<A::Handle> {
        if let Some(handle) = self.subscription {
            return Ok(handle);
        }

        let handle = self
            .api
            .subscribe(&self.target)
            .map_err(|source| EventLogError::Subscribe {
                target: self.target.to_string(),
                source,
            })?;
        info!("subscribed to `{}`", self.target);
        debug!("subscription handle: {:?}", handle);

        self.subscription = Some(handle);
        Ok(handle)
    }

    /// Drain the subscription into `acc`, returning how many records were added.
    ///
    /// Events that fail to render are logged and skipped. A failure to subscribe or to pull
    /// ends the cycle with an error; a failed subscription is retried on the next call.
    pub fn gather(&mut self, acc: &mut dyn Accumulator) -> Result<usize> {
        let subscription = self.subscription()?;
        let mut emitted = 0;

        loop {
            let handles = match self.api.next_batch(subscription, EVENT_BATCH_SIZE) {
                Ok(Pull::Events(handles)) => handles,
                Ok(Pull::Exhausted) => {
                    trace!("no more events");
                    break;
                }
                Err(e) => {
                    error!("error getting events: {}", e);
                    return Err(e.into());
                }
            };

            if handles.is_empty() {
                break;
            }
            emitted += self.process_batch(handles, acc);
        }

        Ok(emitted)
    }

    fn process_batch(&mut self, handles: Vec<A::Handle>, acc: &mut dyn Accumulator) -> usize {
        let api = &self.api;
        let handles: Vec<OwnedHandle<'_, A>> = handles
            .into_iter()
            .map(|h| OwnedHandle::new(api, h))
            .collect();

        let mut emitted = 0;
        for handle in handles.iter().filter(|h| !h.is_null()) {
            let rendered = match self.renderer.render(api, handle.get()) {
                Ok(rendered) => rendered,
                Err(e) => {
                    warn!("failed to render event {:?}: {}", handle.get(), e);
                    continue;
                }
            };

            if let RenderedEvent::Partial { error, .. } = &rendered {
                debug!("emitting partially decoded event: {}", error);
            }

            let record = self.projector.project(rendered.event());
            acc.add_fields(&record.name, record.fields, record.tags, record.timestamp);
            emitted += 1;
        }

        for handle in handles {
            if let Err(e) = handle.close() {
                warn!("failed to release event handle: {}", e);
            }
        }

        emitted
    }
}

impl<A: EventLogApi> Drop for EventLogCollector<A> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            if let Err(e) = self.api.close(subscription) {
                warn!("failed to close subscription to `{}`: {}", self.target, e);
            }
        }
    }
}
