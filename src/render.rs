use log::{debug, trace};

use crate::CollectorSettings;
use crate::api::{EventLogApi, FormatKind, OwnedHandle};
use crate::buffered_call::invoke_with_growth;
use crate::err::{EventLogError, Result};
use crate::event::{Event, PartialEvent};
use crate::unroll::description_from_event_data;
use crate::utils::utf16::{decode_utf16le_bytes_z, decode_utf16le_multi_sz};
use crate::utils::{first_line, single_line};

/// Initial size of the XML render buffer.
pub const RENDER_BUFFER_SIZE: usize = 1 << 14;
/// Initial size of the message formatting buffer.
pub const MESSAGE_BUFFER_SIZE: usize = 1 << 10;

/// How far rendering of one event got.
#[derive(Debug)]
pub enum RenderedEvent {
    /// The XML could only be decoded up to `error`.
    Partial { event: Event, error: EventLogError },
    /// The XML was decoded, but the publisher's metadata could not be opened.
    Decoded(Event),
    /// Text fields were resolved from the publisher's metadata. Individual fields may still be
    /// empty if formatting them failed.
    TextResolved(Event),
}

impl RenderedEvent {
    pub fn event(&self) -> &Event {
        match self {
            RenderedEvent::Partial { event, .. }
            | RenderedEvent::Decoded(event)
            | RenderedEvent::TextResolved(event) => event,
        }
    }

    pub fn into_event(self) -> Event {
        match self {
            RenderedEvent::Partial { event, .. }
            | RenderedEvent::Decoded(event)
            | RenderedEvent::TextResolved(event) => event,
        }
    }

    pub fn is_text_resolved(&self) -> bool {
        matches!(self, RenderedEvent::TextResolved(_))
    }
}

/// Turns event handles into [`Event`]s.
///
/// Owns the buffers used by the native calls; they grow to fit the largest event seen and are
/// reused afterwards.
#[derive(Debug)]
pub struct EventRenderer {
    locale: u32,
    only_first_line_of_message: bool,
    describe_event_data: bool,
    xml_buf: Vec<u8>,
    message_buf: Vec<u8>,
}

impl EventRenderer {
    pub fn new(settings: &CollectorSettings) -> Self {
        EventRenderer {
            locale: settings.get_locale(),
            only_first_line_of_message: settings.should_keep_only_first_line_of_message(),
            describe_event_data: settings.should_process_eventdata(),
            xml_buf: vec![0; RENDER_BUFFER_SIZE],
            message_buf: vec![0; MESSAGE_BUFFER_SIZE],
        }
    }

    /// Current capacity of the XML render buffer.
    pub fn render_buffer_len(&self) -> usize {
        self.xml_buf.len()
    }

    /// Render the XML of `handle`.
    pub fn render_xml<A: EventLogApi + ?Sized>(
        &mut self,
        api: &A,
        handle: A::Handle,
    ) -> Result<String> {
        let used = invoke_with_growth("EvtRender", &mut self.xml_buf, |buf| {
            api.render_xml(handle, buf)
        })?;

        decode_utf16le_bytes_z(&self.xml_buf[..used]).map_err(|e| EventLogError::Utf16 {
            message: e.as_str(),
        })
    }

    /// Render, decode and resolve the text of one event.
    ///
    /// Only a failure to render the XML is an error; later steps degrade to a less complete
    /// [`RenderedEvent`].
    pub fn render<A: EventLogApi + ?Sized>(
        &mut self,
        api: &A,
        handle: A::Handle,
    ) -> Result<RenderedEvent> {
        let xml = self.render_xml(api, handle)?;
        trace!("rendered event {:?}: {}", handle, xml);

        let mut event = match Event::from_xml(&xml) {
            Ok(event) => event,
            Err(PartialEvent { mut event, error }) => {
                debug!("event {:?} was only partially decoded: {}", handle, error);
                self.finish(&mut event);
                return Ok(RenderedEvent::Partial { event, error });
            }
        };

        if event.source.is_empty() {
            self.finish(&mut event);
            return Ok(RenderedEvent::Decoded(event));
        }

        let publisher = match api.open_publisher_metadata(&event.source, self.locale) {
            Ok(publisher) => OwnedHandle::new(api, publisher),
            Err(e) => {
                if e.is_access_denied() {
                    debug!("access denied to publisher metadata of `{}`", event.source);
                } else {
                    debug!("no publisher metadata for `{}`: {}", event.source, e);
                }
                self.finish(&mut event);
                return Ok(RenderedEvent::Decoded(event));
            }
        };

        for kind in [
            FormatKind::Keyword,
            FormatKind::Event,
            FormatKind::Level,
            FormatKind::Task,
            FormatKind::Opcode,
        ] {
            match self.format(api, publisher.get(), handle, kind) {
                Ok(text) => match kind {
                    FormatKind::Keyword => event.keywords = text,
                    FormatKind::Event => event.message = text,
                    FormatKind::Level => event.level_text = text,
                    FormatKind::Task => event.task_text = text,
                    FormatKind::Opcode => event.opcode_text = text,
                },
                Err(e) => debug!(
                    "failed to format {} of `{}` event {}: {}",
                    kind.as_str(),
                    event.source,
                    event.event_id,
                    e
                ),
            }
        }

        self.finish(&mut event);
        Ok(RenderedEvent::TextResolved(event))
    }

    fn format<A: EventLogApi + ?Sized>(
        &mut self,
        api: &A,
        publisher: A::Handle,
        event: A::Handle,
        kind: FormatKind,
    ) -> Result<String> {
        let used = invoke_with_growth("EvtFormatMessage", &mut self.message_buf, |buf| {
            api.format_message(publisher, event, kind, buf)
        })?;
        let bytes = &self.message_buf[..used];
        let utf16_err = |e: crate::utils::utf16::Utf16LeDecodeError| EventLogError::Utf16 {
            message: e.as_str(),
        };

        match kind {
            FormatKind::Keyword => Ok(decode_utf16le_multi_sz(bytes)
                .map_err(utf16_err)?
                .join(",")),
            FormatKind::Event => decode_utf16le_bytes_z(bytes).map_err(utf16_err),
            _ => Ok(single_line(&decode_utf16le_bytes_z(bytes).map_err(utf16_err)?)),
        }
    }

    /// Normalize the message and derive the description.
    fn finish(&self, event: &mut Event) {
        let message = if self.only_first_line_of_message {
            first_line(&event.message)
        } else {
            event.message.as_str()
        };
        event.message = single_line(message);

        if let (true, Some(data)) = (self.describe_event_data, &event.event_data) {
            event.description = description_from_event_data(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Pull, SubscriptionTarget};
    use crate::err::{ERROR_ACCESS_DENIED, NativeError, SizedCallError};
    use crate::replay::{PublisherText, ReplayEventLog};
    use pretty_assertions::assert_eq;

    const SERVICE_EVENT: &str = r#"<Event xmlns="http://schemas.microsoft.com/win/2004/08/events/event"><System><Provider Name="Service Control Manager"/><EventID Qualifiers="16384">7036</EventID><Version>0</Version><Level>4</Level><Task>0</Task><Opcode>0</Opcode><Keywords>0x8080000000000000</Keywords><TimeCreated SystemTime="2023-03-14T09:26:53.1234567Z"/><EventRecordID>512</EventRecordID><Execution ProcessID="700" ThreadID="5100"/><Channel>System</Channel><Computer>WIN-SRV</Computer></System><EventData><Data Name="param1">Windows Update</Data><Data Name="param2">running</Data></EventData></Event>"#;

    fn scm_text() -> PublisherText {
        PublisherText {
            message: "The Windows Update service entered the running state.\r\nSecond line.".to_string(),
            level: "Information".to_string(),
            task: String::new(),
            opcode: "Info".to_string(),
            keywords: vec!["Classic".to_string(), "Audit Success".to_string()],
        }
    }

    fn pull_one(log: &ReplayEventLog) -> u64 {
        let sub = log
            .subscribe(&SubscriptionTarget::Channel("System".to_string()))
            .unwrap();
        match log.next_batch(sub, 1).unwrap() {
            Pull::Events(handles) => handles[0],
            Pull::Exhausted => panic!("expected an event"),
        }
    }

    /// Replays events but refuses access to every publisher's metadata.
    struct DeniedPublishers<'a>(&'a ReplayEventLog);

    impl EventLogApi for DeniedPublishers<'_> {
        type Handle = u64;

        fn subscribe(&self, target: &SubscriptionTarget) -> std::result::Result<u64, NativeError> {
            self.0.subscribe(target)
        }

        fn next_batch(
            &self,
            subscription: u64,
            max: usize,
        ) -> std::result::Result<Pull<u64>, NativeError> {
            self.0.next_batch(subscription, max)
        }

        fn render_xml(&self, event: u64, buf: &mut [u8]) -> std::result::Result<usize, SizedCallError> {
            self.0.render_xml(event, buf)
        }

        fn open_publisher_metadata(
            &self,
            _publisher: &str,
            _locale: u32,
        ) -> std::result::Result<u64, NativeError> {
            Err(NativeError::new("EvtOpenPublisherMetadata", ERROR_ACCESS_DENIED))
        }

        fn format_message(
            &self,
            publisher: u64,
            event: u64,
            kind: FormatKind,
            buf: &mut [u8],
        ) -> std::result::Result<usize, SizedCallError> {
            self.0.format_message(publisher, event, kind, buf)
        }

        fn close(&self, handle: u64) -> std::result::Result<(), NativeError> {
            self.0.close(handle)
        }
    }

    fn renderer() -> EventRenderer {
        EventRenderer::new(&CollectorSettings::new().eventlog_name("System"))
    }

    #[test]
    fn test_missing_publisher_leaves_text_empty() {
        let log = ReplayEventLog::from_documents([SERVICE_EVENT]);
        let handle = pull_one(&log);

        let rendered = renderer().render(&log, handle).unwrap();

        assert!(matches!(rendered, RenderedEvent::Decoded(_)));
        let event = rendered.into_event();
        assert_eq!(event.event_id, 7036);
        assert_eq!(event.message, "");
        assert_eq!(event.level_text, "");
        assert_eq!(event.description, "Windows Update|running");
    }

    #[test]
    fn test_denied_publisher_still_decodes() {
        let log = ReplayEventLog::from_documents([SERVICE_EVENT])
            .with_publisher("Service Control Manager", scm_text());
        let handle = pull_one(&log);

        let rendered = renderer().render(&DeniedPublishers(&log), handle).unwrap();

        assert!(matches!(rendered, RenderedEvent::Decoded(_)));
        let event = rendered.into_event();
        assert_eq!(event.source, "Service Control Manager");
        assert_eq!(event.event_id, 7036);
        assert_eq!(event.computer, "WIN-SRV");
        assert_eq!(event.message, "");
        assert_eq!(event.description, "Windows Update|running");
        assert_eq!(log.open_handles(), 2);
    }

    #[test]
    fn test_text_is_resolved_from_publisher() {
        let log = ReplayEventLog::from_documents([SERVICE_EVENT])
            .with_publisher("Service Control Manager", scm_text());
        let handle = pull_one(&log);

        let rendered = renderer().render(&log, handle).unwrap();

        assert!(rendered.is_text_resolved());
        let event = rendered.event();
        assert_eq!(
            event.message,
            "The Windows Update service entered the running state."
        );
        assert_eq!(event.level_text, "Information");
        assert_eq!(event.opcode_text, "Info");
        assert_eq!(event.keywords, "Classic,Audit Success");
        // Formatting the task failed, the field keeps its decoded value.
        assert_eq!(event.task_text, "");
        // The publisher handle was released, only the subscription and the event remain.
        assert_eq!(log.open_handles(), 2);
    }

    #[test]
    fn test_full_message_is_collapsed() {
        let log = ReplayEventLog::from_documents([SERVICE_EVENT])
            .with_publisher("Service Control Manager", scm_text());
        let handle = pull_one(&log);
        let mut renderer = EventRenderer::new(
            &CollectorSettings::new()
                .eventlog_name("System")
                .only_first_line_of_message(false),
        );

        let event = renderer.render(&log, handle).unwrap().into_event();

        assert_eq!(
            event.message,
            "The Windows Update service entered the running state.|Second line."
        );
    }

    #[test]
    fn test_description_requires_event_data_processing() {
        let log = ReplayEventLog::from_documents([SERVICE_EVENT]);
        let handle = pull_one(&log);
        let mut renderer = EventRenderer::new(
            &CollectorSettings::new()
                .eventlog_name("System")
                .process_eventdata(false),
        );

        let event = renderer.render(&log, handle).unwrap().into_event();

        assert_eq!(event.description, "");
        assert!(event.event_data.is_some());
    }

    #[test]
    fn test_large_event_grows_buffer() {
        let payload = "A".repeat(RENDER_BUFFER_SIZE);
        let xml = SERVICE_EVENT.replace("Windows Update", &payload);
        let log = ReplayEventLog::from_documents([xml]);
        let handle = pull_one(&log);
        let mut renderer = renderer();

        let event = renderer.render(&log, handle).unwrap().into_event();

        assert!(renderer.render_buffer_len() > RENDER_BUFFER_SIZE);
        assert!(event.description.starts_with(&payload));
    }

    #[test]
    fn test_partial_event_is_still_rendered() {
        let xml = SERVICE_EVENT.replace("<Level>4</Level>", "<Level>four</Level>");
        let log = ReplayEventLog::from_documents([xml]);
        let handle = pull_one(&log);

        let rendered = renderer().render(&log, handle).unwrap();

        match rendered {
            RenderedEvent::Partial { event, .. } => {
                assert_eq!(event.source, "Service Control Manager");
                assert_eq!(event.event_id, 7036);
                assert_eq!(event.event_record_id, 0);
            }
            other => panic!("expected a partial event, got {other:?}"),
        }
    }

    #[test]
    fn test_render_of_closed_handle_fails() {
        let log = ReplayEventLog::from_documents([SERVICE_EVENT]);
        let handle = pull_one(&log);
        log.close(handle).unwrap();

        assert!(renderer().render(&log, handle).is_err());
    }
}
