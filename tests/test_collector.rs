
use fixtures::*;

use std::cell::Cell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use win_eventlog::err::ERROR_ACCESS_DENIED;
use win_eventlog::{
    CollectorSettings, EventLogApi, EventLogCollector, EventLogError, FieldValue, FormatKind,
    MEASUREMENT, NativeError, ProjectedRecord, Pull, ReplayEventLog, SizedCallError,
    SubscriptionTarget,
};

/// A replayed event log that fails on demand.
struct FlakyEventLog {
    inner: Rc<ReplayEventLog>,
    failing_subscribes: Cell<usize>,
    failing_pulls: Cell<usize>,
    failing_render: Cell<Option<u64>>,
    subscribe_calls: Cell<usize>,
}

impl FlakyEventLog {
    fn new(inner: Rc<ReplayEventLog>) -> Self {
        FlakyEventLog {
            inner,
            failing_subscribes: Cell::new(0),
            failing_pulls: Cell::new(0),
            failing_render: Cell::new(None),
            subscribe_calls: Cell::new(0),
        }
    }

    fn take(counter: &Cell<usize>) -> bool {
        let n = counter.get();
        if n > 0 {
            counter.set(n - 1);
        }
        n > 0
    }
}

impl EventLogApi for FlakyEventLog {
    type Handle = u64;

    fn subscribe(&self, target: &SubscriptionTarget) -> Result<u64, NativeError> {
        self.subscribe_calls.set(self.subscribe_calls.get() + 1);
        if Self::take(&self.failing_subscribes) {
            return Err(NativeError::new("EvtSubscribe", ERROR_ACCESS_DENIED));
        }
        self.inner.subscribe(target)
    }

    fn next_batch(&self, subscription: u64, max: usize) -> Result<Pull<u64>, NativeError> {
        if Self::take(&self.failing_pulls) {
            return Err(NativeError::new("EvtNext", 1726));
        }
        self.inner.next_batch(subscription, max)
    }

    fn render_xml(&self, event: u64, buf: &mut [u8]) -> Result<usize, SizedCallError> {
        if self.failing_render.get() == Some(event) {
            return Err(NativeError::new("EvtRender", 15005).into());
        }
        self.inner.render_xml(event, buf)
    }

    fn open_publisher_metadata(&self, publisher: &str, locale: u32) -> Result<u64, NativeError> {
        self.inner.open_publisher_metadata(publisher, locale)
    }

    fn format_message(
        &self,
        publisher: u64,
        event: u64,
        kind: FormatKind,
        buf: &mut [u8],
    ) -> Result<usize, SizedCallError> {
        self.inner.format_message(publisher, event, kind, buf)
    }

    fn close(&self, handle: u64) -> Result<(), NativeError> {
        self.inner.close(handle)
    }
}

fn replay(path: std::path::PathBuf) -> Rc<ReplayEventLog> {
    Rc::new(ReplayEventLog::from_path(path).unwrap())
}

fn gather<A: EventLogApi>(
    collector: &mut EventLogCollector<A>,
) -> win_eventlog::Result<Vec<ProjectedRecord>> {
    let mut records = Vec::new();
    collector.gather(&mut records)?;
    Ok(records)
}

#[test]
fn test_exhausted_on_first_pull_emits_nothing() {
    ensure_env_logger_initialized();
    let mut collector =
        EventLogCollector::new(ReplayEventLog::new(), &application_settings()).unwrap();

    let mut records: Vec<ProjectedRecord> = Vec::new();
    assert_eq!(collector.gather(&mut records).unwrap(), 0);

    assert!(records.is_empty());
    assert!(collector.is_subscribed());
}

#[test]
fn test_replays_application_capture() {
    ensure_env_logger_initialized();
    let mut collector = EventLogCollector::new(
        ReplayEventLog::from_path(application_capture()).unwrap(),
        &application_settings(),
    )
    .unwrap();

    let records = gather(&mut collector).unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.name == MEASUREMENT));

    let crash = record_with_id(&records, 77);
    assert_eq!(crash.tags["Source"], "Application Error");
    assert_eq!(crash.tags["EventID"], "1000");
    assert_eq!(crash.tags["Level"], "2");
    assert_eq!(crash.tags["Channel"], "Application");
    assert_eq!(crash.fields["Data"], FieldValue::from("app.exe"));
    assert_eq!(crash.fields["Data_2"], FieldValue::from("1.0.0.0"));
    assert_eq!(crash.fields["Data_3"], FieldValue::from("ntdll.dll"));
    assert_eq!(crash.fields["Binary"], FieldValue::from("00000000"));
    assert_eq!(
        crash.fields["description"],
        FieldValue::from("app.exe|1.0.0.0|ntdll.dll|00000000")
    );
    assert_eq!(crash.fields["Task"], FieldValue::Int(100));
    // Listed in `exclude_empty` by default.
    assert!(!crash.fields.contains_key("Opcode"));
    assert!(!crash.fields.contains_key("ActivityID"));
    assert!(!crash.fields.contains_key("UserID"));
    assert_eq!(
        crash.timestamp,
        "2023-03-14T09:26:53.1234567Z"
            .parse::<jiff::Timestamp>()
            .unwrap()
    );

    // Forwarded events carry their own text.
    let install = record_with_id(&records, 78);
    assert_eq!(install.tags["LevelText"], "Information");
    assert_eq!(install.tags["Keywords"], "Classic");
    assert_eq!(
        install.fields["Message"],
        FieldValue::from("Product: Contoso Agent -- Installation completed successfully.")
    );
    assert_eq!(
        install.fields["UserID"],
        FieldValue::from("S-1-5-21-1004336348-1177238915-682003330-500")
    );

    // The event with a broken level is emitted with what could be decoded.
    let broken = records
        .iter()
        .find(|r| r.tags.get("Source").map(String::as_str) == Some("Broken"))
        .unwrap();
    assert_eq!(broken.tags["EventID"], "1");
    assert_eq!(broken.tags["Channel"], "");
}

#[test]
fn test_level_glob_selects_tags() {
    ensure_env_logger_initialized();
    let settings = application_settings().event_tags(&["Level*"]);
    let mut collector = EventLogCollector::new(
        ReplayEventLog::from_path(application_capture()).unwrap(),
        &settings,
    )
    .unwrap();

    let records = gather(&mut collector).unwrap();
    let install = record_with_id(&records, 78);

    assert_eq!(install.tags.len(), 2);
    assert_eq!(install.tags["Level"], "4");
    assert_eq!(install.tags["LevelText"], "Information");
    assert_eq!(install.fields["EventID"], FieldValue::Int(11707));
    assert_eq!(install.fields["Source"], FieldValue::from("MsiInstaller"));
    assert!(!install.fields.contains_key("Level"));
}

#[test]
fn test_unrolls_named_event_data_and_user_data() {
    ensure_env_logger_initialized();
    let settings = CollectorSettings::new()
        .eventlog_name("Security")
        .exclude_fields(&["Data_IpAddress"]);
    let mut collector = EventLogCollector::new(
        ReplayEventLog::from_path(security_capture()).unwrap(),
        &settings,
    )
    .unwrap();

    let records = gather(&mut collector).unwrap();
    assert_eq!(records.len(), 2);

    let logon = record_with_id(&records, 12345);
    assert_eq!(logon.fields["Data_TargetUserName"], FieldValue::from("SYSTEM"));
    assert_eq!(logon.fields["Data_LogonType"], FieldValue::from("5"));
    assert!(!logon.fields.contains_key("Data_IpAddress"));
    assert_eq!(
        logon.fields["ActivityID"],
        FieldValue::from("{0D7A0A4C-5F3B-0001-A40A-7A0D3B5FD901}")
    );
    assert_eq!(
        logon.fields["description"],
        FieldValue::from("S-1-5-18|WIN-SRV$|SYSTEM|5|-")
    );

    let cleared = record_with_id(&records, 12346);
    assert_eq!(
        cleared.fields["LogFileCleared_SubjectUserName"],
        FieldValue::from("alice")
    );
    assert_eq!(
        cleared.fields["LogFileCleared_SubjectDomainName"],
        FieldValue::from("CONTOSO")
    );
    assert!(!cleared.fields.contains_key("LogFileCleared_xmlns"));
}

#[test]
fn test_user_data_can_be_skipped() {
    ensure_env_logger_initialized();
    let settings = CollectorSettings::new()
        .eventlog_name("Security")
        .process_userdata(false);
    let mut collector = EventLogCollector::new(
        ReplayEventLog::from_path(security_capture()).unwrap(),
        &settings,
    )
    .unwrap();

    let records = gather(&mut collector).unwrap();
    let cleared = record_with_id(&records, 12346);

    assert!(
        cleared
            .fields
            .keys()
            .all(|name| !name.starts_with("LogFileCleared"))
    );
}

#[test]
fn test_subscription_failure_is_retried_next_cycle() {
    ensure_env_logger_initialized();
    let log = replay(application_capture());
    let api = FlakyEventLog::new(log.clone());
    api.failing_subscribes.set(1);
    let mut collector = EventLogCollector::new(api, &application_settings()).unwrap();

    let err = gather(&mut collector).unwrap_err();
    assert!(matches!(err, EventLogError::Subscribe { .. }), "{err}");
    assert!(!collector.is_subscribed());
    assert_eq!(log.pending(), 3);

    assert_eq!(gather(&mut collector).unwrap().len(), 3);
    assert!(collector.is_subscribed());
    assert_eq!(collector.api().subscribe_calls.get(), 2);
}

#[test]
fn test_pull_error_aborts_cycle() {
    ensure_env_logger_initialized();
    let log = replay(application_capture());
    let api = FlakyEventLog::new(log.clone());
    api.failing_pulls.set(1);
    let mut collector = EventLogCollector::new(api, &application_settings()).unwrap();

    let err = gather(&mut collector).unwrap_err();
    assert!(matches!(err, EventLogError::Native(NativeError { code: 1726, .. })));

    // The subscription is kept, the next cycle picks the events up.
    assert!(collector.is_subscribed());
    assert_eq!(gather(&mut collector).unwrap().len(), 3);
    assert_eq!(collector.api().subscribe_calls.get(), 1);
}

#[test]
fn test_render_failure_skips_only_that_event() {
    ensure_env_logger_initialized();
    let log = replay(application_capture());
    let api = FlakyEventLog::new(log.clone());
    // Handle 1 is the subscription, events are numbered from 2.
    api.failing_render.set(Some(2));
    let mut collector = EventLogCollector::new(api, &application_settings()).unwrap();

    let records = gather(&mut collector).unwrap();

    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.tags["Source"] != "Application Error"));
    assert_eq!(log.open_handles(), 1);
}

#[test]
fn test_every_handle_is_released() {
    ensure_env_logger_initialized();
    let log = replay(application_capture());
    for i in 0..7 {
        log.push(format!(
            "<Event><System><Provider Name='Extra'/><EventID>{i}</EventID><EventRecordID>{}</EventRecordID></System></Event>",
            1000 + i
        ));
    }
    let mut collector =
        EventLogCollector::new(FlakyEventLog::new(log.clone()), &application_settings())
            .unwrap();

    assert_eq!(gather(&mut collector).unwrap().len(), 10);
    assert_eq!(log.open_handles(), 1);

    drop(collector);
    assert_eq!(log.open_handles(), 0);
}

#[test]
fn test_events_arriving_between_cycles() {
    ensure_env_logger_initialized();
    let log = replay(security_capture());
    let mut collector =
        EventLogCollector::new(FlakyEventLog::new(log.clone()), &application_settings())
            .unwrap();

    assert_eq!(gather(&mut collector).unwrap().len(), 2);
    assert_eq!(gather(&mut collector).unwrap().len(), 0);

    log.push("<Event><System><Provider Name='Late'/><EventID>7</EventID></System></Event>");
    let records = gather(&mut collector).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tags["Source"], "Late");
}

#[test]
fn test_invalid_settings_are_fatal() {
    let res = EventLogCollector::new(ReplayEventLog::new(), &CollectorSettings::new());
    assert!(matches!(res, Err(EventLogError::InvalidSettings { .. })));

    let res = EventLogCollector::new(
        ReplayEventLog::new(),
        &application_settings().separator(""),
    );
    assert!(matches!(res, Err(EventLogError::InvalidSettings { .. })));
}
