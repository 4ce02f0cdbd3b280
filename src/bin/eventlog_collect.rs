use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use indoc::indoc;
use jiff::Timestamp;
use log::{LevelFilter, debug, info, warn};
use simplelog::{Config, WriteLogger};

use win_eventlog::{
    Accumulator, CollectorSettings, EventLogApi, EventLogCollector, FieldValue, ProjectedRecord,
    ReplayEventLog,
};

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

fn command() -> Command {
    Command::new("eventlog_collect")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Collect Windows event log events as tagged metric records")
        .long_about(indoc!(r#"
            Subscribe to a Windows event log channel (or query) and print every new event
            as a JSON record, one per line.

            Events are pulled every `--interval` seconds. Each record carries the tags and
            fields selected by the `--tag`, `--field`, `--exclude` and `--exclude-empty`
            glob patterns.

            With `--replay`, events are read from an XML capture instead
            (`wevtutil qe <channel> /f:xml`). This works on any platform.
        "#))
        .arg(
            Arg::new("channel")
                .long("channel")
                .short('c')
                .value_name("NAME")
                .help("Channel to subscribe to, e.g. `Application`."),
        )
        .arg(
            Arg::new("query")
                .long("query")
                .short('q')
                .value_name("QUERY")
                .help("XPath or structured <QueryList> query. Takes precedence over `--channel`."),
        )
        .arg(
            Arg::new("locale")
                .long("locale")
                .value_name("LCID")
                .value_parser(value_parser!(u32))
                .default_value("0")
                .help("Locale used to resolve message text, 0 for the system default."),
        )
        .arg(
            Arg::new("replay")
                .long("replay")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Replay events from an XML capture instead of the live event log."),
        )
        .arg(
            Arg::new("interval")
                .long("interval")
                .short('i')
                .value_name("SECONDS")
                .value_parser(value_parser!(u64))
                .default_value("10")
                .help("Seconds between collection cycles."),
        )
        .arg(
            Arg::new("cycles")
                .long("cycles")
                .value_name("N")
                .value_parser(value_parser!(u64))
                .help("Stop after N cycles, 0 runs until interrupted (default: 1 with `--replay`, 0 otherwise)."),
        )
        .arg(
            Arg::new("tag")
                .long("tag")
                .short('t')
                .action(ArgAction::Append)
                .value_name("GLOB")
                .help("Names to emit as tags. Can be passed multiple times."),
        )
        .arg(
            Arg::new("field")
                .long("field")
                .short('f')
                .action(ArgAction::Append)
                .value_name("GLOB")
                .help("Names to emit as fields. Can be passed multiple times."),
        )
        .arg(
            Arg::new("exclude")
                .long("exclude")
                .short('x')
                .action(ArgAction::Append)
                .value_name("GLOB")
                .help("Field names to drop. Can be passed multiple times."),
        )
        .arg(
            Arg::new("exclude-empty")
                .long("exclude-empty")
                .action(ArgAction::Append)
                .value_name("GLOB")
                .help("Names to drop when their value is empty or zero. Can be passed multiple times."),
        )
        .arg(
            Arg::new("no-userdata")
                .long("no-userdata")
                .action(ArgAction::SetTrue)
                .help("Do not unroll UserData into fields."),
        )
        .arg(
            Arg::new("no-eventdata")
                .long("no-eventdata")
                .action(ArgAction::SetTrue)
                .help("Do not unroll EventData into fields."),
        )
        .arg(
            Arg::new("separator")
                .long("separator")
                .value_name("SEP")
                .default_value("_")
                .help("Separator between the parts of unrolled field names."),
        )
        .arg(
            Arg::new("full-message")
                .long("full-message")
                .action(ArgAction::SetTrue)
                .help("Keep every line of the message instead of only the first one."),
        )
        .arg(
            Arg::new("wall-clock")
                .long("wall-clock")
                .action(ArgAction::SetTrue)
                .help("Timestamp records with the collection time instead of the event time."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help(indoc!(
                    r#"Sets debug prints level for the application:
                -v   - info
                -vv  - debug
                -vvv - trace"#
                )),
        )
}

fn strings(matches: &ArgMatches, id: &str) -> Option<Vec<String>> {
    matches
        .get_many::<String>(id)
        .map(|values| values.cloned().collect())
}

fn settings_from_matches(matches: &ArgMatches) -> CollectorSettings {
    let mut settings = CollectorSettings::new()
        .locale(*matches.get_one::<u32>("locale").unwrap_or(&0))
        .process_userdata(!matches.get_flag("no-userdata"))
        .process_eventdata(!matches.get_flag("no-eventdata"))
        .only_first_line_of_message(!matches.get_flag("full-message"))
        .timestamp_from_event(!matches.get_flag("wall-clock"));

    if let Some(channel) = matches.get_one::<String>("channel") {
        settings = settings.eventlog_name(channel);
    }
    if let Some(query) = matches.get_one::<String>("query") {
        settings = settings.xpath_query(query);
    }
    if let Some(separator) = matches.get_one::<String>("separator") {
        settings = settings.separator(separator);
    }
    if let Some(tags) = strings(matches, "tag") {
        settings = settings.event_tags(&tags);
    }
    if let Some(fields) = strings(matches, "field") {
        settings = settings.event_fields(&fields);
    }
    if let Some(exclude) = strings(matches, "exclude") {
        settings = settings.exclude_fields(&exclude);
    }
    if let Some(exclude_empty) = strings(matches, "exclude-empty") {
        settings = settings.exclude_empty(&exclude_empty);
    }

    settings
}

fn init_logging(matches: &ArgMatches) -> Result<()> {
    let level = match matches.get_count("verbose") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        3 => LevelFilter::Trace,
        _ => {
            eprintln!("using more than -vvv does not affect verbosity level");
            LevelFilter::Trace
        }
    };

    WriteLogger::init(level, Config::default(), io::stderr())
        .context("Failed to initialize logging")
}

/// Writes each record as one JSON line.
struct JsonLines<W: Write> {
    out: W,
    error: Option<io::Error>,
}

impl<W: Write> JsonLines<W> {
    fn new(out: W) -> Self {
        JsonLines { out, error: None }
    }

    /// Flush, surfacing the first write error of the cycle.
    fn finish_cycle(&mut self) -> Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e).context("Failed to write record");
        }
        self.out.flush().context("Failed to flush output")
    }
}

impl<W: Write> Accumulator for JsonLines<W> {
    fn add_fields(
        &mut self,
        name: &str,
        fields: BTreeMap<String, FieldValue>,
        tags: BTreeMap<String, String>,
        timestamp: Timestamp,
    ) {
        if self.error.is_some() {
            return;
        }

        let record = ProjectedRecord {
            name: name.to_string(),
            tags,
            fields,
            timestamp,
        };
        let written = serde_json::to_writer(&mut self.out, &record)
            .map_err(io::Error::from)
            .and_then(|_| self.out.write_all(b"\n"));
        if let Err(e) = written {
            self.error = Some(e);
        }
    }
}

fn collect<A: EventLogApi>(
    api: A,
    settings: &CollectorSettings,
    interval: Duration,
    cycles: u64,
) -> Result<()> {
    let mut collector = EventLogCollector::new(api, settings)?;
    let stdout = io::stdout();
    let mut sink = JsonLines::new(stdout.lock());

    let mut cycle = 0;
    loop {
        cycle += 1;
        match collector.gather(&mut sink) {
            Ok(n) => info!("cycle {}: collected {} events", cycle, n),
            Err(e) => warn!("cycle {} failed: {}", cycle, e),
        }
        sink.finish_cycle()?;

        if cycles != 0 && cycle >= cycles {
            break;
        }
        debug!("sleeping for {:?}", interval);
        thread::sleep(interval);
    }

    Ok(())
}

#[cfg(windows)]
fn collect_live(settings: &CollectorSettings, interval: Duration, cycles: u64) -> Result<()> {
    collect(win_eventlog::WindowsEventLog::new(), settings, interval, cycles)
}

#[cfg(not(windows))]
fn collect_live(_settings: &CollectorSettings, _interval: Duration, _cycles: u64) -> Result<()> {
    anyhow::bail!("Live collection is only supported on Windows, use `--replay <FILE>` instead")
}

fn run(matches: &ArgMatches) -> Result<()> {
    let settings = settings_from_matches(matches);
    settings.validate().context("Invalid arguments")?;

    let interval = Duration::from_secs(*matches.get_one::<u64>("interval").unwrap_or(&10));
    let replay = matches.get_one::<PathBuf>("replay");
    let cycles = match (matches.get_one::<u64>("cycles"), replay) {
        (Some(cycles), _) => *cycles,
        (None, Some(_)) => 1,
        (None, None) => 0,
    };

    match replay {
        Some(path) => {
            let api = ReplayEventLog::from_path(path)
                .with_context(|| format!("Failed to read capture `{}`", path.display()))?;
            collect(api, &settings, interval, cycles)
        }
        None => collect_live(&settings, interval, cycles),
    }
}

fn main() -> Result<()> {
    let matches = command().get_matches();
    init_logging(&matches)?;
    run(&matches)
}
