use log::trace;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event as XmlEvent};

use crate::err::{EventLogError, Result};
use crate::utils::single_line;

/// One event, as decoded from its rendered XML.
///
/// System fields are filled by [`Event::from_xml`]. The text fields (`message`, `level_text`,
/// `task_text`, `opcode_text` and the textual `keywords`) are only seeded from `RenderingInfo`
/// there; the renderer replaces them with text from the publisher's metadata when it can.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    pub source: String,
    pub event_id: i64,
    pub version: i64,
    pub level: i64,
    pub level_text: String,
    pub task: i64,
    pub task_text: String,
    pub opcode: i64,
    pub opcode_text: String,
    pub keywords: String,
    /// Raw `TimeCreated/@SystemTime`.
    pub time_created: String,
    pub event_record_id: u64,
    pub activity_id: String,
    pub related_activity_id: String,
    pub process_id: u64,
    pub thread_id: u64,
    pub channel: String,
    pub computer: String,
    pub user_id: String,
    pub message: String,
    /// `|` separated values of `EventData`.
    pub description: String,
    /// Inner XML of `UserData`, if present.
    pub user_data: Option<String>,
    /// Inner XML of `EventData`, if present.
    pub event_data: Option<String>,
}

/// An event whose XML could only be decoded up to `error`.
#[derive(Debug)]
pub struct PartialEvent {
    pub event: Event,
    pub error: EventLogError,
}

impl Event {
    /// Decode a rendered event.
    ///
    /// Decoding stops at the first error, in which case the fields decoded so far are returned
    /// alongside the error.
    pub fn from_xml(xml: &str) -> std::result::Result<Event, PartialEvent> {
        let mut decoder = EventDecoder::default();
        match decoder.decode(xml) {
            Ok(()) => Ok(decoder.finish()),
            Err(error) => Err(PartialEvent {
                event: decoder.finish(),
                error,
            }),
        }
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EventLogError::XmlDecode {
            message: format!("invalid {field} value `{value}`"),
        })
}

#[derive(Default)]
struct EventDecoder {
    event: Event,
    path: Vec<String>,
    rendered_keywords: Vec<String>,
}

impl EventDecoder {
    fn decode(&mut self, xml: &str) -> Result<()> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        loop {
            match reader.read_event()? {
                XmlEvent::Start(start) => {
                    let name = local_name(&start);
                    self.visit_attributes(&name, &start)?;

                    if self.path.len() == 1 && (name == "EventData" || name == "UserData") {
                        let inner = reader.read_text(start.name())?.into_owned();
                        trace!("captured {} bytes of {}", inner.len(), name);
                        if name == "EventData" {
                            self.event.event_data = Some(inner);
                        } else {
                            self.event.user_data = Some(inner);
                        }
                        continue;
                    }

                    self.path.push(name);
                }
                XmlEvent::Empty(start) => {
                    let name = local_name(&start);
                    self.visit_attributes(&name, &start)?;

                    if self.path.len() == 1 && name == "EventData" {
                        self.event.event_data = Some(String::new());
                    } else if self.path.len() == 1 && name == "UserData" {
                        self.event.user_data = Some(String::new());
                    }
                }
                XmlEvent::End(_) => {
                    self.path.pop();
                }
                XmlEvent::Text(text) => {
                    let text = text.unescape()?;
                    self.visit_text(&text)?;
                }
                XmlEvent::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = self.path.last() {
            return Err(EventLogError::XmlDecode {
                message: format!("unclosed element `{open}`"),
            });
        }

        Ok(())
    }

    fn finish(mut self) -> Event {
        if !self.rendered_keywords.is_empty() {
            self.event.keywords = self.rendered_keywords.join(",");
        }
        self.event
    }

    fn in_system(&self) -> bool {
        self.path.len() == 2 && self.path[1] == "System"
    }

    fn visit_attributes(&mut self, name: &str, start: &BytesStart<'_>) -> Result<()> {
        if !self.in_system() {
            return Ok(());
        }

        for attr in start.attributes() {
            let attr = attr?;
            let key = attr.key.local_name();
            let key = key.as_ref();
            let value = attr.unescape_value()?;
            let e = &mut self.event;

            match (name, key) {
                ("Provider", b"Name") => e.source = value.into_owned(),
                ("TimeCreated", b"SystemTime") => e.time_created = value.into_owned(),
                ("Correlation", b"ActivityID") => e.activity_id = value.into_owned(),
                ("Correlation", b"RelatedActivityID") => {
                    e.related_activity_id = value.into_owned()
                }
                ("Execution", b"ProcessID") => e.process_id = parse_number("ProcessID", &value)?,
                ("Execution", b"ThreadID") => e.thread_id = parse_number("ThreadID", &value)?,
                ("Security", b"UserID") => e.user_id = value.into_owned(),
                _ => {}
            }
        }

        Ok(())
    }

    fn visit_text(&mut self, text: &str) -> Result<()> {
        let depth = self.path.len();
        let element = self.path.last().map(String::as_str);
        let parent = depth
            .checked_sub(2)
            .and_then(|i| self.path.get(i))
            .map(String::as_str);

        match (parent, element) {
            (Some("System"), Some(element)) if depth == 3 => {
                let e = &mut self.event;
                match element {
                    "EventID" => e.event_id = parse_number("EventID", text)?,
                    "Version" => e.version = parse_number("Version", text)?,
                    "Level" => e.level = parse_number("Level", text)?,
                    "Task" => e.task = parse_number("Task", text)?,
                    "Opcode" => e.opcode = parse_number("Opcode", text)?,
                    "Keywords" => e.keywords = text.to_string(),
                    "EventRecordID" => e.event_record_id = parse_number("EventRecordID", text)?,
                    "Channel" => e.channel = text.to_string(),
                    "Computer" => e.computer = text.to_string(),
                    _ => {}
                }
            }
            (Some("RenderingInfo"), Some(element)) => {
                let e = &mut self.event;
                match element {
                    "Message" => e.message = text.to_string(),
                    "Level" => e.level_text = single_line(text),
                    "Task" => e.task_text = single_line(text),
                    "Opcode" => e.opcode_text = single_line(text),
                    _ => {}
                }
            }
            (Some("Keywords"), Some("Keyword")) => {
                self.rendered_keywords.push(text.trim().to_string());
            }
            _ => {}
        }

        Ok(())
    }
}

fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}
