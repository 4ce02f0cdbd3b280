//! Flattening of `UserData` / `EventData` XML into named scalar fields.
//!
//! ```text
//! <EventData>
//!   <Data Name="SubjectUserSid">S-1-5-18</Data>
//!   <Data Name="SubjectUserName">WIN-SRV$</Data>
//!   <Binary>00000000</Binary>
//! </EventData>
//! ```
//!
//! unrolls (with `_` as separator, starting from the inner XML of `EventData`) into
//! `Data_SubjectUserSid`, `Data_SubjectUserName` and `Binary`. A `Name` attribute is folded into
//! the element's path segment; any other attribute becomes a field of its own named
//! `<path><separator><attribute>`.

use std::borrow::Cow;

use hashbrown::HashMap as FastMap;
use log::debug;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::err::{EventLogError, Result};
use crate::utils::{LINE_BREAK_SEPARATOR, collapse_line_breaks};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnrolledField {
    pub name: String,
    pub value: String,
}

impl UnrolledField {
    fn new(name: String, value: String) -> Self {
        UnrolledField { name, value }
    }
}

/// Hands out unique field names for one event.
///
/// The first use of a name is returned as is, later uses get `<separator>2`, `<separator>3`, ...
#[derive(Debug, Clone)]
pub struct FieldNamer {
    separator: String,
    usage: FastMap<String, usize, ahash::RandomState>,
}

impl FieldNamer {
    pub fn new(separator: &str) -> Self {
        FieldNamer {
            separator: separator.to_string(),
            usage: FastMap::with_hasher(ahash::RandomState::new()),
        }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Mark `name` as taken by a field produced elsewhere, so its next use gets a suffix.
    pub fn reserve(&mut self, name: &str) {
        if !self.usage.contains_key(name) {
            self.usage.insert(name.to_string(), 1);
        }
    }

    pub fn unique(&mut self, base: String) -> String {
        let count = self.usage.entry(base.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            return base;
        }

        let mut n = *count;
        loop {
            let candidate = format!("{}{}{}", base, self.separator, n);
            if !self.usage.contains_key(&candidate) {
                self.usage.insert(base, n);
                self.usage.insert(candidate.clone(), 1);
                return candidate;
            }
            n += 1;
        }
    }

    /// Unroll `fragment`, naming fields through this namer.
    ///
    /// A fragment that fails to parse yields no fields.
    pub fn unroll(&mut self, fragment: &str) -> Vec<UnrolledField> {
        let nodes = match parse_fragment(fragment) {
            Ok(nodes) => nodes,
            Err(e) => {
                debug!("skipping malformed XML fragment: {}", e);
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for node in &nodes {
            self.walk(node, None, &mut out);
        }
        out
    }

    fn walk(&mut self, node: &XmlNode, parent: Option<&str>, out: &mut Vec<UnrolledField>) {
        let mut segment = Cow::Borrowed(node.name.as_str());
        for (key, value) in &node.attributes {
            if key.eq_ignore_ascii_case("name") {
                segment = Cow::Owned(format!("{}{}{}", node.name, self.separator, value));
            }
        }

        let path = match parent {
            Some(parent) => format!("{}{}{}", parent, self.separator, segment),
            None => segment.into_owned(),
        };

        for (key, value) in &node.attributes {
            if key.eq_ignore_ascii_case("name") {
                continue;
            }
            let name = self.unique(format!("{}{}{}", path, self.separator, key));
            out.push(UnrolledField::new(name, value.clone()));
        }

        let text = node.text.trim();
        if !text.is_empty() {
            let name = self.unique(path.clone());
            out.push(UnrolledField::new(name, text.to_string()));
        }

        for child in &node.children {
            self.walk(child, Some(&path), out);
        }
    }
}

/// Unroll `fragment` with a fresh set of names.
pub fn unroll(fragment: &str, separator: &str) -> Vec<UnrolledField> {
    FieldNamer::new(separator).unroll(fragment)
}

/// The single-line summary of an `EventData` fragment: every unrolled value, `|` separated.
pub fn description_from_event_data(fragment: &str) -> String {
    let values: Vec<String> = unroll(fragment, "_")
        .into_iter()
        .map(|f| f.value)
        .collect();

    collapse_line_breaks(&values.join(LINE_BREAK_SEPARATOR), LINE_BREAK_SEPARATOR)
}

#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = attr.key.as_ref();
            // Namespace declarations are not data.
            if key == b"xmlns" || key.starts_with(b"xmlns:") {
                continue;
            }
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            attributes.push((key, attr.unescape_value()?.into_owned()));
        }

        Ok(XmlNode {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            attributes,
            ..XmlNode::default()
        })
    }
}

fn attach(stack: &mut [XmlNode], roots: &mut Vec<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => roots.push(node),
    }
}

fn parse_fragment(fragment: &str) -> Result<Vec<XmlNode>> {
    let mut reader = Reader::from_str(fragment);
    reader.config_mut().trim_text(true);

    let mut roots = Vec::new();
    let mut stack: Vec<XmlNode> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(XmlNode::from_start(&start)?),
            Event::Empty(start) => {
                let node = XmlNode::from_start(&start)?;
                attach(&mut stack, &mut roots, node);
            }
            Event::End(_) => {
                let node = stack.pop().ok_or_else(|| EventLogError::XmlDecode {
                    message: format!("unmatched end tag at {}", reader.buffer_position()),
                })?;
                attach(&mut stack, &mut roots, node);
            }
            Event::Text(text) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(cdata) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&cdata));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(EventLogError::XmlDecode {
            message: format!("unclosed element `{}`", open.name),
        });
    }

    Ok(roots)
}
