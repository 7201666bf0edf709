//! Decoding of OAI-PMH response envelopes.
//!
//! The decoder walks the document with a streaming quick-xml reader. Typed
//! sections (Identify, formats, sets, headers, records) are extracted along
//! the way, while record and payload XML is sliced out of the input byte for
//! byte so metadata passes through untouched.

use std::borrow::Cow;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::Serialize;

use super::error::{DecodeError, OaiError};
use super::Verb;

const ROOT_ELEMENT: &str = "OAI-PMH";

/// Repository self-description returned by `Identify`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Identify {
    /// Human readable repository name.
    #[serde(rename = "name")]
    pub repository_name: String,
    /// Base URL as advertised by the repository.
    #[serde(rename = "url")]
    pub base_url: String,
    /// Protocol version, normally `2.0`.
    #[serde(rename = "version")]
    pub protocol_version: String,
    /// Administrator contact addresses.
    #[serde(rename = "emails")]
    pub admin_emails: Vec<String>,
    /// Earliest datestamp in the repository, as sent.
    #[serde(rename = "earliest")]
    pub earliest_datestamp: String,
    /// Deleted record policy (`no`, `transient` or `persistent`).
    #[serde(rename = "delete")]
    pub deleted_record: String,
    /// Datestamp granularity.
    pub granularity: String,
}

/// One entry of `ListMetadataFormats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetadataFormat {
    /// Metadata prefix, e.g. `oai_dc`.
    pub prefix: String,
    /// Schema location.
    pub schema: String,
    /// Metadata namespace.
    pub namespace: String,
}

/// One entry of `ListSets`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SetInfo {
    /// Set spec used as the `set` argument.
    pub spec: String,
    /// Display name.
    pub name: String,
    /// Verbatim `setDescription` element, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Record header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub identifier: String,
    pub datestamp: String,
    pub set_specs: Vec<String>,
    pub deleted: bool,
}

/// A record of `ListRecords` or `GetRecord`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    /// Parsed header.
    pub header: Header,
    /// The complete `<record>` element exactly as received.
    pub raw: String,
}

/// Flow control token of a list response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumptionToken {
    /// Token value; empty on the last page.
    pub value: String,
    pub cursor: Option<u64>,
    pub complete_list_size: Option<u64>,
    pub expiration_date: Option<String>,
}

/// A decoded OAI-PMH envelope, or the aggregate of several pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// Content of `responseDate`.
    pub response_date: String,
    /// Verb echoed in the `request` element.
    pub request_verb: Option<String>,
    /// First `error` element, if the repository reported one.
    pub error: Option<OaiError>,
    /// Name of the verb section found in the envelope.
    pub section: Option<Verb>,
    pub identify: Option<Identify>,
    pub formats: Vec<MetadataFormat>,
    pub sets: Vec<SetInfo>,
    pub headers: Vec<Header>,
    pub records: Vec<Record>,
    /// Direct children of the verb section except `resumptionToken`,
    /// verbatim and in document order.
    pub payload: String,
    pub resumption_token: Option<ResumptionToken>,
}

impl Response {
    /// Decodes an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the body is not UTF-8, is not well-formed
    /// XML, or its root element is not `OAI-PMH`.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let input = std::str::from_utf8(body)
            .map_err(|e| DecodeError::new(format!("body is not UTF-8: {e}")))?;
        Decoder::new(input).run()
    }

    /// Returns the non-empty resumption token, if more pages are available.
    #[must_use]
    pub fn next_token(&self) -> Option<&str> {
        self.resumption_token
            .as_ref()
            .map(|token| token.value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Returns true when the envelope carries a protocol error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Appends the content of a following page, keeping server order.
    ///
    /// The resumption token is replaced by the page's token; the response
    /// date of the first page is kept.
    pub fn append_page(&mut self, page: Response) {
        self.formats.extend(page.formats);
        self.sets.extend(page.sets);
        self.headers.extend(page.headers);
        self.records.extend(page.records);
        if !page.payload.is_empty() {
            if !self.payload.is_empty() {
                self.payload.push('\n');
            }
            self.payload.push_str(&page.payload);
        }
        if self.identify.is_none() {
            self.identify = page.identify;
        }
        if self.section.is_none() {
            self.section = page.section;
        }
        self.resumption_token = page.resumption_token;
    }
}

struct Decoder<'a> {
    input: &'a str,
    response: Response,
    names: Vec<String>,
    starts: Vec<usize>,
    text: String,
    root_seen: bool,
    header: Header,
    format: MetadataFormat,
    set: SetInfo,
    identify: Identify,
}

impl<'a> Decoder<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            response: Response::default(),
            names: Vec::new(),
            starts: Vec::new(),
            text: String::new(),
            root_seen: false,
            header: Header::default(),
            format: MetadataFormat::default(),
            set: SetInfo::default(),
            identify: Identify::default(),
        }
    }

    fn run(mut self) -> Result<Response, DecodeError> {
        let mut reader = Reader::from_reader(self.input.as_bytes());
        let mut buf = Vec::new();
        loop {
            let before = position(&reader);
            let event = reader.read_event_into(&mut buf).map_err(|e| {
                DecodeError::new(format!("at byte {}: {e}", position(&reader)))
            })?;
            let after = position(&reader);
            let start = self.tag_start(before);
            match event {
                Event::Start(e) => self.open(&e, start)?,
                Event::Empty(e) => {
                    self.open(&e, start)?;
                    self.close(after);
                }
                Event::End(_) => self.close(after),
                Event::Text(e) => {
                    let text = e
                        .unescape()
                        .map_err(|e| DecodeError::new(format!("bad text content: {e}")))?;
                    self.text.push_str(&text);
                }
                Event::CData(e) => {
                    self.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !self.root_seen {
            return Err(DecodeError::new("missing OAI-PMH root element"));
        }
        if !self.names.is_empty() {
            return Err(DecodeError::new("unexpected end of document"));
        }
        Ok(self.response)
    }

    // The reader may already have consumed the `<` of the next tag when it
    // stops after a text event.
    fn tag_start(&self, pos: usize) -> usize {
        let bytes = self.input.as_bytes();
        if bytes.get(pos) != Some(&b'<') && pos > 0 && bytes.get(pos - 1) == Some(&b'<') {
            pos - 1
        } else {
            pos
        }
    }

    fn slice(&self, from: usize, to: usize) -> &'a str {
        self.input.get(from..to).unwrap_or_default()
    }

    fn open(&mut self, e: &BytesStart<'_>, start: usize) -> Result<(), DecodeError> {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
        if self.names.is_empty() {
            if self.root_seen || name != ROOT_ELEMENT {
                return Err(DecodeError::new(format!(
                    "expected {ROOT_ELEMENT} root element, found {name}"
                )));
            }
            self.root_seen = true;
        }
        self.text.clear();

        match (self.names.len(), name.as_str()) {
            (1, "request") => self.response.request_verb = attribute(e, "verb"),
            (1, "error") => {
                let code = attribute(e, "code").unwrap_or_default();
                if code.trim().is_empty() {
                    return Err(DecodeError::new("error element without a code"));
                }
                if self.response.error.is_none() {
                    self.response.error = Some(OaiError::new(code, String::new()));
                }
            }
            (1, section) => {
                if let Ok(verb) = section.parse::<Verb>() {
                    self.response.section = Some(verb);
                }
            }
            (2, "resumptionToken") => {
                self.response.resumption_token = Some(ResumptionToken {
                    value: String::new(),
                    cursor: attribute(e, "cursor").and_then(|v| v.trim().parse().ok()),
                    complete_list_size: attribute(e, "completeListSize")
                        .and_then(|v| v.trim().parse().ok()),
                    expiration_date: attribute(e, "expirationDate"),
                });
            }
            (2, "header") | (3, "header") => {
                self.header = Header {
                    deleted: attribute(e, "status").as_deref() == Some("deleted"),
                    ..Header::default()
                };
            }
            (2, "set") => self.set = SetInfo::default(),
            (2, "metadataFormat") => self.format = MetadataFormat::default(),
            _ => {}
        }

        self.names.push(name);
        self.starts.push(start);
        Ok(())
    }

    fn close(&mut self, end: usize) {
        let Some(start) = self.starts.pop() else {
            return;
        };
        let text = std::mem::take(&mut self.text);
        let value = text.trim().to_string();

        {
            let path: Vec<&str> = self.names.iter().map(String::as_str).collect();
            match path.as_slice() {
                [_, "responseDate"] => self.response.response_date = value,
                [_, "error"] => {
                    if let Some(error) = self.response.error.as_mut()
                        && error.message.is_empty()
                    {
                        error.message = value;
                    }
                }
                [_, "Identify", field] => match *field {
                    "repositoryName" => self.identify.repository_name = value,
                    "baseURL" => self.identify.base_url = value,
                    "protocolVersion" => self.identify.protocol_version = value,
                    "adminEmail" => self.identify.admin_emails.push(value),
                    "earliestDatestamp" => self.identify.earliest_datestamp = value,
                    "deletedRecord" => self.identify.deleted_record = value,
                    "granularity" => self.identify.granularity = value,
                    _ => {}
                },
                [_, "Identify"] => {
                    self.response.identify = Some(std::mem::take(&mut self.identify));
                }
                [_, "ListMetadataFormats", "metadataFormat", field] => match *field {
                    "metadataPrefix" => self.format.prefix = value,
                    "schema" => self.format.schema = value,
                    "metadataNamespace" => self.format.namespace = value,
                    _ => {}
                },
                [_, "ListMetadataFormats", "metadataFormat"] => {
                    self.response.formats.push(std::mem::take(&mut self.format));
                }
                [_, "ListSets", "set", field] => match *field {
                    "setSpec" => self.set.spec = value,
                    "setName" => self.set.name = value,
                    "setDescription" => {
                        self.set.description = Some(self.slice(start, end).to_string());
                    }
                    _ => {}
                },
                [_, "ListSets", "set"] => self.response.sets.push(std::mem::take(&mut self.set)),
                [_, _, "header", field] | [_, _, "record", "header", field] => match *field {
                    "identifier" => self.header.identifier = value,
                    "datestamp" => self.header.datestamp = value,
                    "setSpec" => self.header.set_specs.push(value),
                    _ => {}
                },
                [_, "ListIdentifiers", "header"] => {
                    self.response.headers.push(std::mem::take(&mut self.header));
                }
                [_, _, "record"] => {
                    let raw = self.slice(start, end).to_string();
                    self.response.records.push(Record {
                        header: std::mem::take(&mut self.header),
                        raw,
                    });
                }
                [_, _, "resumptionToken"] => {
                    if let Some(token) = self.response.resumption_token.as_mut() {
                        token.value = value;
                    }
                }
                _ => {}
            }

            if let [_, section, child] = path.as_slice()
                && *child != "resumptionToken"
                && section.parse::<Verb>().is_ok()
            {
                let raw = self.slice(start, end);
                if !self.response.payload.is_empty() {
                    self.response.payload.push('\n');
                }
                self.response.payload.push_str(raw);
            }
        }

        self.names.pop();
    }
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name.as_bytes())
        .and_then(|attr| attr.unescape_value().ok().map(Cow::into_owned))
}

#[allow(clippy::cast_possible_truncation)]
fn position<R>(reader: &Reader<R>) -> usize {
    reader.buffer_position() as usize
}
