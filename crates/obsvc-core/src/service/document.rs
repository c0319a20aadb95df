//! Service documents (`_service` files).
//!
//! ```xml
//! <services>
//!   <service name="kiwi_import"/>
//!   <service name="download_url" mode="disabled">
//!     <param name="host">download.example.org</param>
//!   </service>
//! </services>
//! ```
//!
//! Service order is significant: the backend applies services in sequence.

use std::io::Cursor;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Service that converts an uploaded kiwi archive into package sources.
pub const KIWI_IMPORT: &str = "kiwi_import";

/// Errors reading or writing a service document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceDocumentError {
    #[error("malformed service document: {0}")]
    Malformed(String),

    #[error("service document root must be <services>, found <{0}>")]
    UnexpectedRoot(String),

    #[error("<{element}> is missing its name attribute")]
    MissingName { element: String },

    #[error("unsupported selector: {0}")]
    UnsupportedSelector(String),

    #[error("service document could not be encoded: {0}")]
    Encode(String),
}

/// One named service with its parameters.
///
/// Parameters keep document order and may repeat (several `exclude` entries,
/// for instance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInvocation {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<(String, String)>,
    /// Backend run mode (`disabled`, `buildtime`, `localonly`, ...)
    #[serde(default)]
    pub mode: Option<String>,
}

impl ServiceInvocation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            mode: None,
        }
    }

    /// Append a parameter after any already present, including ones with the
    /// same name.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((key.into(), value.into()));
        self
    }

    /// First value of parameter `key`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params(key).next()
    }

    /// Every value of parameter `key`, in document order.
    pub fn params<'a, 'k>(&'a self, key: &'k str) -> impl Iterator<Item = &'a str> + 'k
    where
        'a: 'k,
    {
        self.parameters
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }
}

/// Ordered list of services attached to a package's sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDocument {
    services: Vec<ServiceInvocation>,
}

impl ServiceDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn services(&self) -> &[ServiceInvocation] {
        &self.services
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Append a service; it runs after every service already present.
    pub fn add_service(&mut self, invocation: ServiceInvocation) -> &mut Self {
        self.services.push(invocation);
        self
    }

    pub fn add_kiwi_import(&mut self) -> &mut Self {
        self.add_service(ServiceInvocation::new(KIWI_IMPORT))
    }

    /// Remove every service called `name`; returns how many were removed.
    pub fn remove_service(&mut self, name: &str) -> usize {
        let before = self.services.len();
        self.services.retain(|s| s.name != name);
        before - self.services.len()
    }

    /// First service called `name`.
    pub fn find(&self, name: &str) -> Option<&ServiceInvocation> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Evaluate a path selector.
    ///
    /// Supported forms: `/services/service` and
    /// `/services/service[@name='kiwi_import']` (single or double quotes).
    pub fn select(&self, selector: &str) -> Result<Vec<&ServiceInvocation>, ServiceDocumentError> {
        let unsupported = || ServiceDocumentError::UnsupportedSelector(selector.to_string());

        let rest = selector
            .trim()
            .strip_prefix("/services/service")
            .ok_or_else(unsupported)?;
        if rest.is_empty() {
            return Ok(self.services.iter().collect());
        }

        let predicate = rest
            .strip_prefix("[@name=")
            .and_then(|p| p.strip_suffix(']'))
            .ok_or_else(unsupported)?;
        let name = predicate
            .strip_prefix('\'')
            .and_then(|p| p.strip_suffix('\''))
            .or_else(|| predicate.strip_prefix('"').and_then(|p| p.strip_suffix('"')))
            .ok_or_else(unsupported)?;

        Ok(self.services.iter().filter(|s| s.name == name).collect())
    }

    /// Parse the backend's XML form.
    pub fn from_xml(xml: &str) -> Result<Self, ServiceDocumentError> {
        if xml.trim().is_empty() {
            return Ok(Self::new());
        }

        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut document = Self::new();
        let mut saw_root = false;
        let mut current: Option<ServiceInvocation> = None;
        let mut param: Option<(String, String)> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => match e.name().as_ref() {
                    b"services" => saw_root = true,
                    b"service" => current = Some(read_service(&e)?),
                    b"param" => param = Some((name_attr(&e, "param")?, String::new())),
                    other if !saw_root => {
                        return Err(ServiceDocumentError::UnexpectedRoot(
                            String::from_utf8_lossy(other).into_owned(),
                        ))
                    }
                    _ => {}
                },
                Ok(Event::Empty(e)) => match e.name().as_ref() {
                    b"services" => saw_root = true,
                    b"service" => {
                        document.add_service(read_service(&e)?);
                    }
                    b"param" => {
                        let key = name_attr(&e, "param")?;
                        if let Some(service) = current.as_mut() {
                            service.parameters.push((key, String::new()));
                        }
                    }
                    other if !saw_root => {
                        return Err(ServiceDocumentError::UnexpectedRoot(
                            String::from_utf8_lossy(other).into_owned(),
                        ))
                    }
                    _ => {}
                },
                Ok(Event::Text(t)) => {
                    if let Some((_, value)) = param.as_mut() {
                        let text = t
                            .unescape()
                            .map_err(|e| ServiceDocumentError::Malformed(e.to_string()))?;
                        value.push_str(&text);
                    }
                }
                Ok(Event::End(e)) => match e.name().as_ref() {
                    b"param" => {
                        if let (Some((key, value)), Some(service)) =
                            (param.take(), current.as_mut())
                        {
                            service.parameters.push((key, value));
                        }
                    }
                    b"service" => {
                        if let Some(service) = current.take() {
                            document.add_service(service);
                        }
                    }
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Err(e) => return Err(ServiceDocumentError::Malformed(e.to_string())),
                _ => {}
            }
        }

        if !saw_root {
            return Err(ServiceDocumentError::Malformed(
                "no <services> element".to_string(),
            ));
        }
        Ok(document)
    }

    /// Render the backend's XML form.
    pub fn to_xml(&self) -> Result<String, ServiceDocumentError> {
        let encode = |e: &dyn std::fmt::Display| ServiceDocumentError::Encode(e.to_string());
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

        if self.services.is_empty() {
            writer
                .write_event(Event::Empty(BytesStart::new("services")))
                .map_err(|e| encode(&e))?;
        } else {
            writer
                .write_event(Event::Start(BytesStart::new("services")))
                .map_err(|e| encode(&e))?;

            for service in &self.services {
                let mut start = BytesStart::new("service");
                start.push_attribute(("name", service.name.as_str()));
                if let Some(mode) = &service.mode {
                    start.push_attribute(("mode", mode.as_str()));
                }

                if service.parameters.is_empty() {
                    writer
                        .write_event(Event::Empty(start))
                        .map_err(|e| encode(&e))?;
                    continue;
                }

                writer
                    .write_event(Event::Start(start))
                    .map_err(|e| encode(&e))?;
                for (key, value) in &service.parameters {
                    let mut param = BytesStart::new("param");
                    param.push_attribute(("name", key.as_str()));
                    writer
                        .write_event(Event::Start(param))
                        .map_err(|e| encode(&e))?;
                    writer
                        .write_event(Event::Text(BytesText::new(value)))
                        .map_err(|e| encode(&e))?;
                    writer
                        .write_event(Event::End(BytesEnd::new("param")))
                        .map_err(|e| encode(&e))?;
                }
                writer
                    .write_event(Event::End(BytesEnd::new("service")))
                    .map_err(|e| encode(&e))?;
            }

            writer
                .write_event(Event::End(BytesEnd::new("services")))
                .map_err(|e| encode(&e))?;
        }

        String::from_utf8(writer.into_inner().into_inner()).map_err(|e| encode(&e))
    }
}

fn name_attr(e: &BytesStart<'_>, element: &str) -> Result<String, ServiceDocumentError> {
    attr(e, b"name")?.ok_or_else(|| ServiceDocumentError::MissingName {
        element: element.to_string(),
    })
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, ServiceDocumentError> {
    for attribute in e.attributes() {
        let attribute =
            attribute.map_err(|err| ServiceDocumentError::Malformed(err.to_string()))?;
        if attribute.key.as_ref() == key {
            let value = attribute
                .unescape_value()
                .map_err(|err| ServiceDocumentError::Malformed(err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn read_service(e: &BytesStart<'_>) -> Result<ServiceInvocation, ServiceDocumentError> {
    Ok(ServiceInvocation {
        name: name_attr(e, "service")?,
        parameters: Vec::new(),
        mode: attr(e, b"mode")?,
    })
}
