//! Decoding of the two binary listing shapes.
//!
//! Path listing (XML):
//!
//! ```xml
//! <availablebinaries>
//!   <packages>
//!     <arch>x86_64</arch>
//!     <name>perl</name>
//!     <name>perl-Net-SSLeay</name>
//!   </packages>
//!   <products>...</products>
//! </availablebinaries>
//! ```
//!
//! Command listing (mapping):
//!
//! ```text
//! {"perl-Citrix" => ["noarch"], "perl" => ["x86_64", "i586"]}
//! ```

use std::collections::{BTreeMap, BTreeSet};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Deserialize;

use super::{AvailableBinaries, BinaryIndexError};

/// Decode either listing shape, detected from the first non-blank character.
///
/// A blank body is an empty listing. Names in an XML `<packages>` group
/// without any `<arch>` are attributed to `default_arch`.
pub fn parse_listing(
    body: &str,
    default_arch: &str,
) -> Result<AvailableBinaries, BinaryIndexError> {
    let trimmed = body.trim_start();
    match trimmed.chars().next() {
        None => Ok(AvailableBinaries::new()),
        Some('<') => parse_xml_listing(trimmed, default_arch),
        Some('{') => parse_mapping_listing(trimmed),
        Some(other) => Err(BinaryIndexError::Malformed(format!(
            "unrecognised listing starting with {other:?}"
        ))),
    }
}

fn malformed(err: impl std::fmt::Display) -> BinaryIndexError {
    BinaryIndexError::Malformed(err.to_string())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Arch,
    Name,
}

#[derive(Default)]
struct PackagesGroup {
    archs: BTreeSet<String>,
    names: Vec<String>,
}

impl PackagesGroup {
    fn flush_into(self, binaries: &mut AvailableBinaries, default_arch: &str) {
        for name in self.names {
            if self.archs.is_empty() {
                binaries.insert(name, default_arch);
            } else {
                for arch in &self.archs {
                    binaries.insert(name.clone(), arch.clone());
                }
            }
        }
    }
}

fn arch_attr(e: &BytesStart<'_>) -> Result<Option<String>, BinaryIndexError> {
    for attr in e.attributes() {
        let attr = attr.map_err(malformed)?;
        if attr.key.as_ref() == b"arch" {
            return Ok(Some(attr.unescape_value().map_err(malformed)?.into_owned()));
        }
    }
    Ok(None)
}

fn parse_xml_listing(
    xml: &str,
    default_arch: &str,
) -> Result<AvailableBinaries, BinaryIndexError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut binaries = AvailableBinaries::new();
    let mut saw_root = false;
    let mut group: Option<PackagesGroup> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => match e.name().as_ref() {
                b"availablebinaries" => saw_root = true,
                b"packages" => {
                    let mut next = PackagesGroup::default();
                    if let Some(arch) = arch_attr(&e)? {
                        next.archs.insert(arch);
                    }
                    group = Some(next);
                }
                b"arch" if group.is_some() => field = Some(Field::Arch),
                b"name" if group.is_some() => field = Some(Field::Name),
                other if !saw_root => {
                    return Err(malformed(format!(
                        "expected <availablebinaries>, found <{}>",
                        String::from_utf8_lossy(other)
                    )))
                }
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"availablebinaries" => saw_root = true,
                other if !saw_root => {
                    return Err(malformed(format!(
                        "expected <availablebinaries>, found <{}>",
                        String::from_utf8_lossy(other)
                    )))
                }
                _ => {}
            },
            Event::Text(t) => {
                if let (Some(current), Some(g)) = (field, group.as_mut()) {
                    let value = t.unescape().map_err(malformed)?.trim().to_string();
                    if !value.is_empty() {
                        match current {
                            Field::Arch => {
                                g.archs.insert(value);
                            }
                            Field::Name => g.names.push(value),
                        }
                    }
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"arch" | b"name" => field = None,
                b"packages" => {
                    if let Some(g) = group.take() {
                        g.flush_into(&mut binaries, default_arch);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(malformed("missing <availablebinaries> root"));
    }
    Ok(binaries)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Architectures {
    One(String),
    Many(Vec<String>),
}

fn parse_mapping_listing(body: &str) -> Result<AvailableBinaries, BinaryIndexError> {
    let json = normalize_arrows(body);
    let raw: BTreeMap<String, Architectures> = serde_json::from_str(&json).map_err(malformed)?;

    Ok(raw
        .into_iter()
        .map(|(name, archs)| {
            let archs: BTreeSet<String> = match archs {
                Architectures::One(arch) => BTreeSet::from([arch]),
                Architectures::Many(archs) => archs.into_iter().collect(),
            };
            (name, archs)
        })
        .collect())
}

/// Rewrite `=>` separators outside string literals as `:`.
fn normalize_arrows(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '=' if chars.peek() == Some(&'>') => {
                chars.next();
                out.push(':');
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archs(binaries: &AvailableBinaries, name: &str) -> Vec<String> {
        binaries
            .architectures(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_xml_groups_apply_archs_to_every_name() {
        let xml = r#"
            <availablebinaries>
              <packages>
                <arch>x86_64</arch>
                <arch>i586</arch>
                <name>perl</name>
                <name>perl-Net-SSLeay</name>
              </packages>
              <packages>
                <arch>noarch</arch>
                <name>perl-Citrix</name>
              </packages>
              <products>
                <name>openSUSE</name>
              </products>
            </availablebinaries>"#;

        let binaries = parse_listing(xml, "x86_64").unwrap();
        assert_eq!(binaries.len(), 3);
        assert_eq!(archs(&binaries, "perl"), vec!["i586", "x86_64"]);
        assert_eq!(archs(&binaries, "perl-Citrix"), vec!["noarch"]);
        assert!(!binaries.contains("openSUSE"));
    }

    #[test]
    fn test_xml_group_without_arch_uses_default() {
        let xml = "<availablebinaries><packages><name>vim</name></packages></availablebinaries>";
        let binaries = parse_listing(xml, "aarch64").unwrap();
        assert_eq!(archs(&binaries, "vim"), vec!["aarch64"]);
    }

    #[test]
    fn test_empty_listings() {
        assert!(parse_listing("", "x86_64").unwrap().is_empty());
        assert!(parse_listing("  \n", "x86_64").unwrap().is_empty());
        assert!(parse_listing("<availablebinaries/>", "x86_64")
            .unwrap()
            .is_empty());
        assert!(parse_listing("{}", "x86_64").unwrap().is_empty());
    }

    #[test]
    fn test_mapping_with_arrows() {
        let body = r#"{"perl-Citrix" => ["noarch"], "perl" => ["x86_64", "i586"], "a=>b" => "x86_64"}"#;
        let binaries = parse_listing(body, "x86_64").unwrap();
        assert_eq!(archs(&binaries, "perl-Citrix"), vec!["noarch"]);
        assert_eq!(archs(&binaries, "perl"), vec!["i586", "x86_64"]);
        assert_eq!(archs(&binaries, "a=>b"), vec!["x86_64"]);
    }

    #[test]
    fn test_mapping_plain_json() {
        let binaries = parse_listing(r#"{"perl-Citrix": ["noarch"]}"#, "x86_64").unwrap();
        assert!(binaries.contains("perl-Citrix"));
    }

    #[test]
    fn test_malformed_listings() {
        assert!(matches!(
            parse_listing("Internal Server Error", "x86_64"),
            Err(BinaryIndexError::Malformed(_))
        ));
        assert!(matches!(
            parse_listing("<status code=\"404\"/>", "x86_64"),
            Err(BinaryIndexError::Malformed(_))
        ));
        assert!(matches!(
            parse_listing("{\"perl\" => [", "x86_64"),
            Err(BinaryIndexError::Malformed(_))
        ));
    }
}
