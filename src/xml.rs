// XML to mapping conversion
//
// Turns an XML response body into the same `serde_json::Value` shape the JSON
// path produces, so callers handle both formats with one set of accessors.
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde_json::{Map, Value};
use thiserror::Error;

pub const MAX_DEPTH: usize = 25;
pub const ATTRIBUTES_KEY: &str = "@attributes";

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("XML parse error at position {position}: {message}")]
    Syntax { position: u64, message: String },

    #[error("XML document has no root element")]
    Empty,

    #[error("XML document has more than one root element")]
    MultipleRoots,

    #[error("XML element <{0}> is never closed")]
    Unclosed(String),
}

/// Outcome of normalizing a document.
///
/// `Truncated` means at least one subtree sat deeper than [`MAX_DEPTH`] and
/// was replaced by `null`, which keeps it distinguishable from an element
/// that is simply empty.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Complete(Value),
    Truncated(Value),
}

impl Normalized {
    pub fn is_truncated(&self) -> bool {
        matches!(self, Normalized::Truncated(_))
    }

    pub fn value(&self) -> &Value {
        match self {
            Normalized::Complete(value) | Normalized::Truncated(value) => value,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Normalized::Complete(value) | Normalized::Truncated(value) => value,
        }
    }
}

// Parsed element before normalization
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

/// Parses `xml` and converts it into a nested mapping keyed by the root tag.
///
/// - an element without child elements or attributes becomes its trimmed text
/// - any other element becomes a mapping of child tag to normalized child,
///   with attributes under `@attributes`; its own text is dropped
/// - same-name siblings collapse, the last one wins
pub fn normalize(xml: &str) -> Result<Normalized, XmlError> {
    normalize_document(Reader::from_str(xml))
}

/// Same as [`normalize`] for an undecoded response body. A byte order mark or
/// an `encoding` declaration selects the character set; otherwise the bytes
/// must be valid UTF-8.
pub fn normalize_bytes(body: &[u8]) -> Result<Normalized, XmlError> {
    normalize_document(Reader::from_reader(body))
}

fn normalize_document(reader: Reader<&[u8]>) -> Result<Normalized, XmlError> {
    let root = parse_document(reader)?;

    let mut truncated = false;
    let value = normalize_element(&root, 0, &mut truncated);

    let mut wrapper = Map::new();
    wrapper.insert(root.name, value);

    if truncated {
        tracing::warn!(max_depth = MAX_DEPTH, "XML document exceeded depth limit");
        Ok(Normalized::Truncated(Value::Object(wrapper)))
    } else {
        Ok(Normalized::Complete(Value::Object(wrapper)))
    }
}

/// Removes `@attributes` from the outermost mapping and from the root
/// element's mapping. Nested attributes are left alone.
pub fn strip_root_attributes(value: &mut Value) {
    if let Value::Object(outer) = value {
        outer.remove(ATTRIBUTES_KEY);
        for root in outer.values_mut() {
            if let Value::Object(root) = root {
                root.remove(ATTRIBUTES_KEY);
            }
        }
    }
}

fn parse_document(mut reader: Reader<&[u8]>) -> Result<Element, XmlError> {
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader.read_event().map_err(|e| XmlError::Syntax {
            position: reader.error_position(),
            message: e.to_string(),
        })?;
        // the decoder changes once an encoding declaration has been read
        let decoder = reader.decoder();
        let position = reader.buffer_position();
        let syntax = |message: String| XmlError::Syntax { position, message };

        match event {
            Event::Start(e) => {
                let element = start_element(&e, decoder).map_err(syntax)?;
                if stack.is_empty() && root.is_some() {
                    return Err(XmlError::MultipleRoots);
                }
                stack.push(element);
            }
            Event::Empty(e) => {
                let element = start_element(&e, decoder).map_err(syntax)?;
                attach(element, &mut stack, &mut root)?;
            }
            Event::End(_) => {
                // quick-xml already rejects mismatched end tags
                if let Some(element) = stack.pop() {
                    attach(element, &mut stack, &mut root)?;
                }
            }
            Event::Text(e) => {
                let text = decoder.decode(&e).map_err(|e| syntax(e.to_string()))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Event::CData(e) => {
                let text = decoder.decode(&e).map_err(|e| syntax(e.to_string()))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Event::GeneralRef(e) => {
                let name = decoder.decode(&e).map_err(|e| syntax(e.to_string()))?;
                let resolved = resolve_reference(&name)
                    .ok_or_else(|| syntax(format!("unknown entity &{};", name)))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&resolved);
                }
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions and doctypes
            // carry nothing for the mapping
            _ => (),
        }
    }

    if let Some(open) = stack.pop() {
        return Err(XmlError::Unclosed(open.name));
    }
    root.ok_or(XmlError::Empty)
}

fn start_element(
    start: &quick_xml::events::BytesStart<'_>,
    decoder: quick_xml::encoding::Decoder,
) -> Result<Element, String> {
    let name = decoder
        .decode(start.name().as_ref())
        .map_err(|e| e.to_string())?
        .into_owned();

    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| e.to_string())?;
        let key = decoder
            .decode(attribute.key.as_ref())
            .map_err(|e| e.to_string())?
            .into_owned();
        let value = attribute
            .decode_and_unescape_value(decoder)
            .map_err(|e| e.to_string())?
            .into_owned();
        attributes.push((key, value));
    }

    Ok(Element {
        name,
        attributes,
        ..Default::default()
    })
}

fn attach(
    element: Element,
    stack: &mut [Element],
    root: &mut Option<Element>,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_some() => return Err(XmlError::MultipleRoots),
        None => *root = Some(element),
    }
    Ok(())
}

// Predefined entities and numeric character references
fn resolve_reference(name: &str) -> Option<String> {
    if let Some(number) = name.strip_prefix('#') {
        let code = match number.strip_prefix('x').or_else(|| number.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => number.parse().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }
    quick_xml::escape::resolve_predefined_entity(name).map(str::to_string)
}

fn normalize_element(element: &Element, depth: usize, truncated: &mut bool) -> Value {
    if depth > MAX_DEPTH {
        *truncated = true;
        return Value::Null;
    }

    if element.children.is_empty() && element.attributes.is_empty() {
        return Value::String(element.text.trim().to_string());
    }

    let mut map = Map::new();
    if !element.attributes.is_empty() {
        map.insert(
            ATTRIBUTES_KEY.to_string(),
            normalize_attributes(&element.attributes, depth + 1, truncated),
        );
    }
    for child in &element.children {
        map.insert(child.name.clone(), normalize_element(child, depth + 1, truncated));
    }
    Value::Object(map)
}

// Attribute maps count as one level and their values as another
fn normalize_attributes(
    attributes: &[(String, String)],
    depth: usize,
    truncated: &mut bool,
) -> Value {
    if depth > MAX_DEPTH {
        *truncated = true;
        return Value::Null;
    }

    let mut map = Map::new();
    for (key, value) in attributes {
        let value = if depth + 1 > MAX_DEPTH {
            *truncated = true;
            Value::Null
        } else {
            Value::String(value.trim().to_string())
        };
        map.insert(key.clone(), value);
    }
    Value::Object(map)
}
